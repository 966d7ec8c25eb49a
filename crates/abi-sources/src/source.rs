use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;

use crate::apt::{AptSource, INTEL_APT_INDEX};
use crate::conda::CondaSource;
use crate::discover::LibraryMatcher;
use crate::local::{LocalFile, LocalTree};
use crate::spec::{Channel, PackageSpec};

/// One version of a package laid out on local storage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Materialized {
    pub root: PathBuf,
    pub libraries: Vec<PathBuf>,
    pub headers_dir: Option<PathBuf>,
}

pub trait PackageSource: Send + Sync {
    /// Versions published for `package`, unsorted. An unknown package is an
    /// empty list, not an error.
    fn list_versions(&self, package: &str) -> Result<Vec<String>>;

    /// Fetches `package=version` below `work_dir` and locates its libraries.
    fn materialize(&self, package: &str, version: &str, work_dir: &Path) -> Result<Materialized>;
}

/// Settings shared by every source.
#[derive(Clone, Debug)]
pub struct SourceSettings {
    pub micromamba: String,
    pub search_timeout: Duration,
    pub install_timeout: Duration,
    /// `Packages` index of the apt channel: an https URL or a local path.
    pub apt_index: String,
    pub download_timeout: Duration,
    pub matcher: LibraryMatcher,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            micromamba: "micromamba".to_string(),
            search_timeout: Duration::from_secs(60),
            install_timeout: Duration::from_secs(900),
            apt_index: INTEL_APT_INDEX.to_string(),
            download_timeout: Duration::from_secs(600),
            matcher: LibraryMatcher::default(),
        }
    }
}

/// Builds the source a spec refers to.
pub fn source_for(spec: &PackageSpec, settings: &SourceSettings) -> Box<dyn PackageSource> {
    match spec.channel {
        Channel::CondaForge | Channel::Intel => Box::new(CondaSource::new(spec.channel.as_str(), settings)),
        Channel::Apt => Box::new(AptSource::new(settings)),
        Channel::Local => Box::new(LocalFile::new(spec.path.clone().unwrap_or_default(), settings.matcher.clone())),
        Channel::LocalTree => Box::new(LocalTree::new(
            spec.path.clone().unwrap_or_default(),
            settings.matcher.clone(),
        )),
    }
}
