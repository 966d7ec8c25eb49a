use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tracing::{debug, info};

use crate::archive;
use crate::discover::{find_headers_dir, find_unpacked_libraries, LibraryMatcher};
use crate::source::{Materialized, PackageSource, SourceSettings};

pub const INTEL_APT_INDEX: &str = "https://apt.repos.intel.com/oneapi/dists/all/main/binary-amd64/Packages.gz";

/// One stanza of a Debian `Packages` index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AptPackage {
    pub package: String,
    pub version: String,
    /// Path of the `.deb` relative to the repository root.
    pub filename: String,
}

/// Stanzas carrying `Package`, `Version` and `Filename`; others are dropped.
pub fn parse_packages_index(text: &str) -> Vec<AptPackage> {
    let mut out = Vec::new();
    let mut fields: [Option<String>; 3] = Default::default();
    for line in text.lines().chain(std::iter::once("")) {
        if line.trim().is_empty() {
            if let [Some(package), Some(version), Some(filename)] = std::mem::take(&mut fields) {
                out.push(AptPackage { package, version, filename });
            }
            continue;
        }
        let Some((key, value)) = line.split_once(':') else { continue };
        let slot = match key {
            "Package" => 0,
            "Version" => 1,
            "Filename" => 2,
            _ => continue,
        };
        fields[slot] = Some(value.trim().to_string());
    }
    out
}

/// Where an index or package file lives.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Location {
    Remote(String),
    Local(PathBuf),
}

impl Location {
    /// Only `https://` URLs and plain filesystem paths (a mirrored repository)
    /// are accepted.
    fn parse(raw: &str) -> Result<Self> {
        if raw.starts_with("https://") {
            Ok(Location::Remote(raw.to_string()))
        } else if raw.contains("://") {
            bail!("only https:// package indexes are allowed, got {raw}")
        } else {
            Ok(Location::Local(PathBuf::from(shellexpand::tilde(raw).into_owned())))
        }
    }
}

/// Repository root of an index URL: everything before `/dists/`, else the
/// scheme and host.
fn repository_root(index: &str) -> &str {
    if let Some(i) = index.find("/dists/") {
        return &index[..i];
    }
    match index.match_indices('/').nth(2) {
        Some((i, _)) => &index[..i],
        None => index,
    }
}

/// Debian package channel read from a `Packages` index over https.
#[derive(Clone, Debug)]
pub struct AptSource {
    index: String,
    timeout: Duration,
    matcher: LibraryMatcher,
}

impl AptSource {
    pub fn new(settings: &SourceSettings) -> Self {
        Self { index: settings.apt_index.clone(), timeout: settings.download_timeout, matcher: settings.matcher.clone() }
    }

    fn client(&self) -> Result<reqwest::blocking::Client> {
        reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .https_only(true)
            .build()
            .context("create http client")
    }

    fn fetch_index(&self) -> Result<Vec<AptPackage>> {
        let raw = match Location::parse(&self.index)? {
            Location::Remote(url) => {
                debug!(url = %url, "fetching package index");
                let resp = self.client()?.get(&url).send().and_then(|r| r.error_for_status());
                resp.and_then(|r| r.bytes()).with_context(|| format!("fetch {url}"))?.to_vec()
            }
            Location::Local(path) => fs::read(&path).with_context(|| format!("read {}", path.display()))?,
        };
        let text = if self.index.ends_with(".gz") {
            let mut out = String::new();
            flate2::read::GzDecoder::new(raw.as_slice())
                .read_to_string(&mut out)
                .with_context(|| format!("decompress {}", self.index))?;
            out
        } else {
            String::from_utf8_lossy(&raw).into_owned()
        };
        Ok(parse_packages_index(&text))
    }

    /// Location of a `Filename` from the index. Names leaving the repository
    /// are refused.
    fn package_location(&self, filename: &str) -> Result<Location> {
        let rel = Path::new(filename);
        if !rel.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir)) {
            bail!("package index names a file outside the repository: {filename}");
        }
        let root = repository_root(&self.index);
        Location::parse(&format!("{}/{}", root.trim_end_matches('/'), filename.trim_start_matches("./")))
    }

    fn download(&self, url: &str, dest: &Path) -> Result<()> {
        info!(url, "downloading package");
        let mut resp = self
            .client()?
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("fetch {url}"))?;
        let mut file = File::create(dest).with_context(|| format!("create {}", dest.display()))?;
        resp.copy_to(&mut file).with_context(|| format!("download {url}"))?;
        Ok(())
    }
}

impl PackageSource for AptSource {
    fn list_versions(&self, package: &str) -> Result<Vec<String>> {
        let versions: BTreeSet<String> = self
            .fetch_index()?
            .into_iter()
            .filter(|p| p.package == package)
            .map(|p| p.version)
            .collect();
        Ok(versions.into_iter().collect())
    }

    fn materialize(&self, package: &str, version: &str, work_dir: &Path) -> Result<Materialized> {
        let entry = self
            .fetch_index()?
            .into_iter()
            .find(|p| p.package == package && p.version == version)
            .ok_or_else(|| anyhow!("{package}={version} is not in the package index {}", self.index))?;

        let deb = match self.package_location(&entry.filename)? {
            Location::Local(path) => path,
            Location::Remote(url) => {
                let name = Path::new(&entry.filename)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| format!("{package}_{version}.deb"));
                let dest = work_dir.join(name);
                self.download(&url, &dest)?;
                dest
            }
        };

        let root = work_dir.join("root");
        archive::unpack(&deb, &root)?;
        let libraries = find_unpacked_libraries(&root, package, &self.matcher);
        if libraries.is_empty() {
            bail!("no library for {package} found in {}", deb.display());
        }
        Ok(Materialized { headers_dir: find_headers_dir(&root), root, libraries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::{gzip, tar_bytes, write_deb};
    use tempfile::tempdir;

    const INDEX: &str = "\
Package: intel-oneapi-ccl-2021.17
Architecture: amd64
Version: 2021.17.2-5
Depends: intel-oneapi-common-vars,
 intel-oneapi-mpi
Filename: pool/main/intel-oneapi-ccl-2021.17_2021.17.2-5_amd64.deb

Package: intel-oneapi-ccl-2021.17
Version: 2021.17.1-3
Filename: pool/main/intel-oneapi-ccl-2021.17_2021.17.1-3_amd64.deb

Package: intel-oneapi-ccl-2021.17
Version: 2021.17.2-5
Filename: pool/main/intel-oneapi-ccl-2021.17_2021.17.2-5_amd64.deb

Package: broken
Version: 1.0
";

    #[test]
    fn parses_packages_stanzas() {
        let pkgs = parse_packages_index(INDEX);
        assert_eq!(pkgs.len(), 3);
        assert_eq!(
            pkgs[0],
            AptPackage {
                package: "intel-oneapi-ccl-2021.17".into(),
                version: "2021.17.2-5".into(),
                filename: "pool/main/intel-oneapi-ccl-2021.17_2021.17.2-5_amd64.deb".into(),
            }
        );
        assert!(pkgs.iter().all(|p| p.package != "broken"));
    }

    #[test]
    fn only_https_indexes_are_accepted() {
        assert!(Location::parse("http://apt.example.com/dists/x/Packages.gz").is_err());
        assert!(Location::parse("file:///srv/Packages").is_err());
        assert_eq!(Location::parse(INTEL_APT_INDEX).unwrap(), Location::Remote(INTEL_APT_INDEX.into()));
        assert_eq!(Location::parse("/srv/mirror/Packages").unwrap(), Location::Local("/srv/mirror/Packages".into()));
    }

    #[test]
    fn repository_root_of_an_index() {
        assert_eq!(repository_root(INTEL_APT_INDEX), "https://apt.repos.intel.com/oneapi");
        assert_eq!(repository_root("https://mirror.example.com/Packages.gz"), "https://mirror.example.com");
        assert_eq!(repository_root("/srv/mirror/dists/all/main/binary-amd64/Packages"), "/srv/mirror");
    }

    #[test]
    fn index_filenames_cannot_leave_the_repository() {
        let src = AptSource::new(&SourceSettings::default());
        assert_eq!(
            src.package_location("pool/main/x.deb").unwrap(),
            Location::Remote("https://apt.repos.intel.com/oneapi/pool/main/x.deb".into())
        );
        assert!(src.package_location("../../etc/x.deb").is_err());
        assert!(src.package_location("/etc/x.deb").is_err());
    }

    #[test]
    fn mirrored_repository_lists_and_materializes() {
        let dir = tempdir().unwrap();
        let repo = dir.path().join("repo");
        let index = repo.join("dists/all/main/binary-amd64/Packages.gz");
        fs::create_dir_all(index.parent().unwrap()).unwrap();
        fs::write(&index, gzip(INDEX.as_bytes())).unwrap();
        fs::create_dir_all(repo.join("pool/main")).unwrap();
        write_deb(
            &repo.join("pool/main/intel-oneapi-ccl-2021.17_2021.17.2-5_amd64.deb"),
            gzip(&tar_bytes(&[
                ("./opt/intel/oneapi/ccl/2021.17/lib/libccl.so.1.0", "\x7fELF"),
                ("./opt/intel/oneapi/ccl/2021.17/include/oneapi/ccl.hpp", "//"),
            ])),
        );

        let settings = SourceSettings { apt_index: index.display().to_string(), ..SourceSettings::default() };
        let src = AptSource::new(&settings);
        assert_eq!(src.list_versions("intel-oneapi-ccl-2021.17").unwrap(), vec!["2021.17.1-3", "2021.17.2-5"]);
        assert!(src.list_versions("intel-oneapi-mkl").unwrap().is_empty());

        let work = dir.path().join("work");
        let m = src.materialize("intel-oneapi-ccl-2021.17", "2021.17.2-5", &work).unwrap();
        assert_eq!(m.libraries, vec![work.join("root/opt/intel/oneapi/ccl/2021.17/lib/libccl.so.1.0")]);

        let missing = src.materialize("intel-oneapi-ccl-2021.17", "2021.17.1-3", &work).unwrap_err();
        assert!(format!("{missing:#}").contains("intel-oneapi-ccl-2021.17_2021.17.1-3_amd64.deb"));
        assert!(src.materialize("intel-oneapi-ccl-2021.17", "9.9", &work).is_err());
    }
}
