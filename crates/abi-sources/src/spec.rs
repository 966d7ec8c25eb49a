use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    CondaForge,
    Intel,
    /// Debian packages listed in a `Packages` index.
    Apt,
    /// A single shared object or package archive on disk.
    Local,
    /// A directory whose subdirectories are versions.
    LocalTree,
}

impl Channel {
    pub const ALL: [Channel; 5] = [Channel::CondaForge, Channel::Intel, Channel::Apt, Channel::Local, Channel::LocalTree];

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::CondaForge => "conda-forge",
            Channel::Intel => "intel",
            Channel::Apt => "apt",
            Channel::Local => "local",
            Channel::LocalTree => "local-tree",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }

    pub fn is_conda(self) -> bool {
        matches!(self, Channel::CondaForge | Channel::Intel)
    }

    /// Fetched from a package repository rather than read from disk.
    pub fn is_remote(self) -> bool {
        !matches!(self, Channel::Local | Channel::LocalTree)
    }

    pub fn lists_versions(self) -> bool {
        !matches!(self, Channel::Local)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("invalid package spec {0:?}: expected channel:package[=version]")]
    Format(String),
    #[error("unsupported channel {channel:?}; supported: conda-forge, intel, apt, local, local-tree")]
    UnknownChannel { channel: String },
    #[error("empty package name in spec {0:?}")]
    EmptyPackage(String),
    #[error("empty version in spec {0:?}")]
    EmptyVersion(String),
    #[error("spec {0:?} needs a version: channel:package=version")]
    MissingVersion(String),
    #[error("{channel} spec needs a path: {channel}:/path")]
    EmptyPath { channel: Channel },
}

/// Parsed `channel:package=version` reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackageSpec {
    pub channel: Channel,
    pub package: String,
    pub version: Option<String>,
    /// Filesystem location for local channels.
    pub path: Option<PathBuf>,
}

impl PackageSpec {
    /// Parses a spec. `require_version` rejects specs without `=version`
    /// (local files never carry one).
    pub fn parse(input: &str, require_version: bool) -> Result<Self, SpecError> {
        let trimmed = input.trim();
        let Some((channel, rest)) = trimmed.split_once(':') else {
            return Err(SpecError::Format(input.to_string()));
        };
        let channel_name = channel.trim();
        let channel = Channel::parse(channel_name)
            .ok_or_else(|| SpecError::UnknownChannel { channel: channel_name.to_string() })?;
        let rest = rest.trim();

        match channel {
            Channel::Local => {
                if rest.is_empty() {
                    return Err(SpecError::EmptyPath { channel });
                }
                let path = expand(rest);
                let package = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| rest.to_string());
                Ok(Self { channel, package, version: None, path: Some(path) })
            }
            Channel::LocalTree => {
                // `=version` only when what follows the last '=' is not a path.
                let (raw_path, version) = match rest.rsplit_once('=') {
                    Some((p, v)) if !v.contains('/') => (p.trim(), Some(v.trim())),
                    _ => (rest, None),
                };
                if raw_path.is_empty() {
                    return Err(SpecError::EmptyPath { channel });
                }
                let version = check_version(input, version, require_version)?;
                let path = expand(raw_path);
                let package = path
                    .file_name()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| raw_path.to_string());
                Ok(Self { channel, package, version, path: Some(path) })
            }
            Channel::CondaForge | Channel::Intel | Channel::Apt => {
                let (package, version) = match rest.split_once('=') {
                    Some((p, v)) => (p.trim(), Some(v.trim())),
                    None => (rest, None),
                };
                if package.is_empty() {
                    return Err(SpecError::EmptyPackage(input.to_string()));
                }
                let version = check_version(input, version, require_version)?;
                Ok(Self { channel, package: package.to_string(), version, path: None })
            }
        }
    }

    pub fn with_version(&self, version: impl Into<String>) -> Self {
        Self { version: Some(version.into()), ..self.clone() }
    }

    /// Label used in reports: the version, or the file name for local files.
    pub fn version_label(&self) -> String {
        match (&self.version, &self.path) {
            (Some(v), _) => v.clone(),
            (None, Some(p)) => p
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| p.display().to_string()),
            (None, None) => "unknown".to_string(),
        }
    }
}

fn check_version(input: &str, version: Option<&str>, required: bool) -> Result<Option<String>, SpecError> {
    match version {
        Some("") => Err(SpecError::EmptyVersion(input.to_string())),
        Some(v) => Ok(Some(v.to_string())),
        None if required => Err(SpecError::MissingVersion(input.to_string())),
        None => Ok(None),
    }
}

fn expand(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.path, &self.version) {
            (Some(p), Some(v)) => write!(f, "{}:{}={}", self.channel, p.display(), v),
            (Some(p), None) => write!(f, "{}:{}", self.channel, p.display()),
            (None, Some(v)) => write!(f, "{}:{}={}", self.channel, self.package, v),
            (None, None) => write!(f, "{}:{}", self.channel, self.package),
        }
    }
}
