use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use abi_core::ScanPolicy;
use abi_sources::INTEL_APT_INDEX;

pub const CONFIG_FILE: &str = "abi-scan.toml";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub abidw: String,
    pub abidiff: String,
    pub cxxfilt: String,
    pub nm: String,
    pub micromamba: String,
    pub demangle_timeout_ms: u64,
    pub baseline_timeout_secs: u64,
    pub diff_timeout_secs: u64,
    pub search_timeout_secs: u64,
    pub install_timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            abidw: "abidw".to_string(),
            abidiff: "abidiff".to_string(),
            cxxfilt: "c++filt".to_string(),
            nm: "nm".to_string(),
            micromamba: "micromamba".to_string(),
            demangle_timeout_ms: 1000,
            baseline_timeout_secs: 600,
            diff_timeout_secs: 300,
            search_timeout_secs: 60,
            install_timeout_secs: 900,
        }
    }
}

impl ToolsConfig {
    pub fn demangle_timeout(&self) -> Duration {
        Duration::from_millis(self.demangle_timeout_ms)
    }

    pub fn baseline_timeout(&self) -> Duration {
        Duration::from_secs(self.baseline_timeout_secs)
    }

    pub fn diff_timeout(&self) -> Duration {
        Duration::from_secs(self.diff_timeout_secs)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// `Packages` index for `apt:` specs; https URL or local mirror path.
    pub apt_index: String,
    pub download_timeout_secs: u64,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self { apt_index: INTEL_APT_INDEX.to_string(), download_timeout_secs: 600 }
    }
}

impl SourcesConfig {
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: String,
    /// When false each run uses a throwaway directory.
    pub persistent: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { dir: "~/.cache/abi-scan".to_string(), persistent: true }
    }
}

impl CacheConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.dir).into_owned())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub suppress_stdlib: bool,
    pub track_experimental: bool,
    /// Fall back to a symbol-table diff when the typed tools fail.
    pub fallback: bool,
    pub public_namespaces: Vec<String>,
    pub public_api_manifest: Option<String>,
    pub suppressions: Option<String>,
    pub strict: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            suppress_stdlib: false,
            track_experimental: false,
            fallback: true,
            public_namespaces: Vec::new(),
            public_api_manifest: None,
            suppressions: None,
            strict: false,
        }
    }
}

impl PolicyConfig {
    pub fn scan_policy(&self) -> ScanPolicy {
        ScanPolicy { suppress_stdlib: self.suppress_stdlib, track_experimental: self.track_experimental }
    }
}

impl Config {
    /// Defaults with both downgrade rules on, as written by `init`.
    pub fn default_for_init() -> Self {
        let mut cfg = Self::default();
        cfg.policy.suppress_stdlib = true;
        cfg.policy.track_experimental = true;
        cfg
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let cfg: Config = toml::from_str(&s).with_context(|| format!("parse {}", path.display()))?;
        Ok(cfg)
    }

    /// Loads `path`, or `./abi-scan.toml` when none is given. A missing
    /// default file means defaults; a missing explicit file is an error.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load_from(path),
            None => {
                let path = Path::new(CONFIG_FILE);
                if path.exists() {
                    Self::load_from(path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let s = toml::to_string_pretty(self).with_context(|| "serialize toml")?;
        std::fs::write(path, s).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    pub fn expand(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        let mut cfg = Config::default_for_init();
        cfg.policy.public_namespaces = vec!["oneapi::dal".into()];
        cfg.tools.abidw = "/opt/libabigail/bin/abidw".into();
        cfg.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[policy]\nstrict = true\n\n[cache]\npersistent = false\n").unwrap();
        let cfg = Config::load_from(&path).unwrap();
        assert!(cfg.policy.strict);
        assert!(cfg.policy.fallback);
        assert!(!cfg.cache.persistent);
        assert_eq!(cfg.cache.dir, "~/.cache/abi-scan");
        assert_eq!(cfg.tools.demangle_timeout(), Duration::from_millis(1000));
        assert_eq!(cfg.sources.apt_index, INTEL_APT_INDEX);
        assert_eq!(cfg.sources.download_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn explicit_missing_file_is_error() {
        assert!(Config::load_or_default(Some(Path::new("/nonexistent/abi-scan.toml"))).is_err());
    }
}
