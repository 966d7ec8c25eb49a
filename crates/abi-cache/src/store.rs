use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, info};

use crate::key::BaselineKey;

const BASELINE_EXT: &str = "abi";
const META_EXT: &str = "json";

/// Sidecar record written next to each baseline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: BaselineKey,
    /// Digest of the library the baseline was produced from, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_digest: Option<String>,
}

/// Directory of baselines keyed by (package, version, library).
///
/// Writes go to a temporary file in the same directory and are renamed into
/// place, so a reader never sees a partial baseline.
pub struct BaselineCache {
    dir: PathBuf,
    // Keeps a per-run directory alive until the cache is dropped.
    _scratch: Option<TempDir>,
}

impl BaselineCache {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).with_context(|| format!("create cache dir {}", dir.display()))?;
        Ok(Self { dir, _scratch: None })
    }

    /// Cache that lives only as long as this value.
    pub fn ephemeral() -> Result<Self> {
        let scratch = tempfile::Builder::new()
            .prefix("abi-scan-")
            .tempdir()
            .context("create per-run cache dir")?;
        Ok(Self { dir: scratch.path().to_path_buf(), _scratch: Some(scratch) })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &BaselineKey) -> PathBuf {
        self.dir.join(format!("{}.{}", key.file_stem(), BASELINE_EXT))
    }

    fn meta_path_for(&self, key: &BaselineKey) -> PathBuf {
        self.dir.join(format!("{}.{}", key.file_stem(), META_EXT))
    }

    /// Path of a non-empty cached baseline.
    pub fn lookup(&self, key: &BaselineKey) -> Option<PathBuf> {
        let path = self.path_for(key);
        let present = fs::metadata(&path).map(|m| m.is_file() && m.len() > 0).unwrap_or(false);
        present.then_some(path)
    }

    /// Produces a baseline through `produce`, which receives a temporary path
    /// to write to, then renames it into place.
    pub fn store_with<F>(&self, key: &BaselineKey, source_digest: Option<String>, produce: F) -> Result<PathBuf>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        let tmp = NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("create temp file in {}", self.dir.display()))?;
        produce(tmp.path())?;

        let len = fs::metadata(tmp.path()).map(|m| m.len()).unwrap_or(0);
        if len == 0 {
            anyhow::bail!("baseline for {}={} is empty", key.package, key.version);
        }

        let path = self.path_for(key);
        tmp.persist(&path)
            .map_err(|e| e.error)
            .with_context(|| format!("persist baseline {}", path.display()))?;

        // sidecar goes second: a baseline without one is treated as stale
        let entry = CacheEntry { key: key.clone(), source_digest };
        let mut meta = NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("create temp file in {}", self.dir.display()))?;
        serde_json::to_writer_pretty(&mut meta, &entry)?;
        let meta_path = self.meta_path_for(key);
        meta.persist(&meta_path)
            .map_err(|e| e.error)
            .with_context(|| format!("persist {}", meta_path.display()))?;

        debug!(path = %path.display(), "baseline stored");
        Ok(path)
    }

    /// Returns the cached baseline or produces one. The flag is true on a hit.
    pub fn get_or_create<F>(&self, key: &BaselineKey, source_digest: Option<String>, produce: F) -> Result<(PathBuf, bool)>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        if let Some(path) = self.lookup(key) {
            let stale = match &source_digest {
                Some(want) => self.entry(key).and_then(|e| e.source_digest).as_ref() != Some(want),
                None => false,
            };
            if !stale {
                info!(package = %key.package, version = %key.version, library = ?key.library, "baseline cache hit");
                return Ok((path, true));
            }
            debug!(package = %key.package, version = %key.version, "cached baseline is stale");
        }
        Ok((self.store_with(key, source_digest, produce)?, false))
    }

    pub fn entry(&self, key: &BaselineKey) -> Option<CacheEntry> {
        let bytes = fs::read(self.meta_path_for(key)).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// All entries with a readable sidecar, sorted by key.
    pub fn entries(&self) -> Result<Vec<CacheEntry>> {
        let mut out = Vec::new();
        for item in fs::read_dir(&self.dir).with_context(|| format!("read {}", self.dir.display()))? {
            let path = item?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(META_EXT) {
                continue;
            }
            if let Ok(entry) = serde_json::from_slice::<CacheEntry>(&fs::read(&path)?) {
                out.push(entry);
            }
        }
        out.sort_by(|a, b| {
            (&a.key.package, &a.key.version, &a.key.library).cmp(&(&b.key.package, &b.key.version, &b.key.library))
        });
        Ok(out)
    }

    /// Removes every baseline and sidecar. Returns how many baselines went.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for item in fs::read_dir(&self.dir)? {
            let path = item?.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some(BASELINE_EXT) => {
                    fs::remove_file(&path)?;
                    removed += 1;
                }
                Some(META_EXT) => fs::remove_file(&path)?,
                _ => {}
            }
        }
        Ok(removed)
    }
}
