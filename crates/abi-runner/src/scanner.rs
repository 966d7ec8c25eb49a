use std::cell::OnceCell;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use abi_cache::{file_digest, BaselineCache, BaselineKey};
use abi_compliance::{scan_compatible, CompatibilityScan, ComplianceEngine, ComplianceReport, Strictness};
use abi_core::{
    compare_symbol_tables, library_base_name, pair_libraries, sort_versions, ComparisonResult, LibraryComparison,
    LibraryComparisonSet, PublicApiFilter, PublicApiManifest, ReportParser, ScanPolicy, SortedVersions,
    TransitionKind, Verdict, Version,
};
use abi_sources::{source_for, LibraryMatcher, Materialized, PackageSpec, SourceSettings};
use abi_tools::ToolError;

use crate::toolkit::Toolkit;
use crate::Config;

/// Exit code recorded on results whose comparison never ran.
const NOT_RUN: i32 = -1;

/// Everything that shapes a scan besides the tools themselves.
#[derive(Clone, Debug)]
pub struct ScanOptions {
    pub policy: ScanPolicy,
    pub fallback: bool,
    pub suppressions: Option<PathBuf>,
    pub filter: PublicApiFilter,
    pub sources: SourceSettings,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            policy: ScanPolicy::default(),
            fallback: true,
            suppressions: None,
            filter: PublicApiFilter::allow_all(),
            sources: SourceSettings::default(),
        }
    }
}

impl ScanOptions {
    pub fn from_config(cfg: &Config, library_name: Option<String>) -> Result<Self> {
        let p = &cfg.policy;
        let mut namespaces = p.public_namespaces.clone();
        if let Some(raw) = &p.public_api_manifest {
            let path = Config::expand(raw);
            if path.exists() {
                let text = std::fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
                let manifest = PublicApiManifest::from_json(&text)
                    .with_context(|| format!("parse public API manifest {}", path.display()))?;
                namespaces.extend(manifest.namespaces.public);
            } else {
                warn!(path = %path.display(), "public API manifest not found; treating all non-internal symbols as public");
            }
        }
        let filter = PublicApiFilter::with_namespaces(namespaces).context("public namespace list")?;

        let suppressions = match &p.suppressions {
            Some(raw) => {
                let path = Config::expand(raw);
                if !path.is_file() {
                    bail!("suppressions file not found: {}", path.display());
                }
                Some(path)
            }
            None => None,
        };

        Ok(Self {
            policy: p.scan_policy(),
            fallback: p.fallback,
            suppressions,
            filter,
            sources: SourceSettings {
                micromamba: cfg.tools.micromamba.clone(),
                search_timeout: cfg.tools.search_timeout(),
                install_timeout: cfg.tools.install_timeout(),
                apt_index: cfg.sources.apt_index.clone(),
                download_timeout: cfg.sources.download_timeout(),
                matcher: LibraryMatcher::new(library_name),
            },
        })
    }
}

/// Library file names of one version, cached so a fully cached version
/// needs no download.
#[derive(Debug, Default, Serialize, Deserialize)]
struct VersionIndex {
    libraries: Vec<String>,
}

/// One version ready for comparison. Its files are fetched lazily when every
/// baseline is already cached.
pub struct PreparedVersion {
    pub spec: PackageSpec,
    pub label: String,
    cache_package: String,
    files: Vec<String>,
    digests: BTreeMap<String, String>,
    work_dir: PathBuf,
    materialized: OnceCell<Result<Materialized, String>>,
}

impl PreparedVersion {
    /// Library file names as paths, for pairing by base name.
    fn file_paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(PathBuf::from).collect()
    }

    fn key(&self, base: &str) -> BaselineKey {
        BaselineKey::new(&self.cache_package, &self.label).with_library(base)
    }
}

/// Result of `compare`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CompareReport {
    pub old: String,
    pub new: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<TransitionKind>,
    pub verdict: Verdict,
    pub libraries: LibraryComparisonSet,
}

/// Base names of the two files being compared. They differ only when each
/// side carries a single, differently named library.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SideBases {
    pub old: String,
    pub new: String,
}

#[derive(Clone, Debug, Default)]
pub struct VersionQuery {
    pub filter: Option<Regex>,
    pub from: Option<String>,
    pub to: Option<String>,
}

fn is_missing_tool(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|c| c.downcast_ref::<ToolError>().is_some_and(ToolError::is_missing))
}

/// Cache namespace of a spec. Local specs are keyed by location so two
/// files with the same name never share baselines.
fn cache_package(spec: &PackageSpec) -> String {
    match &spec.path {
        Some(path) => format!("{}/{}", spec.channel, path.display()),
        None => format!("{}/{}", spec.channel, spec.package),
    }
}

/// Published versions of a package, parsed and sorted. Strings that
/// are not versions are dropped with a warning.
pub fn list_versions(spec: &PackageSpec, settings: &SourceSettings, filter: Option<&Regex>) -> Result<SortedVersions> {
    if !spec.channel.lists_versions() {
        bail!("listing versions is not supported for {} specs", spec.channel);
    }
    let source = source_for(spec, settings);
    let raw = source
        .list_versions(&spec.package)
        .with_context(|| format!("list versions of {}:{}", spec.channel, spec.package))?;
    let kept = raw.into_iter().filter(|v| filter.map_or(true, |re| re.is_match(v)));
    let sorted = sort_versions(kept);
    for bad in &sorted.rejected {
        warn!(version = %bad, "unparseable version excluded");
    }
    Ok(sorted)
}

/// Drives sources, cache, tools and the functional core.
pub struct Scanner {
    toolkit: Toolkit,
    cache: BaselineCache,
    options: ScanOptions,
    parser: ReportParser,
    work: TempDir,
}

impl Scanner {
    pub fn new(toolkit: Toolkit, cache: BaselineCache, options: ScanOptions) -> Result<Self> {
        let work = tempfile::Builder::new().prefix("abi-scan-work-").tempdir().context("create work dir")?;
        Ok(Self { toolkit, cache, options, parser: ReportParser::new(), work })
    }

    pub fn from_config(cfg: &Config, library_name: Option<String>) -> Result<Self> {
        let toolkit = Toolkit::from_config(cfg)?;
        let cache = if cfg.cache.persistent {
            BaselineCache::open(cfg.cache.resolved_dir())?
        } else {
            BaselineCache::ephemeral()?
        };
        Self::new(toolkit, cache, ScanOptions::from_config(cfg, library_name)?)
    }

    pub fn toolkit(&self) -> &Toolkit {
        &self.toolkit
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    // ---- versions ----

    pub fn list_versions(&self, spec: &PackageSpec, filter: Option<&Regex>) -> Result<SortedVersions> {
        list_versions(spec, &self.options.sources, filter)
    }

    fn select_versions(&self, spec: &PackageSpec, query: &VersionQuery) -> Result<Vec<Version>> {
        let mut versions = self.list_versions(spec, query.filter.as_ref())?.versions;
        if let Some(from) = &query.from {
            let from = Version::parse(from).context("--from-version")?;
            versions.retain(|v| *v >= from);
        }
        if let Some(to) = &query.to {
            let to = Version::parse(to).context("--to-version")?;
            versions.retain(|v| *v <= to);
        }
        Ok(versions)
    }

    // ---- preparation ----

    /// Resolves a versioned spec to its libraries, skipping the download when
    /// every baseline is cached.
    pub fn prepare(&self, spec: &PackageSpec) -> Result<PreparedVersion> {
        let label = spec.version_label();
        let cache_package = cache_package(spec);
        let work_dir = self.work.path().join(BaselineKey::new(&cache_package, &label).file_stem());
        let mut prepared = PreparedVersion {
            spec: spec.clone(),
            label,
            cache_package,
            files: Vec::new(),
            digests: BTreeMap::new(),
            work_dir,
            materialized: OnceCell::new(),
        };

        if spec.channel.is_remote() {
            if let Some(files) = self.cached_index(&prepared) {
                info!(spec = %spec, "all baselines cached; skipping download");
                prepared.files = files;
                return Ok(prepared);
            }
        }

        let m = self.materialize(spec, &prepared.work_dir)?;
        prepared.files = m
            .libraries
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        if !spec.channel.is_remote() {
            for lib in &m.libraries {
                let name = lib.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
                prepared.digests.insert(library_base_name(&name), file_digest(lib)?);
            }
        } else {
            self.store_index(&prepared)?;
        }
        let _ = prepared.materialized.set(Ok(m));
        Ok(prepared)
    }

    fn materialize(&self, spec: &PackageSpec, work_dir: &Path) -> Result<Materialized> {
        let version = spec.version.clone().unwrap_or_default();
        let source = source_for(spec, &self.options.sources);
        std::fs::create_dir_all(work_dir).with_context(|| format!("create {}", work_dir.display()))?;
        source
            .materialize(&spec.package, &version, work_dir)
            .with_context(|| format!("fetch {spec}"))
    }

    fn materialized<'a>(&self, v: &'a PreparedVersion) -> Result<&'a Materialized> {
        v.materialized
            .get_or_init(|| self.materialize(&v.spec, &v.work_dir).map_err(|e| format!("{e:#}")))
            .as_ref()
            .map_err(|e| anyhow!("{e}"))
    }

    fn library_path(&self, v: &PreparedVersion, base: &str) -> Result<PathBuf> {
        let m = self.materialized(v)?;
        m.libraries
            .iter()
            .find(|p| p.file_name().is_some_and(|n| library_base_name(&n.to_string_lossy()) == base))
            .cloned()
            .ok_or_else(|| anyhow!("{base} is missing from {}", v.spec))
    }

    fn cached_index(&self, v: &PreparedVersion) -> Option<Vec<String>> {
        let path = self.cache.lookup(&BaselineKey::new(&v.cache_package, &v.label))?;
        let index: VersionIndex = serde_json::from_slice(&std::fs::read(path).ok()?).ok()?;
        if index.libraries.is_empty() {
            return None;
        }
        let all_cached = index
            .libraries
            .iter()
            .all(|f| self.cache.lookup(&v.key(&library_base_name(f))).is_some());
        all_cached.then_some(index.libraries)
    }

    fn store_index(&self, v: &PreparedVersion) -> Result<()> {
        let index = VersionIndex { libraries: v.files.clone() };
        let bytes = serde_json::to_vec_pretty(&index)?;
        self.cache
            .store_with(&BaselineKey::new(&v.cache_package, &v.label), None, |p| Ok(std::fs::write(p, &bytes)?))?;
        Ok(())
    }

    // ---- comparison ----

    fn baseline(&self, v: &PreparedVersion, base: &str) -> Result<PathBuf> {
        let key = v.key(base);
        let digest = v.digests.get(base).cloned();
        if let Some(path) = self.cache.lookup(&key) {
            if digest.is_none() || self.cache.entry(&key).and_then(|e| e.source_digest) == digest {
                info!(spec = %v.spec, library = base, "baseline cache hit");
                return Ok(path);
            }
        }
        let library = self.library_path(v, base)?;
        let headers = self.materialized(v)?.headers_dir.clone();
        let (path, _) = self.cache.get_or_create(&key, digest, |out| {
            self.toolkit
                .generator
                .generate(&library, headers.as_deref(), out)
                .with_context(|| format!("generate baseline for {}", library.display()))
        })?;
        Ok(path)
    }

    fn typed_compare(&self, old: &PreparedVersion, new: &PreparedVersion, bases: &SideBases) -> Result<ComparisonResult> {
        let old_baseline = self.baseline(old, &bases.old)?;
        let new_baseline = self.baseline(new, &bases.new)?;
        let outcome = self
            .toolkit
            .differ
            .diff(&old_baseline, &new_baseline, self.options.suppressions.as_deref())
            .context("run differ")?;
        if Verdict::from_exit_code(outcome.exit_code) == Verdict::Error {
            bail!("differ exited {}: {}", outcome.exit_code, outcome.stderr.trim());
        }
        let parsed = self.parser.parse(&outcome.report, &self.options.filter, &self.options.filter);
        let result = ComparisonResult::typed(outcome.exit_code, parsed, outcome.report, &self.options.policy);
        if result.verdict != result.raw_verdict {
            info!(library = %bases.new, from = %result.raw_verdict, to = %result.verdict, "verdict adjusted");
        }
        Ok(result)
    }

    fn symbol_table_compare(&self, old: &PreparedVersion, new: &PreparedVersion, bases: &SideBases) -> Result<ComparisonResult> {
        let Some(lister) = &self.toolkit.lister else {
            bail!("no symbol lister available");
        };
        let old_syms = lister.list(&self.library_path(old, &bases.old)?)?;
        let new_syms = lister.list(&self.library_path(new, &bases.new)?)?;
        Ok(compare_symbol_tables(&old_syms, &new_syms, &self.options.filter, &self.options.filter))
    }

    /// Compares one library. Only a missing required tool is an error; every
    /// other failure becomes a fallback result or an `ERROR` entry.
    pub fn compare_library(&self, old: &PreparedVersion, new: &PreparedVersion, bases: &SideBases) -> Result<ComparisonResult> {
        let library = bases.new.as_str();
        let typed_err = match self.typed_compare(old, new, bases) {
            Ok(result) => return Ok(result),
            Err(e) if is_missing_tool(&e) => return Err(e),
            Err(e) => e,
        };
        if !self.options.fallback {
            warn!(library, error = %format!("{typed_err:#}"), "typed comparison failed");
            return Ok(ComparisonResult::error(NOT_RUN, format!("{typed_err:#}")));
        }
        warn!(library, error = %format!("{typed_err:#}"), "typed comparison failed; using symbol-table fallback");
        match self.symbol_table_compare(old, new, bases) {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!(library, error = %format!("{e:#}"), "symbol-table fallback failed");
                Ok(ComparisonResult::error(
                    NOT_RUN,
                    format!("{typed_err:#}; fallback failed: {e:#}"),
                ))
            }
        }
    }

    /// Compares every library of two versions and applies the soname rule
    /// when the transition kind is known.
    pub fn compare_versions(
        &self,
        old: &PreparedVersion,
        new: &PreparedVersion,
        kind: Option<TransitionKind>,
    ) -> Result<LibraryComparisonSet> {
        let mut set = LibraryComparisonSet::default();
        for pair in pair_libraries(&old.file_paths(), &new.file_paths()) {
            let name = |p: &Option<PathBuf>| p.as_ref().map(|p| p.to_string_lossy().into_owned());
            let entry = match (name(&pair.old), name(&pair.new)) {
                (Some(o), Some(n)) => {
                    let bases = SideBases {
                        old: pair.old_base().unwrap_or_default(),
                        new: pair.new_base().unwrap_or_default(),
                    };
                    if bases.old != bases.new {
                        info!(old = %bases.old, new = %bases.new, "comparing differently named libraries");
                    }
                    let result = self.compare_library(old, new, &bases)?;
                    LibraryComparison::compared(pair.base_name.as_str(), &o, &n, result)
                }
                (Some(o), None) => {
                    warn!(library = %pair.base_name, "library removed");
                    LibraryComparison::removed(pair.base_name.as_str(), &o)
                }
                (None, Some(n)) => LibraryComparison::added(pair.base_name.as_str(), &n),
                (None, None) => continue,
            };
            set.insert(entry);
        }
        if let Some(kind) = kind {
            set.apply_soname_policy(kind);
        }
        Ok(set)
    }

    pub fn compare(&self, old: &PackageSpec, new: &PackageSpec) -> Result<CompareReport> {
        let old_prepared = self.prepare(old)?;
        let new_prepared = self.prepare(new)?;
        let kind = match (Version::parse(&old_prepared.label), Version::parse(&new_prepared.label)) {
            (Ok(a), Ok(b)) if old.channel.lists_versions() && new.channel.lists_versions() => {
                Some(TransitionKind::classify(&a, &b))
            }
            _ => None,
        };
        let libraries = self.compare_versions(&old_prepared, &new_prepared, kind)?;
        Ok(CompareReport {
            old: old.to_string(),
            new: new.to_string(),
            kind,
            verdict: libraries.verdict(),
            libraries,
        })
    }

    /// Drops a version that no remaining transition uses, along with its
    /// download directory.
    fn release(&self, prepared: &mut HashMap<String, Result<PreparedVersion, String>>, version: &Version) {
        let Some(entry) = prepared.remove(version.as_str()) else {
            return;
        };
        if let Ok(done) = entry {
            if done.work_dir.exists() {
                if let Err(e) = std::fs::remove_dir_all(&done.work_dir) {
                    warn!(dir = %done.work_dir.display(), error = %e, "could not remove work dir");
                }
            }
            debug!(version = %version, "released prepared version");
        }
    }

    /// One transition for the multi-version commands. The outer error is
    /// fatal; the inner one is a skip reason.
    fn transition(
        &self,
        prepared: &mut HashMap<String, Result<PreparedVersion, String>>,
        spec: &PackageSpec,
        old: &Version,
        new: &Version,
        kind: TransitionKind,
    ) -> Result<Result<LibraryComparisonSet, String>> {
        for v in [old, new] {
            if prepared.contains_key(v.as_str()) {
                continue;
            }
            let entry = match self.prepare(&spec.with_version(v.as_str())) {
                Ok(p) => Ok(p),
                Err(e) if is_missing_tool(&e) => return Err(e),
                Err(e) => {
                    warn!(version = %v, error = %format!("{e:#}"), "version unavailable");
                    Err(format!("{e:#}"))
                }
            };
            prepared.insert(v.as_str().to_string(), entry);
        }
        let (Some(a), Some(b)) = (prepared.get(old.as_str()), prepared.get(new.as_str())) else {
            return Ok(Err("version not prepared".to_string()));
        };
        let (a, b) = match (a, b) {
            (Ok(a), Ok(b)) => (a, b),
            (Err(e), _) => return Ok(Err(format!("{old}: {e}"))),
            (_, Err(e)) => return Ok(Err(format!("{new}: {e}"))),
        };
        debug!(old = %old, new = %new, kind = %kind, "comparing transition");
        Ok(Ok(self.compare_versions(a, b, Some(kind))?))
    }

    /// Compliance over consecutive versions.
    pub fn validate(&self, spec: &PackageSpec, query: &VersionQuery, strictness: Strictness) -> Result<ComplianceReport> {
        let versions = self.select_versions(spec, query)?;
        if versions.len() < 2 {
            bail!(
                "validate needs at least two versions of {}:{}, found {}",
                spec.channel,
                spec.package,
                versions.len()
            );
        }
        info!(package = %spec.package, count = versions.len(), "validating versions");

        let engine = ComplianceEngine::new(strictness);
        let mut prepared = HashMap::new();
        let mut fatal = None;
        let report = engine.evaluate(&spec.package, &versions, |old, new, kind| {
            if fatal.is_some() {
                return Err("aborted".to_string());
            }
            let result = self.transition(&mut prepared, spec, old, new, kind);
            // versions are visited in order, so the older side is done
            self.release(&mut prepared, old);
            match result {
                Ok(outcome) => outcome.inspect_err(|reason| warn!(old = %old, new = %new, %reason, "transition skipped")),
                Err(e) => {
                    fatal = Some(e);
                    Err("aborted".to_string())
                }
            }
        });
        for v in &versions {
            self.release(&mut prepared, v);
        }
        match fatal {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Compares the base version with every newer published version.
    pub fn compatible(&self, spec: &PackageSpec, filter: Option<&Regex>, stop_at_first_break: bool) -> Result<CompatibilityScan> {
        let base_raw = spec.version.as_deref().ok_or_else(|| anyhow!("{spec} needs a base version"))?;
        let base = Version::parse(base_raw).context("base version")?;
        let versions = self.list_versions(spec, filter)?.versions;

        let mut prepared = HashMap::new();
        let mut fatal = None;
        let scan = scan_compatible(&base, &versions, stop_at_first_break, |old, new, kind| {
            if fatal.is_some() {
                return Err("aborted".to_string());
            }
            let result = self.transition(&mut prepared, spec, old, new, kind);
            self.release(&mut prepared, new);
            match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    fatal = Some(e);
                    Err("aborted".to_string())
                }
            }
        });
        self.release(&mut prepared, &base);
        match fatal {
            Some(e) => Err(e),
            None => Ok(scan),
        }
    }
}
