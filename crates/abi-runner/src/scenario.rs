use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use abi_cache::BaselineCache;
use abi_compliance::{CompatibilityScan, ComplianceReport, Strictness};
use abi_core::{library_base_name, parse_nm_output, DynSymbol, Verdict};
use abi_sources::PackageSpec;
use abi_tools::{BaselineGenerator, CxxFilt, DiffOutcome, SymbolLister, ToolError, TypedDiffer};

use crate::scanner::{CompareReport, ScanOptions, Scanner, VersionQuery};
use crate::toolkit::Toolkit;
use crate::{Config, PolicyConfig};

/// A package history plus the differ's answers for it.
#[derive(Debug, Deserialize)]
pub struct Scenario {
    pub package: String,
    #[serde(default)]
    pub library_name: Option<String>,
    /// Version directory name to library file names.
    pub versions: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub diffs: Vec<ScenarioDiff>,
    /// Version to library base name to `nm` output, for the fallback.
    #[serde(default)]
    pub symbols: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub policy: PolicyConfig,
    pub command: ScenarioCommand,
}

/// One differ answer. Pairs without an entry diff as unchanged.
#[derive(Debug, Deserialize)]
pub struct ScenarioDiff {
    pub old: String,
    pub new: String,
    pub library: String,
    pub exit: i32,
    #[serde(default)]
    pub report: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScenarioCommand {
    Compare { old: String, new: String },
    Validate {
        #[serde(default)]
        strict: bool,
    },
    Compatible {
        base: String,
        #[serde(default)]
        stop_at_first_break: bool,
    },
}

#[derive(Debug, Deserialize)]
pub struct ScenarioExpected {
    pub scenario_id: String,
    #[serde(default)]
    pub verdict: Option<Verdict>,
    #[serde(default)]
    pub fallback: Option<bool>,
    #[serde(default)]
    pub libraries: BTreeMap<String, Verdict>,
    #[serde(default)]
    pub compliant: Option<usize>,
    #[serde(default)]
    pub violations: Option<usize>,
    #[serde(default)]
    pub skipped: Option<usize>,
    #[serde(default)]
    pub compatible_versions: Option<Vec<String>>,
    #[serde(default)]
    pub first_breaking: Option<String>,
}

#[derive(Debug)]
pub enum ScenarioOutcome {
    Compare(CompareReport),
    Validate(ComplianceReport),
    Compatible(CompatibilityScan),
}

pub fn load_scenario(dir: &Path) -> Result<Scenario> {
    let p = dir.join("scenario.yaml");
    let s = fs::read_to_string(&p).with_context(|| format!("read scenario.yaml: {}", p.display()))?;
    serde_yaml::from_str(&s).with_context(|| "parse scenario.yaml")
}

pub fn load_expected(dir: &Path) -> Result<ScenarioExpected> {
    let p = dir.join("expected.yaml");
    let s = fs::read_to_string(&p).with_context(|| format!("read expected.yaml: {}", p.display()))?;
    serde_yaml::from_str(&s).with_context(|| "parse expected.yaml")
}

/// Fake libraries hold `version\nfile`; baselines are verbatim copies.
fn identify(path: &Path) -> Result<(String, String), ToolError> {
    let text = fs::read_to_string(path).map_err(|source| ToolError::Spawn { program: "fake".into(), source })?;
    let mut lines = text.lines();
    match (lines.next(), lines.next()) {
        (Some(version), Some(file)) => Ok((version.to_string(), library_base_name(file))),
        _ => Err(ToolError::Failed {
            program: "fake".into(),
            status: "exit 1".into(),
            stderr: format!("unrecognized input {}", path.display()),
        }),
    }
}

struct FakeGenerator;

impl BaselineGenerator for FakeGenerator {
    fn generate(&self, library: &Path, _headers_dir: Option<&Path>, out: &Path) -> Result<(), ToolError> {
        fs::copy(library, out).map_err(|source| ToolError::Spawn { program: "fake-abidw".into(), source })?;
        Ok(())
    }
}

struct FakeDiffer {
    answers: BTreeMap<(String, String, String), DiffOutcome>,
}

impl TypedDiffer for FakeDiffer {
    fn diff(&self, old: &Path, new: &Path, _suppressions: Option<&Path>) -> Result<DiffOutcome, ToolError> {
        let (old_version, base) = identify(old)?;
        let (new_version, _) = identify(new)?;
        Ok(self.answers.get(&(old_version, new_version, base)).cloned().unwrap_or_default())
    }
}

struct FakeLister {
    tables: BTreeMap<(String, String), Vec<DynSymbol>>,
}

impl SymbolLister for FakeLister {
    fn list(&self, library: &Path) -> Result<Vec<DynSymbol>, ToolError> {
        let key = identify(library)?;
        Ok(self.tables.get(&key).cloned().unwrap_or_default())
    }
}

pub(crate) fn fake_toolkit(sc: &Scenario) -> Toolkit {
    let answers = sc
        .diffs
        .iter()
        .map(|d| {
            let outcome = DiffOutcome {
                exit_code: d.exit,
                report: d.report.clone(),
                stderr: if Verdict::from_exit_code(d.exit) == Verdict::Error { "abidiff crashed".into() } else { String::new() },
            };
            ((d.old.clone(), d.new.clone(), d.library.clone()), outcome)
        })
        .collect();
    let tables = sc
        .symbols
        .iter()
        .flat_map(|(version, libs)| {
            libs.iter()
                .map(move |(base, nm)| ((version.clone(), base.clone()), parse_nm_output(nm)))
        })
        .collect();
    Toolkit {
        generator: Box::new(FakeGenerator),
        differ: Box::new(FakeDiffer { answers }),
        lister: Some(Box::new(FakeLister { tables })),
        demangler: CxxFilt::locate("abi-scan-scenario-no-demangler"),
    }
}

/// Lays the versions out as a local tree named after the package.
pub(crate) fn build_tree(sc: &Scenario, root: &Path) -> Result<PathBuf> {
    let tree = root.join(&sc.package);
    for (version, files) in &sc.versions {
        let lib_dir = tree.join(version).join("lib");
        fs::create_dir_all(&lib_dir).with_context(|| format!("create {}", lib_dir.display()))?;
        for file in files {
            fs::write(lib_dir.join(file), format!("{version}\n{file}\n")).with_context(|| format!("write {file}"))?;
        }
    }
    Ok(tree)
}

/// Runs a scenario end to end through the scanner with fake tools over a
/// temporary local tree.
pub fn simulate(dir: &Path) -> Result<ScenarioOutcome> {
    let sc = load_scenario(dir)?;
    let scratch = tempfile::tempdir().context("scenario scratch dir")?;
    let tree = build_tree(&sc, scratch.path())?;

    let mut cfg = Config::default();
    cfg.policy = sc.policy.clone();
    cfg.cache.persistent = false;
    let options = ScanOptions::from_config(&cfg, sc.library_name.clone())?;
    let scanner = Scanner::new(fake_toolkit(&sc), BaselineCache::ephemeral()?, options)?;

    let spec = PackageSpec::parse(&format!("local-tree:{}", tree.display()), false)?;
    let outcome = match &sc.command {
        ScenarioCommand::Compare { old, new } => {
            ScenarioOutcome::Compare(scanner.compare(&spec.with_version(old.as_str()), &spec.with_version(new.as_str()))?)
        }
        ScenarioCommand::Validate { strict } => ScenarioOutcome::Validate(scanner.validate(
            &spec,
            &VersionQuery::default(),
            Strictness::from_flag(*strict || cfg.policy.strict),
        )?),
        ScenarioCommand::Compatible { base, stop_at_first_break } => ScenarioOutcome::Compatible(
            scanner.compatible(&spec.with_version(base.as_str()), None, *stop_at_first_break)?,
        ),
    };
    Ok(outcome)
}

/// Differences between the expectation and the outcome, empty when they agree.
pub fn mismatches(exp: &ScenarioExpected, outcome: &ScenarioOutcome) -> Vec<String> {
    let mut out = Vec::new();
    let mut check = |what: &str, want: String, got: String| {
        if want != got {
            out.push(format!("{}: {what}: expected {want}, got {got}", exp.scenario_id));
        }
    };
    match outcome {
        ScenarioOutcome::Compare(r) => {
            if let Some(v) = exp.verdict {
                check("verdict", v.to_string(), r.verdict.to_string());
            }
            if let Some(f) = exp.fallback {
                check("fallback", f.to_string(), r.libraries.any_fallback().to_string());
            }
            for (base, want) in &exp.libraries {
                let got = r.libraries.get(base).map_or("absent".to_string(), |e| e.result.verdict.to_string());
                check(base, want.to_string(), got);
            }
        }
        ScenarioOutcome::Validate(r) => {
            let s = &r.summary;
            for (what, want, got) in [
                ("compliant", exp.compliant, s.compliant),
                ("violations", exp.violations, s.violations),
                ("skipped", exp.skipped, s.skipped),
            ] {
                if let Some(want) = want {
                    check(what, want.to_string(), got.to_string());
                }
            }
        }
        ScenarioOutcome::Compatible(scan) => {
            if let Some(want) = &exp.compatible_versions {
                check("compatible versions", want.join(","), scan.compatible_versions.join(","));
            }
            if let Some(want) = &exp.first_breaking {
                check("first breaking", want.clone(), scan.first_breaking.clone().unwrap_or_default());
            }
        }
    }
    out
}
