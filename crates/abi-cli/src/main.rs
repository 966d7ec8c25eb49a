use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use regex::Regex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use abi_compliance::Strictness;
use abi_core::Verdict;
use abi_runner::{
    doctor, list_versions, mangled_names, require_tools, to_json, Config, ScanOptions, Scanner, TextReport,
    ToolStatus, VersionQuery, CONFIG_FILE,
};
use abi_sources::{scan_headers, PackageSpec};

#[derive(Parser)]
#[command(name = "abi-scan", version, about = "ABI compatibility verdicts for shared libraries")]
struct Cli {
    /// Config file (default: ./abi-scan.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum FailOn {
    Breaking,
    Any,
    None,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum FailOnViolations {
    Violations,
    None,
}

#[derive(Args, Clone, Debug)]
struct OutputArgs {
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,
    /// Write the report here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
    /// Symbols shown per namespace in text details (0 = all)
    #[arg(long, default_value_t = 5)]
    max_per_namespace: usize,
    /// Omit per-symbol details from text output
    #[arg(long)]
    summary_only: bool,
}

#[derive(Args, Clone, Debug, Default)]
struct ScanArgs {
    /// Library file name or prefix to compare, e.g. libsycl.so
    #[arg(long)]
    library_name: Option<String>,
    /// Suppression rules passed to the differ
    #[arg(long)]
    suppressions: Option<String>,
    /// Namespace treated as public API (repeatable)
    #[arg(long = "public-namespace")]
    public_namespaces: Vec<String>,
    /// JSON public API manifest
    #[arg(long)]
    public_api_manifest: Option<String>,
    /// Ignore leaked standard library symbols when judging removals
    #[arg(long)]
    suppress_stdlib: bool,
    /// Treat `fooExp` -> `foo` as a promotion, not a removal
    #[arg(long)]
    track_experimental: bool,
    /// Report ERROR instead of falling back to a symbol-table diff
    #[arg(long)]
    no_fallback: bool,
    /// Use a throwaway baseline cache
    #[arg(long)]
    no_cache: bool,
}

impl ScanArgs {
    fn apply(&self, cfg: &mut Config) {
        let p = &mut cfg.policy;
        if self.suppressions.is_some() {
            p.suppressions = self.suppressions.clone();
        }
        if !self.public_namespaces.is_empty() {
            p.public_namespaces = self.public_namespaces.clone();
        }
        if self.public_api_manifest.is_some() {
            p.public_api_manifest = self.public_api_manifest.clone();
        }
        p.suppress_stdlib |= self.suppress_stdlib;
        p.track_experimental |= self.track_experimental;
        if self.no_fallback {
            p.fallback = false;
        }
        if self.no_cache {
            cfg.cache.persistent = false;
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Compare two package specs (channel:package=version, apt:deb-package=version, or local:/path to a library or archive)
    Compare {
        old: String,
        new: String,
        #[arg(long, value_enum, default_value_t = FailOn::None)]
        fail_on: FailOn,
        #[command(flatten)]
        scan: ScanArgs,
        #[command(flatten)]
        out: OutputArgs,
    },

    /// Check semver compliance across consecutive versions
    Validate {
        spec: String,
        /// Patch releases must be NO_CHANGE
        #[arg(long)]
        strict: bool,
        /// Regex over version strings
        #[arg(long)]
        filter: Option<String>,
        #[arg(long)]
        from_version: Option<String>,
        #[arg(long)]
        to_version: Option<String>,
        #[arg(long, value_enum, default_value_t = FailOnViolations::None)]
        fail_on: FailOnViolations,
        #[command(flatten)]
        scan: ScanArgs,
        #[command(flatten)]
        out: OutputArgs,
    },

    /// Compare a base version with every newer version
    Compatible {
        spec: String,
        #[arg(long)]
        filter: Option<String>,
        #[arg(long)]
        stop_at_first_break: bool,
        #[arg(long, value_enum, default_value_t = FailOn::None)]
        fail_on: FailOn,
        #[command(flatten)]
        scan: ScanArgs,
        #[command(flatten)]
        out: OutputArgs,
    },

    /// List published versions of a package
    List {
        spec: String,
        #[arg(long)]
        filter: Option<String>,
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Write a public API manifest from a header tree
    Headers {
        dir: PathBuf,
        /// Library name recorded in the manifest (default: directory name)
        #[arg(long)]
        library: Option<String>,
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Verify the external tools resolve and run
    Doctor {
        /// Do not require micromamba
        #[arg(long)]
        local_only: bool,
    },

    /// Write a default config file
    Init {
        #[arg(long, default_value = CONFIG_FILE)]
        path: PathBuf,
        #[arg(long)]
        force: bool,
    },
}

fn emit(text: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, text).with_context(|| format!("write {}", path.display()))?;
            info!(path = %path.display(), "report written");
        }
        None => print!("{text}"),
    }
    Ok(())
}

fn filter_regex(filter: Option<&str>) -> Result<Option<Regex>> {
    filter
        .map(|f| Regex::new(f).with_context(|| format!("invalid --filter {f:?}")))
        .transpose()
}

fn text_report(out: &OutputArgs) -> TextReport {
    TextReport { max_per_namespace: out.max_per_namespace, details: !out.summary_only }
}

/// Loads config, applies flags and checks the tools a scan of `specs` needs.
fn prepare_scanner(cfg_path: Option<&Path>, scan: &ScanArgs, specs: &[&PackageSpec]) -> Result<(Config, Scanner)> {
    let mut cfg = Config::load_or_default(cfg_path)?;
    scan.apply(&mut cfg);
    let need_conda = specs.iter().any(|s| s.channel.is_conda());
    require_tools(&cfg, need_conda)?;
    let scanner = Scanner::from_config(&cfg, scan.library_name.clone())?;
    Ok((cfg, scanner))
}

fn verdict_exit(verdict: Verdict, fail_on: FailOn) -> u8 {
    if fail_on == FailOn::None {
        return 0;
    }
    match verdict {
        Verdict::Error => 1,
        v if fail_on == FailOn::Breaking && v.is_incompatible() => v.exit_code() as u8,
        v if fail_on == FailOn::Any && v != Verdict::NoChange => v.exit_code() as u8,
        _ => 0,
    }
}

fn run(cli: Cli) -> Result<u8> {
    let cfg_path = cli.config.as_deref();
    match cli.cmd {
        Command::Compare { old, new, fail_on, scan, out } => {
            let old = PackageSpec::parse(&old, true)?;
            let new = PackageSpec::parse(&new, true)?;
            let (_, scanner) = prepare_scanner(cfg_path, &scan, &[&old, &new])?;
            let report = scanner.compare(&old, &new)?;
            let text = match out.format {
                Format::Json => to_json(&report)? + "\n",
                Format::Text => {
                    let demangler = &scanner.toolkit().demangler;
                    demangler.prefetch(mangled_names(&report.libraries));
                    text_report(&out).compare(&report, demangler)
                }
            };
            emit(&text, out.output.as_deref())?;
            Ok(verdict_exit(report.verdict, fail_on))
        }
        Command::Validate { spec, strict, filter, from_version, to_version, fail_on, scan, out } => {
            let spec = PackageSpec::parse(&spec, false)?;
            let (cfg, scanner) = prepare_scanner(cfg_path, &scan, &[&spec])?;
            let query = VersionQuery { filter: filter_regex(filter.as_deref())?, from: from_version, to: to_version };
            let report = scanner.validate(&spec, &query, Strictness::from_flag(strict || cfg.policy.strict))?;
            let text = match out.format {
                Format::Json => to_json(&report)? + "\n",
                Format::Text => text_report(&out).compliance(&report),
            };
            emit(&text, out.output.as_deref())?;
            let failing = fail_on == FailOnViolations::Violations && report.has_violations();
            Ok(if failing { 2 } else { 0 })
        }
        Command::Compatible { spec, filter, stop_at_first_break, fail_on, scan, out } => {
            let spec = PackageSpec::parse(&spec, true)?;
            let (_, scanner) = prepare_scanner(cfg_path, &scan, &[&spec])?;
            let filter = filter_regex(filter.as_deref())?;
            let result = scanner.compatible(&spec, filter.as_ref(), stop_at_first_break)?;
            let text = match out.format {
                Format::Json => to_json(&result)? + "\n",
                Format::Text => text_report(&out).compatible(&result),
            };
            emit(&text, out.output.as_deref())?;
            let failing = match fail_on {
                FailOn::Breaking => result.first_breaking.is_some(),
                FailOn::Any => result.any_change(),
                FailOn::None => false,
            };
            Ok(if failing { 8 } else { 0 })
        }
        Command::List { spec, filter, format } => {
            let spec = PackageSpec::parse(&spec, false)?;
            let cfg = Config::load_or_default(cfg_path)?;
            let options = ScanOptions::from_config(&cfg, None)?;
            let sorted = list_versions(&spec, &options.sources, filter_regex(filter.as_deref())?.as_ref())?;
            let text = match format {
                Format::Json => {
                    let versions: Vec<&str> = sorted.versions.iter().map(|v| v.as_str()).collect();
                    to_json(&versions)? + "\n"
                }
                Format::Text => TextReport::default().versions(&sorted),
            };
            emit(&text, None)?;
            Ok(0)
        }
        Command::Headers { dir, library, output } => {
            let library = match library {
                Some(l) => l,
                None => dir
                    .canonicalize()
                    .ok()
                    .and_then(|d| d.file_name().map(|n| n.to_string_lossy().into_owned()))
                    .unwrap_or_else(|| "unknown".to_string()),
            };
            let manifest = scan_headers(&dir, &library)?;
            let json = manifest.to_json_pretty().context("serialize manifest")? + "\n";
            eprintln!(
                "{} namespaces: {} public, {} private",
                manifest.namespaces.all.len(),
                manifest.namespaces.public.len(),
                manifest.namespaces.private.len()
            );
            emit(&json, output.as_deref())?;
            Ok(0)
        }
        Command::Doctor { local_only } => {
            let cfg = Config::load_or_default(cfg_path)?;
            let report = doctor(&cfg, !local_only);
            for c in &report.checks {
                let need = if c.required { "required" } else { "optional" };
                match &c.status {
                    ToolStatus::Ok { path, version } => {
                        println!("ok       {:<11} {} ({version})", c.name, path.display())
                    }
                    ToolStatus::Missing => println!("missing  {:<11} {} [{need}]", c.name, c.program),
                    ToolStatus::Broken { path, error } => {
                        println!("broken   {:<11} {} [{need}]: {error}", c.name, path.display())
                    }
                }
            }
            if report.is_ok() {
                println!("OK");
                Ok(0)
            } else {
                Ok(1)
            }
        }
        Command::Init { path, force } => {
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            Config::default_for_init().save_to(&path)?;
            println!("Wrote {}", path.display());
            Ok(0)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn exit_codes_follow_fail_on() {
        assert_eq!(verdict_exit(Verdict::Breaking, FailOn::None), 0);
        assert_eq!(verdict_exit(Verdict::Breaking, FailOn::Breaking), 12);
        assert_eq!(verdict_exit(Verdict::Incompatible, FailOn::Breaking), 8);
        assert_eq!(verdict_exit(Verdict::Compatible, FailOn::Breaking), 0);
        assert_eq!(verdict_exit(Verdict::Compatible, FailOn::Any), 4);
        assert_eq!(verdict_exit(Verdict::NoChange, FailOn::Any), 0);
        assert_eq!(verdict_exit(Verdict::Error, FailOn::Any), 1);
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "abi-scan",
            "compare",
            "conda-forge:dal=1.0",
            "conda-forge:dal=1.1",
            "--public-namespace",
            "oneapi::dal",
            "--no-fallback",
            "--track-experimental",
        ]);
        let Command::Compare { scan, .. } = cli.cmd else { panic!("expected compare") };
        let mut cfg = Config::default();
        scan.apply(&mut cfg);
        assert_eq!(cfg.policy.public_namespaces, vec!["oneapi::dal".to_string()]);
        assert!(!cfg.policy.fallback);
        assert!(cfg.policy.track_experimental);
        assert!(!cfg.policy.suppress_stdlib);
    }
}
