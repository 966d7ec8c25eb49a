use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Serialize;
use tracing::warn;

use abi_tools::{resolve_program, tool_version};

use crate::Config;

const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ToolStatus {
    Ok { path: PathBuf, version: String },
    Missing,
    /// Resolves but does not answer `--version`.
    Broken { path: PathBuf, error: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ToolCheck {
    pub name: &'static str,
    pub program: String,
    pub required: bool,
    pub status: ToolStatus,
}

impl ToolCheck {
    pub fn is_ok(&self) -> bool {
        matches!(self.status, ToolStatus::Ok { .. })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DoctorReport {
    pub checks: Vec<ToolCheck>,
}

impl DoctorReport {
    pub fn is_ok(&self) -> bool {
        self.checks.iter().all(|c| !c.required || c.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ToolCheck> {
        self.checks.iter().filter(|c| c.required && !c.is_ok())
    }
}

fn check(name: &'static str, program: &str, required: bool) -> ToolCheck {
    let status = match resolve_program(program) {
        None => ToolStatus::Missing,
        Some(path) => match tool_version(&path, VERSION_TIMEOUT) {
            Ok(version) => ToolStatus::Ok { path, version },
            Err(e) => ToolStatus::Broken { path, error: e.to_string() },
        },
    };
    ToolCheck { name, program: program.to_string(), required, status }
}

/// Checks every configured tool. `need_conda` makes `micromamba` required.
pub fn doctor(cfg: &Config, need_conda: bool) -> DoctorReport {
    let t = &cfg.tools;
    let checks = vec![
        check("abidw", &t.abidw, true),
        check("abidiff", &t.abidiff, true),
        check("nm", &t.nm, false),
        check("c++filt", &t.cxxfilt, false),
        check("micromamba", &t.micromamba, need_conda),
    ];
    let report = DoctorReport { checks };
    for c in report.checks.iter().filter(|c| !c.required && !c.is_ok()) {
        warn!(tool = c.name, program = %c.program, "optional tool unavailable");
    }
    report
}

/// Fails with one message listing every missing required tool.
pub fn require_tools(cfg: &Config, need_conda: bool) -> Result<DoctorReport> {
    let report = doctor(cfg, need_conda);
    if report.is_ok() {
        return Ok(report);
    }
    let lines: Vec<String> = report
        .failures()
        .map(|c| match &c.status {
            ToolStatus::Broken { error, .. } => format!("{} ({}) does not run: {}", c.name, c.program, error),
            _ => format!("{} not found on PATH (configured as {:?})", c.name, c.program),
        })
        .collect();
    Err(anyhow!("required tools unavailable:\n  {}", lines.join("\n  ")))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn tool(dir: &std::path::Path, name: &str, body: &str) -> String {
        let p = dir.join(name);
        fs::write(&p, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&p, fs::Permissions::from_mode(0o755)).unwrap();
        p.display().to_string()
    }

    #[test]
    fn reports_missing_and_broken_tools() {
        let dir = tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.tools.abidw = tool(dir.path(), "abidw", "echo 'abidw: 2.5.0'");
        cfg.tools.abidiff = tool(dir.path(), "abidiff", "exit 3");
        cfg.tools.nm = "/nonexistent/nm".into();
        cfg.tools.cxxfilt = "/nonexistent/c++filt".into();
        cfg.tools.micromamba = "/nonexistent/micromamba".into();

        let report = doctor(&cfg, false);
        assert!(!report.is_ok());
        let failing: Vec<_> = report.failures().map(|c| c.name).collect();
        assert_eq!(failing, vec!["abidiff"]);
        assert!(matches!(&report.checks[0].status, ToolStatus::Ok { version, .. } if version == "abidw: 2.5.0"));

        let err = require_tools(&cfg, true).unwrap_err().to_string();
        assert!(err.contains("abidiff"));
        assert!(err.contains("micromamba not found"));
    }

    #[test]
    fn passes_with_required_tools() {
        let dir = tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.tools.abidw = tool(dir.path(), "abidw", "echo abidw 2.5");
        cfg.tools.abidiff = tool(dir.path(), "abidiff", "echo abidiff 2.5");
        cfg.tools.nm = "/nonexistent/nm".into();
        cfg.tools.cxxfilt = "/nonexistent/c++filt".into();
        cfg.tools.micromamba = "/nonexistent/micromamba".into();
        assert!(require_tools(&cfg, false).is_ok());
    }
}
