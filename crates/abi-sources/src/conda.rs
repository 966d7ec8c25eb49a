use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use abi_tools::{ToolCommand, ToolError};

use crate::discover::{find_headers_dir, find_libraries, LibraryMatcher};
use crate::source::{Materialized, PackageSource, SourceSettings};

#[derive(Debug, Default, Deserialize)]
struct SearchOutput {
    #[serde(default)]
    result: SearchResult,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResult {
    #[serde(default)]
    pkgs: Vec<SearchPackage>,
}

#[derive(Debug, Deserialize)]
struct SearchPackage {
    version: String,
}

/// Versions in a `micromamba search --json` document, deduplicated.
pub fn parse_search_output(json: &str) -> Result<Vec<String>> {
    let out: SearchOutput = serde_json::from_str(json).context("parse micromamba search output")?;
    let unique: BTreeSet<String> = out.result.pkgs.into_iter().map(|p| p.version).collect();
    Ok(unique.into_iter().collect())
}

fn is_not_found(stderr: &str) -> bool {
    stderr.contains("PackagesNotFoundError") || stderr.to_lowercase().contains("nothing provides")
}

/// Conda channel accessed through `micromamba`.
#[derive(Clone, Debug)]
pub struct CondaSource {
    channel: String,
    micromamba: PathBuf,
    search_timeout: Duration,
    install_timeout: Duration,
    matcher: LibraryMatcher,
}

impl CondaSource {
    pub fn new(channel: &str, settings: &SourceSettings) -> Self {
        Self {
            channel: channel.to_string(),
            micromamba: PathBuf::from(&settings.micromamba),
            search_timeout: settings.search_timeout,
            install_timeout: settings.install_timeout,
            matcher: settings.matcher.clone(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl PackageSource for CondaSource {
    fn list_versions(&self, package: &str) -> Result<Vec<String>> {
        let out = ToolCommand::new(&self.micromamba)
            .args(["search", "-c", self.channel.as_str(), package, "--json"])
            .timeout(self.search_timeout)
            .run()
            .with_context(|| format!("search {}:{}", self.channel, package))?;

        if !out.success() {
            if is_not_found(&out.stderr) {
                debug!(channel = %self.channel, package, "package not on channel");
                return Ok(Vec::new());
            }
            let tail: String = {
                let s = out.stderr.trim();
                let start = s.char_indices().rev().nth(299).map_or(0, |(i, _)| i);
                s[start..].to_string()
            };
            bail!("micromamba search failed ({}): {}", out.status_text(), tail);
        }
        parse_search_output(&out.stdout)
    }

    fn materialize(&self, package: &str, version: &str, work_dir: &Path) -> Result<Materialized> {
        let env = work_dir.join("env");
        info!(channel = %self.channel, package, version, "creating environment");
        ToolCommand::new(&self.micromamba)
            .arg("create")
            .arg("-y")
            .arg("-p")
            .arg(&env)
            .args(["-c", self.channel.as_str()])
            .arg(format!("{package}={version}"))
            .timeout(self.install_timeout)
            .run_checked()
            .map_err(|e| match e {
                ToolError::Failed { stderr, .. } if is_not_found(&stderr) => {
                    anyhow!("{}:{}={} is not available", self.channel, package, version)
                }
                other => anyhow::Error::new(other),
            })
            .with_context(|| format!("install {}:{}={}", self.channel, package, version))?;

        let libraries = find_libraries(&env, package, &self.matcher);
        if libraries.is_empty() {
            bail!("no library for {package} found in {}", env.display());
        }
        Ok(Materialized { headers_dir: find_headers_dir(&env), root: env, libraries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_search_json() {
        let json = r#"{"result": {"msg": "", "pkgs": [
            {"name": "dal", "version": "2025.9.0", "build": "h1"},
            {"name": "dal", "version": "2025.10.0", "build": "h1"},
            {"name": "dal", "version": "2025.9.0", "build": "h2"}
        ], "status": "OK"}}"#;
        assert_eq!(parse_search_output(json).unwrap(), vec!["2025.10.0", "2025.9.0"]);
        assert!(parse_search_output("{}").unwrap().is_empty());
        assert!(parse_search_output("not json").is_err());
    }

    #[test]
    fn recognizes_not_found() {
        assert!(is_not_found("critical libmamba PackagesNotFoundError: dal"));
        assert!(is_not_found("Nothing provides requested package"));
        assert!(!is_not_found("network unreachable"));
    }
}
