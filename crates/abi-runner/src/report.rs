use std::fmt::Write as _;

use anyhow::{Context, Result};
use serde::Serialize;

use abi_compliance::{CompatibilityScan, ComplianceReport, TransitionStatus};
use abi_core::{
    looks_mangled, ChangeCounts, ChangeType, ComparisonMode, ComparisonResult, Demangler, LibraryComparisonSet,
    SortedVersions, Tier, Verdict,
};

use crate::scanner::CompareReport;

const FALLBACK_TAG: &str = "[symbol-table fallback: names only, no type information]";

pub fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("serialize report")
}

/// Every mangled public name in a result set, for batch demangling before
/// rendering.
pub fn mangled_names(set: &LibraryComparisonSet) -> Vec<&str> {
    set.iter()
        .flat_map(|e| ChangeType::ALL.into_iter().flat_map(move |c| e.result.public(c)))
        .filter(|n| looks_mangled(n))
        .collect()
}

fn summed_counts(set: &LibraryComparisonSet) -> ChangeCounts {
    let mut total = ChangeCounts::default();
    for e in set.iter() {
        let c = &e.result.counts;
        total.functions.removed += c.functions.removed;
        total.functions.changed += c.functions.changed;
        total.functions.added += c.functions.added;
        total.variables.removed += c.variables.removed;
        total.variables.changed += c.variables.changed;
        total.variables.added += c.variables.added;
    }
    total
}

fn counts_line(c: &ChangeCounts) -> String {
    format!(
        "functions -{} ~{} +{}, variables -{} ~{} +{}",
        c.functions.removed,
        c.functions.changed,
        c.functions.added,
        c.variables.removed,
        c.variables.changed,
        c.variables.added
    )
}

fn mode_label(r: &ComparisonResult) -> &'static str {
    match r.mode {
        ComparisonMode::Typed => "typed",
        ComparisonMode::SymbolTable => "symbols",
        ComparisonMode::LibraryPresence => "presence",
    }
}

fn change_label(change: ChangeType) -> &'static str {
    match change {
        ChangeType::Removed => "Removed",
        ChangeType::Added => "Added",
        ChangeType::Changed => "Changed",
    }
}

fn change_marker(change: ChangeType) -> char {
    match change {
        ChangeType::Removed => '-',
        ChangeType::Added => '+',
        ChangeType::Changed => '~',
    }
}

/// Text rendering settings.
#[derive(Clone, Copy, Debug)]
pub struct TextReport {
    /// Names shown per namespace; 0 shows all.
    pub max_per_namespace: usize,
    pub details: bool,
}

impl Default for TextReport {
    fn default() -> Self {
        Self { max_per_namespace: 5, details: true }
    }
}

impl TextReport {
    pub fn compare(&self, report: &CompareReport, demangler: &dyn Demangler) -> String {
        let mut out = String::new();
        let kind = report.kind.map(|k| format!(" ({k})")).unwrap_or_default();
        let _ = writeln!(out, "{} -> {}{kind}", report.old, report.new);
        out.push_str(&self.verdict_line(report.verdict, &report.libraries));
        out.push('\n');
        self.library_table(&mut out, &report.libraries);
        if self.details {
            for e in report.libraries.iter() {
                self.library_details(&mut out, &e.base_name, &e.result, demangler);
            }
        }
        out
    }

    fn verdict_line(&self, verdict: Verdict, set: &LibraryComparisonSet) -> String {
        let mut line = format!("Verdict: {verdict}  ({})", counts_line(&summed_counts(set)));
        if set.any_fallback() {
            line.push_str("  ");
            line.push_str(FALLBACK_TAG);
        }
        line
    }

    fn library_table(&self, out: &mut String, set: &LibraryComparisonSet) {
        if set.is_empty() {
            out.push_str("No libraries found on either side.\n");
            return;
        }
        let width = set.iter().map(|e| e.base_name.len()).max().unwrap_or(0).max(7);
        let _ = writeln!(out, "\n  {:<width$}  {:<13} {:<9} CHANGES", "LIBRARY", "VERDICT", "MODE");
        for e in set.iter() {
            let r = &e.result;
            let _ = writeln!(
                out,
                "  {:<width$}  {:<13} {:<9} {}",
                e.base_name,
                r.verdict.as_str(),
                mode_label(r),
                r.summary_line()
            );
        }
    }

    fn library_details(&self, out: &mut String, library: &str, r: &ComparisonResult, demangler: &dyn Demangler) {
        let mut body = String::new();
        for adj in &r.adjustments {
            let _ = writeln!(body, "  * {adj}");
        }
        if r.verdict == Verdict::Error && !r.detail.is_empty() {
            let _ = writeln!(body, "  error: {}", r.detail.trim());
        }
        for change in ChangeType::ALL {
            let groups = r.tiers(change, demangler);
            for tier in Tier::ALL {
                let by_ns = groups.tier(tier);
                if by_ns.is_empty() {
                    continue;
                }
                let _ = writeln!(body, "  {} ({}):", change_label(change), tier.as_str());
                for (ns, names) in by_ns {
                    let ns = if ns.is_empty() { "(global)" } else { ns.as_str() };
                    let _ = writeln!(body, "    [{ns}]");
                    let shown = if self.max_per_namespace == 0 {
                        names.len()
                    } else {
                        names.len().min(self.max_per_namespace)
                    };
                    for name in &names[..shown] {
                        let _ = writeln!(body, "      {} {name}", change_marker(change));
                    }
                    if shown < names.len() {
                        let _ = writeln!(body, "      ... and {} more", names.len() - shown);
                    }
                }
            }
        }
        let private: Vec<usize> = ChangeType::ALL.iter().map(|c| r.private(*c).len()).collect();
        if private.iter().any(|n| *n > 0) {
            let _ = writeln!(
                body,
                "  private: {} removed, {} added, {} changed (not counted)",
                private[0], private[1], private[2]
            );
        }
        if !body.is_empty() {
            let _ = writeln!(out, "\n{library}:");
            out.push_str(&body);
        }
    }

    pub fn compliance(&self, report: &ComplianceReport) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Compliance report: {}  [{}]", report.package, report.strictness.as_str());
        let _ = writeln!(out, "  {:<20} {:<20} {:<6} STATUS", "FROM", "TO", "KIND");
        for t in &report.transitions {
            let status = match (t.status, t.verdict) {
                (TransitionStatus::Skipped, _) => {
                    format!("SKIPPED ({})", t.skip_reason.as_deref().unwrap_or("not compared"))
                }
                (TransitionStatus::Violation, Some(v)) => format!("{v}  VIOLATION"),
                (_, Some(v)) => v.to_string(),
                (_, None) => "-".to_string(),
            };
            let tag = if t.is_fallback() { "  [fallback]" } else { "" };
            let _ = writeln!(out, "  {:<20} {:<20} {:<6} {status}{tag}", t.old_version, t.new_version, t.kind.as_str());
        }
        let s = &report.summary;
        let _ = writeln!(
            out,
            "\nCompliance: {}% ({}/{} compared transitions)",
            s.percent(),
            s.compliant,
            s.compared
        );
        if s.skipped > 0 {
            let _ = writeln!(out, "Skipped: {} (not counted)", s.skipped);
        }
        let violations: Vec<_> = report.violations().collect();
        if violations.is_empty() {
            out.push_str("No violations found.\n");
        } else {
            let _ = writeln!(out, "Violations ({}):", violations.len());
            for t in violations {
                let verdict = t.verdict.map(|v| v.to_string()).unwrap_or_default();
                let _ = writeln!(out, "  {} -> {} [{}] {verdict}", t.old_version, t.new_version, t.kind.as_str());
                for f in &t.findings {
                    let _ = writeln!(out, "    {}: {}", f.rule_id, f.message);
                }
            }
        }
        out
    }

    pub fn compatible(&self, scan: &CompatibilityScan) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Compatibility of {} with newer versions:", scan.base);
        for c in &scan.candidates {
            let status = match (c.verdict, &c.skip_reason) {
                (Some(v), _) => {
                    let counts = c.libraries.as_ref().map(|l| counts_line(&summed_counts(l))).unwrap_or_default();
                    format!("{v}  ({counts})")
                }
                (None, reason) => format!("SKIPPED ({})", reason.as_deref().unwrap_or("not compared")),
            };
            let _ = writeln!(out, "  {:<20} {:<6} {status}", c.version, c.kind.as_str());
        }
        match scan.last_compatible() {
            Some(last) => {
                let _ = writeln!(out, "\nCompatible range: {} .. {last}", scan.base);
            }
            None => out.push_str("\nNo newer compatible version.\n"),
        }
        if let Some(first) = &scan.first_breaking {
            let _ = writeln!(out, "First incompatible version: {first}");
        }
        if scan.stopped_early {
            out.push_str("Stopped at the first incompatible version.\n");
        }
        out
    }

    pub fn versions(&self, sorted: &SortedVersions) -> String {
        let mut out = String::new();
        for v in &sorted.versions {
            let _ = writeln!(out, "{v}");
        }
        if !sorted.rejected.is_empty() {
            let _ = writeln!(out, "# skipped unparseable: {}", sorted.rejected.join(", "));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abi_compliance::{ComplianceEngine, Strictness};
    use abi_core::{
        LibraryComparison, NoDemangle, ParsedReport, ScanPolicy, Surface, SymbolKind, TransitionKind, Version,
    };

    fn typed(exit: i32, added: &[&str], removed: &[&str]) -> ComparisonResult {
        let mut p = ParsedReport::default();
        for n in added {
            p.delta.record(SymbolKind::Function, ChangeType::Added, Surface::Public, *n);
        }
        for n in removed {
            p.delta.record(SymbolKind::Function, ChangeType::Removed, Surface::Public, *n);
        }
        p.counts.functions.added = added.len() as u32;
        p.counts.functions.removed = removed.len() as u32;
        ComparisonResult::typed(exit, p, "", &ScanPolicy::default())
    }

    fn report(set: LibraryComparisonSet) -> CompareReport {
        CompareReport {
            old: "local-tree:/t/dal=1.0.0".into(),
            new: "local-tree:/t/dal=1.1.0".into(),
            kind: Some(TransitionKind::Minor),
            verdict: set.verdict(),
            libraries: set,
        }
    }

    #[test]
    fn compare_text_groups_and_truncates() {
        let added: Vec<String> = (0..7).map(|i| format!("dal::f{i}()")).collect();
        let added: Vec<&str> = added.iter().map(String::as_str).collect();
        let set = LibraryComparisonSet::single(LibraryComparison::compared(
            "libdal",
            "libdal.so.1",
            "libdal.so.1",
            typed(4, &added, &[]),
        ));
        let text = TextReport { max_per_namespace: 3, details: true }.compare(&report(set), &NoDemangle);
        assert!(text.contains("Verdict: COMPATIBLE  (functions -0 ~0 +7"));
        assert!(text.contains("Added (public):"));
        assert!(text.contains("[dal]"));
        assert!(text.contains("... and 4 more"));
        assert!(!text.contains("fallback"));
    }

    #[test]
    fn fallback_is_tagged() {
        let fallback = ComparisonResult::symbol_table(Verdict::Breaking, ChangeCounts::default(), Default::default());
        let set = LibraryComparisonSet::single(LibraryComparison::compared("libdal", "libdal.so.1", "libdal.so.1", fallback));
        let text = TextReport::default().compare(&report(set), &NoDemangle);
        assert!(text.contains(FALLBACK_TAG));
        assert!(text.contains("symbols"));
    }

    #[test]
    fn compliance_text_shows_skips_and_percent() {
        let versions: Vec<Version> = ["1.0.0", "1.1.0", "1.2.0"].iter().map(|v| Version::parse(v).unwrap()).collect();
        let engine = ComplianceEngine::new(Strictness::Lenient);
        let r = engine.evaluate("dal", &versions, |old, _, _| {
            if old.as_str() == "1.0.0" {
                Ok(LibraryComparisonSet::single(LibraryComparison::compared(
                    "libdal",
                    "libdal.so.1",
                    "libdal.so.1",
                    typed(12, &[], &["dal::gone()"]),
                )))
            } else {
                Err("download failed".into())
            }
        });
        let text = TextReport::default().compliance(&r);
        assert!(text.contains("SKIPPED (download failed)"));
        assert!(text.contains("BREAKING  VIOLATION"));
        assert!(text.contains("Compliance: 0% (0/1 compared transitions)"));
        assert!(text.contains("Violations (1):"));
    }

    #[test]
    fn mangled_names_are_collected_for_prefetch() {
        let set = LibraryComparisonSet::single(LibraryComparison::compared(
            "libdal",
            "libdal.so.1",
            "libdal.so.1",
            typed(4, &["_ZN3dal1fEv", "plain_c_fn"], &[]),
        ));
        assert_eq!(mangled_names(&set), vec!["_ZN3dal1fEv"]);
    }
}
