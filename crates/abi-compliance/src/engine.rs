use abi_core::{LibraryComparisonSet, TransitionKind, Verdict, Version};

use crate::rule::{default_rules, Rule};
use crate::types::{
    ComplianceReport, ComplianceSummary, Severity, Strictness, TransitionInput, TransitionOutcome,
    TransitionStatus,
};

/// Folds a sorted version list into per-transition compliance outcomes.
///
/// Each adjacent pair is compared independently through the caller's
/// comparison function; an `Err` or an all-`ERROR` comparison is a skip.
pub struct ComplianceEngine {
    strictness: Strictness,
    rules: Vec<Box<dyn Rule>>,
}

impl ComplianceEngine {
    pub fn new(strictness: Strictness) -> Self {
        Self { strictness, rules: default_rules(strictness) }
    }

    pub fn with_rules(strictness: Strictness, rules: Vec<Box<dyn Rule>>) -> Self {
        Self { strictness, rules }
    }

    pub fn strictness(&self) -> Strictness {
        self.strictness
    }

    pub fn evaluate<F>(&self, package: &str, versions: &[Version], mut compare: F) -> ComplianceReport
    where
        F: FnMut(&Version, &Version, TransitionKind) -> Result<LibraryComparisonSet, String>,
    {
        let mut transitions = Vec::new();
        for pair in versions.windows(2) {
            let (old, new) = (&pair[0], &pair[1]);
            let kind = TransitionKind::classify(old, new);
            let outcome = match compare(old, new, kind) {
                Ok(set) => self.judge(old.as_str(), new.as_str(), kind, set),
                Err(reason) => TransitionOutcome::skipped(old.as_str(), new.as_str(), kind, reason),
            };
            transitions.push(outcome);
        }
        let summary = summarize(&transitions);
        ComplianceReport {
            package: package.to_string(),
            strictness: self.strictness,
            transitions,
            summary,
        }
    }

    /// Classifies one compared transition.
    ///
    /// A transition where some library could not be compared is skipped
    /// unless the libraries that were compared already violate a rule.
    pub fn judge(&self, old: &str, new: &str, kind: TransitionKind, set: LibraryComparisonSet) -> TransitionOutcome {
        if set.compared_verdict() == Verdict::Error {
            return TransitionOutcome::skipped(old, new, kind, failure_reason(&set));
        }

        let input = TransitionInput { old_version: old, new_version: new, kind, comparison: &set };
        let verdict = input.verdict();
        let findings: Vec<_> = self.rules.iter().flat_map(|r| r.eval(&input)).collect();
        let compliant = !findings.iter().any(|f| f.severity == Severity::Fail);

        if compliant && set.has_errors() {
            let mut outcome = TransitionOutcome::skipped(old, new, kind, failure_reason(&set));
            outcome.findings = findings;
            outcome.libraries = Some(set);
            return outcome;
        }

        TransitionOutcome {
            old_version: old.to_string(),
            new_version: new.to_string(),
            kind,
            status: if compliant {
                TransitionStatus::Compliant
            } else {
                TransitionStatus::Violation
            },
            verdict: Some(verdict),
            compliant: Some(compliant),
            skip_reason: None,
            findings,
            libraries: Some(set),
        }
    }
}

fn failure_reason(set: &LibraryComparisonSet) -> String {
    let failed: Vec<_> = set.failed().collect();
    let names: Vec<&str> = failed.iter().map(|e| e.base_name.as_str()).collect();
    let detail = failed
        .iter()
        .map(|e| e.result.detail.trim())
        .find(|d| !d.is_empty())
        .map(first_line);
    match (names.is_empty(), detail) {
        (true, _) => "comparison failed".to_string(),
        (false, Some(d)) => format!("comparison failed for {}: {d}", names.join(", ")),
        (false, None) => format!("comparison failed for {}", names.join(", ")),
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or(text)
}

pub fn summarize(transitions: &[TransitionOutcome]) -> ComplianceSummary {
    let count = |status: TransitionStatus| transitions.iter().filter(|t| t.status == status).count();
    let compliant = count(TransitionStatus::Compliant);
    let violations = count(TransitionStatus::Violation);
    ComplianceSummary {
        transitions: transitions.len(),
        compared: compliant + violations,
        compliant,
        violations,
        skipped: count(TransitionStatus::Skipped),
    }
}
