use abi_core::{LibraryComparisonSet, TransitionKind, Verdict};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    #[default]
    Lenient,
    Strict,
}

impl Strictness {
    pub fn from_flag(strict: bool) -> Self {
        if strict {
            Strictness::Strict
        } else {
            Strictness::Lenient
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Strictness::Lenient => "lenient",
            Strictness::Strict => "strict",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warn,
    Fail,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Finding {
    pub rule_id: String,
    pub severity: Severity,
    pub message: String,
}

/// What a rule sees of one compared transition.
#[derive(Clone, Debug)]
pub struct TransitionInput<'a> {
    pub old_version: &'a str,
    pub new_version: &'a str,
    pub kind: TransitionKind,
    pub comparison: &'a LibraryComparisonSet,
}

impl TransitionInput<'_> {
    /// Worst verdict among the libraries that were actually compared.
    pub fn verdict(&self) -> Verdict {
        self.comparison.compared_verdict()
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransitionStatus {
    Compliant,
    Violation,
    Skipped,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TransitionOutcome {
    pub old_version: String,
    pub new_version: String,
    pub kind: TransitionKind,
    pub status: TransitionStatus,
    /// `None` when skipped.
    pub verdict: Option<Verdict>,
    /// `None` when skipped; a skip is never counted as compliant.
    pub compliant: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<Finding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub libraries: Option<LibraryComparisonSet>,
}

impl TransitionOutcome {
    pub fn skipped(old_version: &str, new_version: &str, kind: TransitionKind, reason: impl Into<String>) -> Self {
        Self {
            old_version: old_version.to_string(),
            new_version: new_version.to_string(),
            kind,
            status: TransitionStatus::Skipped,
            verdict: None,
            compliant: None,
            skip_reason: Some(reason.into()),
            findings: Vec::new(),
            libraries: None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.libraries.as_ref().is_some_and(|l| l.any_fallback())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ComplianceSummary {
    pub transitions: usize,
    pub compared: usize,
    pub compliant: usize,
    pub violations: usize,
    pub skipped: usize,
}

impl ComplianceSummary {
    /// Whole-percent compliance over compared transitions; 0 when none were.
    pub fn percent(&self) -> u32 {
        if self.compared == 0 {
            0
        } else {
            (100 * self.compliant / self.compared) as u32
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ComplianceReport {
    pub package: String,
    pub strictness: Strictness,
    pub transitions: Vec<TransitionOutcome>,
    pub summary: ComplianceSummary,
}

impl ComplianceReport {
    pub fn violations(&self) -> impl Iterator<Item = &TransitionOutcome> {
        self.transitions
            .iter()
            .filter(|t| t.status == TransitionStatus::Violation)
    }

    pub fn has_violations(&self) -> bool {
        self.summary.violations > 0
    }
}
