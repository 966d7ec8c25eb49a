use abi_core::{TransitionKind, Verdict};

use crate::types::{Finding, Severity, Strictness, TransitionInput};

pub trait Rule: Send + Sync {
    fn id(&self) -> &str;
    fn eval(&self, input: &TransitionInput<'_>) -> Vec<Finding>;
}

/// Verdicts a transition of `kind` may carry.
pub fn allowed_verdicts(kind: TransitionKind, strictness: Strictness) -> &'static [Verdict] {
    const NONE_ONLY: &[Verdict] = &[Verdict::NoChange];
    const ADDITIVE: &[Verdict] = &[Verdict::NoChange, Verdict::Compatible];
    const ANY: &[Verdict] = &Verdict::ORDERED;

    match (kind, strictness) {
        (TransitionKind::Patch, Strictness::Strict) => NONE_ONLY,
        (TransitionKind::Patch, Strictness::Lenient) => ADDITIVE,
        (TransitionKind::Minor, _) => ADDITIVE,
        (TransitionKind::Major, _) => ANY,
    }
}

pub fn is_allowed(kind: TransitionKind, strictness: Strictness, verdict: Verdict) -> bool {
    allowed_verdicts(kind, strictness).contains(&verdict)
}

/// Fails a transition whose verdict exceeds what its version bump permits.
pub struct SemverTransitionRule {
    pub strictness: Strictness,
}

impl Rule for SemverTransitionRule {
    fn id(&self) -> &str {
        "semver_transition"
    }

    fn eval(&self, input: &TransitionInput<'_>) -> Vec<Finding> {
        let verdict = input.verdict();
        if is_allowed(input.kind, self.strictness, verdict) {
            return vec![];
        }
        vec![Finding {
            rule_id: self.id().to_string(),
            severity: Severity::Fail,
            message: format!(
                "{} -> {} is a {} release but the ABI verdict is {} ({} mode)",
                input.old_version,
                input.new_version,
                input.kind,
                verdict,
                self.strictness.as_str()
            ),
        }]
    }
}

/// Warns when a transition's verdict rests on symbol names only.
pub struct SymbolTableEvidenceRule;

impl Rule for SymbolTableEvidenceRule {
    fn id(&self) -> &str {
        "symbol_table_evidence"
    }

    fn eval(&self, input: &TransitionInput<'_>) -> Vec<Finding> {
        let fallback: Vec<&str> = input
            .comparison
            .iter()
            .filter(|e| e.result.is_fallback())
            .map(|e| e.base_name.as_str())
            .collect();
        if fallback.is_empty() {
            return vec![];
        }
        vec![Finding {
            rule_id: self.id().to_string(),
            severity: Severity::Warn,
            message: format!("symbol-table fallback (no type information) for {}", fallback.join(", ")),
        }]
    }
}

/// Warns when some libraries of a transition could not be compared.
pub struct PartialComparisonRule;

impl Rule for PartialComparisonRule {
    fn id(&self) -> &str {
        "partial_comparison"
    }

    fn eval(&self, input: &TransitionInput<'_>) -> Vec<Finding> {
        let failed: Vec<&str> = input
            .comparison
            .iter()
            .filter(|e| e.result.verdict == Verdict::Error)
            .map(|e| e.base_name.as_str())
            .collect();
        if failed.is_empty() {
            return vec![];
        }
        vec![Finding {
            rule_id: self.id().to_string(),
            severity: Severity::Warn,
            message: format!("not compared: {}", failed.join(", ")),
        }]
    }
}

pub fn default_rules(strictness: Strictness) -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(SemverTransitionRule { strictness }),
        Box::new(SymbolTableEvidenceRule),
        Box::new(PartialComparisonRule),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use abi_core::{
        ChangeCounts, ComparisonResult, LibraryComparison, LibraryComparisonSet, ParsedReport, ScanPolicy,
        SymbolDelta,
    };

    fn set_with(verdict: Verdict) -> LibraryComparisonSet {
        let mut result = ComparisonResult::typed(0, ParsedReport::default(), "", &ScanPolicy::default());
        result.verdict = verdict;
        LibraryComparisonSet::single(LibraryComparison::compared("libx.so", "libx.so.1", "libx.so.1", result))
    }

    fn input<'a>(kind: TransitionKind, set: &'a LibraryComparisonSet) -> TransitionInput<'a> {
        TransitionInput { old_version: "1.2.3", new_version: "1.2.4", kind, comparison: set }
    }

    #[test]
    fn test_rule_table() {
        use TransitionKind::*;
        use Verdict::*;
        assert!(is_allowed(Patch, Strictness::Lenient, Compatible));
        assert!(!is_allowed(Patch, Strictness::Strict, Compatible));
        assert!(is_allowed(Patch, Strictness::Strict, NoChange));
        assert!(is_allowed(Minor, Strictness::Strict, Compatible));
        assert!(!is_allowed(Minor, Strictness::Lenient, Incompatible));
        for v in Verdict::ORDERED {
            assert!(is_allowed(Major, Strictness::Strict, v));
        }
        assert!(!is_allowed(Major, Strictness::Lenient, Error));
    }

    #[test]
    fn test_semver_rule_flags_compatible_patch_in_strict_mode() {
        let set = set_with(Verdict::Compatible);
        let lenient = SemverTransitionRule { strictness: Strictness::Lenient };
        assert!(lenient.eval(&input(TransitionKind::Patch, &set)).is_empty());

        let strict = SemverTransitionRule { strictness: Strictness::Strict };
        let findings = strict.eval(&input(TransitionKind::Patch, &set));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Fail);
        assert_eq!(findings[0].rule_id, "semver_transition");
    }

    #[test]
    fn test_fallback_rule_warns() {
        let mut set = LibraryComparisonSet::default();
        set.insert(LibraryComparison::compared(
            "liby.so",
            "liby.so.1",
            "liby.so.1",
            ComparisonResult::symbol_table(Verdict::NoChange, ChangeCounts::default(), SymbolDelta::default()),
        ));
        let findings = SymbolTableEvidenceRule.eval(&input(TransitionKind::Minor, &set));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Warn);
        assert!(findings[0].message.contains("liby.so"));
    }
}
