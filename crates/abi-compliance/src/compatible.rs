use abi_core::{LibraryComparisonSet, TransitionKind, Verdict, Version};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CandidateOutcome {
    pub version: String,
    pub kind: TransitionKind,
    /// `None` when the candidate could not be compared.
    pub verdict: Option<Verdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub libraries: Option<LibraryComparisonSet>,
}

impl CandidateOutcome {
    /// Compatible means the verdict carries no "incompatible" bit.
    pub fn is_compatible(&self) -> bool {
        matches!(self.verdict, Some(v) if v != Verdict::Error && !v.is_incompatible())
    }

    pub fn is_incompatible(&self) -> bool {
        self.verdict.is_some_and(Verdict::is_incompatible)
    }
}

/// Base version compared against every newer candidate.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CompatibilityScan {
    pub base: String,
    pub candidates: Vec<CandidateOutcome>,
    pub compatible_versions: Vec<String>,
    pub first_breaking: Option<String>,
    /// True when the scan ended early at the first incompatible version.
    pub stopped_early: bool,
}

impl CompatibilityScan {
    pub fn last_compatible(&self) -> Option<&str> {
        self.compatible_versions.last().map(String::as_str)
    }

    pub fn any_change(&self) -> bool {
        self.candidates
            .iter()
            .any(|c| matches!(c.verdict, Some(v) if v != Verdict::NoChange && v != Verdict::Error))
    }
}

/// Compares `base` with each candidate newer than it, in ascending order.
pub fn scan_compatible<F>(
    base: &Version,
    candidates: &[Version],
    stop_at_first_break: bool,
    mut compare: F,
) -> CompatibilityScan
where
    F: FnMut(&Version, &Version, TransitionKind) -> Result<LibraryComparisonSet, String>,
{
    let mut newer: Vec<&Version> = candidates.iter().filter(|v| *v > base).collect();
    newer.sort();
    newer.dedup();

    let mut scan = CompatibilityScan {
        base: base.as_str().to_string(),
        candidates: Vec::new(),
        compatible_versions: Vec::new(),
        first_breaking: None,
        stopped_early: false,
    };

    for candidate in newer {
        let kind = TransitionKind::classify(base, candidate);
        let outcome = match compare(base, candidate, kind) {
            Ok(set) if set.verdict() != Verdict::Error => CandidateOutcome {
                version: candidate.as_str().to_string(),
                kind,
                verdict: Some(set.verdict()),
                skip_reason: None,
                libraries: Some(set),
            },
            Ok(set) => {
                let failed: Vec<&str> = set.failed().map(|e| e.base_name.as_str()).collect();
                let reason = if failed.is_empty() {
                    "comparison failed".to_string()
                } else {
                    format!("comparison failed for {}", failed.join(", "))
                };
                let mut outcome = skipped(candidate, kind, reason);
                outcome.libraries = Some(set);
                outcome
            }
            Err(reason) => skipped(candidate, kind, reason),
        };

        if outcome.is_compatible() {
            scan.compatible_versions.push(outcome.version.clone());
        }
        let incompatible = outcome.is_incompatible();
        if incompatible && scan.first_breaking.is_none() {
            scan.first_breaking = Some(outcome.version.clone());
        }
        scan.candidates.push(outcome);
        if incompatible && stop_at_first_break {
            scan.stopped_early = true;
            break;
        }
    }
    scan
}

fn skipped(candidate: &Version, kind: TransitionKind, reason: String) -> CandidateOutcome {
    CandidateOutcome {
        version: candidate.as_str().to_string(),
        kind,
        verdict: None,
        skip_reason: Some(reason),
        libraries: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abi_core::{sort_versions, ComparisonResult, LibraryComparison, ParsedReport, ScanPolicy};

    fn set_with(verdict: Verdict) -> LibraryComparisonSet {
        let mut result = ComparisonResult::typed(0, ParsedReport::default(), "", &ScanPolicy::default());
        result.verdict = verdict;
        LibraryComparisonSet::single(LibraryComparison::compared("libx.so", "libx.so.1", "libx.so.1", result))
    }

    fn verdict_for(v: &str) -> Result<LibraryComparisonSet, String> {
        match v {
            "1.1" => Ok(set_with(Verdict::Compatible)),
            "1.2" => Err("download failed".to_string()),
            "2.0" => Ok(set_with(Verdict::Breaking)),
            _ => Ok(set_with(Verdict::NoChange)),
        }
    }

    #[test]
    fn test_scan_reports_range_and_first_break() {
        let all = sort_versions(["0.9", "1.0", "1.1", "1.2", "2.0", "2.1"]).versions;
        let base = Version::parse("1.0").unwrap();
        let scan = scan_compatible(&base, &all, false, |_, new, _| verdict_for(new.as_str()));

        let checked: Vec<_> = scan.candidates.iter().map(|c| c.version.as_str()).collect();
        assert_eq!(checked, vec!["1.1", "1.2", "2.0", "2.1"]);
        assert_eq!(scan.compatible_versions, vec!["1.1".to_string(), "2.1".to_string()]);
        assert_eq!(scan.first_breaking.as_deref(), Some("2.0"));
        assert_eq!(scan.candidates[1].skip_reason.as_deref(), Some("download failed"));
        assert!(!scan.stopped_early);
        assert!(scan.any_change());
    }

    #[test]
    fn test_scan_stops_at_first_break() {
        let all = sort_versions(["1.0", "1.1", "2.0", "2.1"]).versions;
        let base = Version::parse("1.0").unwrap();
        let scan = scan_compatible(&base, &all, true, |_, new, _| verdict_for(new.as_str()));
        assert_eq!(scan.candidates.len(), 2);
        assert!(scan.stopped_early);
        assert_eq!(scan.last_compatible(), Some("1.1"));
    }

    #[test]
    fn test_partially_compared_candidate_is_not_compatible() {
        let all = sort_versions(["1.0", "1.1"]).versions;
        let base = Version::parse("1.0").unwrap();
        let scan = scan_compatible(&base, &all, false, |_, _, _| {
            let mut set = set_with(Verdict::NoChange);
            set.insert(LibraryComparison::compared("liby.so", "liby.so.1", "liby.so.1", ComparisonResult::error(139, "crashed")));
            Ok(set)
        });
        assert!(scan.compatible_versions.is_empty());
        assert_eq!(scan.candidates[0].verdict, None);
        assert_eq!(scan.candidates[0].skip_reason.as_deref(), Some("comparison failed for liby.so"));
    }

    #[test]
    fn test_no_newer_versions() {
        let all = sort_versions(["0.1", "1.0"]).versions;
        let base = Version::parse("1.0").unwrap();
        let scan = scan_compatible(&base, &all, false, |_, _, _| Err("unused".into()));
        assert!(scan.candidates.is_empty());
        assert!(scan.first_breaking.is_none());
    }
}
