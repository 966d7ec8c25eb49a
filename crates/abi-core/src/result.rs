use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::adjust::{adjust, Adjustment, ScanPolicy};
use crate::classify::TierGroups;
use crate::delta::{ChangeCounts, ChangeType, SymbolDelta};
use crate::parse::ParsedReport;
use crate::symbol::{Demangler, Symbol, SymbolKind};
use crate::verdict::Verdict;

/// How a comparison result was obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonMode {
    /// Type-aware differ over generated baselines.
    Typed,
    /// Dynamic symbol table diff; names only, no type information.
    SymbolTable,
    /// The library exists on one side only.
    LibraryPresence,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub verdict: Verdict,
    pub raw_verdict: Verdict,
    pub exit_code: i32,
    pub mode: ComparisonMode,
    /// Always serialized so no consumer mistakes a symbol-table diff for a
    /// typed one.
    pub fallback: bool,
    pub counts: ChangeCounts,
    pub delta: SymbolDelta,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub adjustments: Vec<Adjustment>,
    /// Raw tool text kept for detail rendering.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

impl ComparisonResult {
    /// Result of a typed comparison, with downgrade rules applied.
    pub fn typed(exit_code: i32, parsed: ParsedReport, detail: impl Into<String>, policy: &ScanPolicy) -> Self {
        let raw = Verdict::from_exit_code(exit_code);
        let adjusted = adjust(raw, &parsed.counts, &parsed.delta, policy);
        Self {
            verdict: adjusted.verdict,
            raw_verdict: raw,
            exit_code,
            mode: ComparisonMode::Typed,
            fallback: false,
            counts: parsed.counts,
            delta: parsed.delta,
            adjustments: adjusted.adjustments,
            detail: detail.into(),
        }
    }

    pub fn symbol_table(verdict: Verdict, counts: ChangeCounts, delta: SymbolDelta) -> Self {
        Self {
            verdict,
            raw_verdict: verdict,
            exit_code: verdict.exit_code(),
            mode: ComparisonMode::SymbolTable,
            fallback: true,
            counts,
            delta,
            adjustments: Vec::new(),
            detail: String::new(),
        }
    }

    /// Result imposed by library presence rather than by a comparison.
    pub fn forced(verdict: Verdict, adjustment: Adjustment) -> Self {
        Self {
            verdict,
            raw_verdict: verdict,
            exit_code: verdict.exit_code(),
            mode: ComparisonMode::LibraryPresence,
            fallback: false,
            counts: ChangeCounts::default(),
            delta: SymbolDelta::default(),
            adjustments: vec![adjustment],
            detail: String::new(),
        }
    }

    /// The comparison could not run at all.
    pub fn error(exit_code: i32, detail: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Error,
            raw_verdict: Verdict::Error,
            exit_code,
            mode: ComparisonMode::Typed,
            fallback: false,
            counts: ChangeCounts::default(),
            delta: SymbolDelta::default(),
            adjustments: Vec::new(),
            detail: detail.into(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    /// Raises the verdict (never lowers it) and records why.
    pub fn escalate(&mut self, to: Verdict, adjustment: Adjustment) {
        if self.verdict == Verdict::Error || to.rank() > self.verdict.rank() {
            self.verdict = to;
        }
        self.adjustments.push(adjustment);
    }

    fn suppressed(&self) -> BTreeSet<&str> {
        self.adjustments
            .iter()
            .filter_map(|a| match a {
                Adjustment::StdlibSuppressed { symbols } => Some(symbols),
                _ => None,
            })
            .flatten()
            .map(String::as_str)
            .collect()
    }

    /// Public names of one change type after suppression.
    pub fn public(&self, change: ChangeType) -> Vec<&str> {
        let suppressed = self.suppressed();
        self.delta
            .public(change)
            .into_iter()
            .filter(|n| !suppressed.contains(n))
            .collect()
    }

    pub fn private(&self, change: ChangeType) -> Vec<&str> {
        self.delta.private(change)
    }

    /// Effective public names grouped by tier and namespace.
    pub fn tiers(&self, change: ChangeType, demangler: &dyn Demangler) -> TierGroups {
        let suppressed = self.suppressed();
        let mut symbols = Vec::new();
        for kind in SymbolKind::ALL {
            for name in &self.delta.axis(kind).get(change).public {
                if !suppressed.contains(name.as_str()) {
                    symbols.push(Symbol::classify(name, kind, demangler));
                }
            }
        }
        TierGroups::from_symbols(&symbols)
    }

    /// One-line counter summary, e.g. `functions -1 ~0 +2, variables -0 ~0 +0`.
    pub fn summary_line(&self) -> String {
        let f = &self.counts.functions;
        let v = &self.counts.variables;
        format!(
            "functions -{} ~{} +{}, variables -{} ~{} +{}",
            f.removed, f.changed, f.added, v.removed, v.changed, v.added
        )
    }
}
