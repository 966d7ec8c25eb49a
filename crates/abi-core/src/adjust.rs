use std::fmt;

use serde::{Deserialize, Serialize};

use crate::delta::{ChangeCounts, ChangeType, SymbolDelta};
use crate::verdict::Verdict;

/// Mangled-name prefixes of standard library, LLVM, fmt and spdlog
/// instantiations that leak into exported symbol tables.
pub const STDLIB_PREFIXES: [&str; 11] = [
    "_ZNSt", "_ZSt", "_ZTI", "_ZTS", "_ZTSI", "_ZGV", "_ZGVZ", "_ZN4llvm", "_ZN3fmt", "_ZNK3fmt",
    "_ZN6spdlog",
];

pub const EXPERIMENTAL_SUFFIX: &str = "Exp";

pub fn is_stdlib_symbol(name: &str) -> bool {
    STDLIB_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Identifier a recorded symbol declares.
///
/// Linkage names come back unchanged. For a declaration such as
/// `function ze_result_t zeFooExp(int)` this is `zeFooExp`: the last token
/// before the parameter list.
pub fn declared_name(symbol: &str) -> &str {
    let head = match symbol.find('(') {
        Some(open) => &symbol[..open],
        None => symbol,
    };
    head.split_whitespace()
        .next_back()
        .map(|t| t.trim_start_matches(['*', '&']))
        .filter(|t| !t.is_empty())
        .unwrap_or(symbol)
}

/// Operator-selected downgrade rules.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanPolicy {
    #[serde(default)]
    pub suppress_stdlib: bool,
    #[serde(default)]
    pub track_experimental: bool,
}

/// One recorded change to a comparison's verdict or effective symbol lists.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Adjustment {
    StdlibSuppressed { symbols: Vec<String> },
    ExperimentalPromoted { removed: String, added: String },
    Downgraded { from: Verdict, to: Verdict, removed: usize, added: usize },
    SonameBump { old: String, new: String, from: Verdict },
    LibraryRemoved { library: String },
    LibraryAdded { library: String },
}

impl fmt::Display for Adjustment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Adjustment::StdlibSuppressed { symbols } => {
                write!(f, "suppressed {} standard library symbol(s)", symbols.len())
            }
            Adjustment::ExperimentalPromoted { removed, added } => {
                write!(f, "{removed} promoted to {added}")
            }
            Adjustment::Downgraded { from, to, removed, added } => write!(
                f,
                "downgraded {from} -> {to}: {removed} effective removal(s), {added} addition(s)"
            ),
            Adjustment::SonameBump { old, new, from } => {
                write!(f, "soname changed {old} -> {new} outside a major release (was {from})")
            }
            Adjustment::LibraryRemoved { library } => write!(f, "library {library} removed"),
            Adjustment::LibraryAdded { library } => write!(f, "library {library} added"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Adjusted {
    pub verdict: Verdict,
    pub adjustments: Vec<Adjustment>,
}

/// Applies the downgrade rules to a typed comparison.
///
/// Stdlib suppression runs first, then experimental promotion matching on
/// what is left. Standard library symbols are recorded whenever suppression
/// is enabled; the verdict itself is only re-evaluated for a raw `BREAKING`
/// and can only go down.
pub fn adjust(raw: Verdict, counts: &ChangeCounts, delta: &SymbolDelta, policy: &ScanPolicy) -> Adjusted {
    let mut adjustments = Vec::new();

    let mut removed = delta.public(ChangeType::Removed);
    let mut added = delta.public(ChangeType::Added);

    if policy.suppress_stdlib {
        let mut suppressed: Vec<String> = ChangeType::ALL
            .iter()
            .flat_map(|c| delta.public(*c))
            .filter(|n| is_stdlib_symbol(n))
            .map(str::to_string)
            .collect();
        suppressed.sort();
        suppressed.dedup();
        removed.retain(|n| !is_stdlib_symbol(n));
        added.retain(|n| !is_stdlib_symbol(n));
        if !suppressed.is_empty() {
            adjustments.push(Adjustment::StdlibSuppressed { symbols: suppressed });
        }
    }

    if raw != Verdict::Breaking {
        return Adjusted { verdict: raw, adjustments };
    }

    let mut effective_removals = removed.clone();
    let mut promoted = 0usize;
    if policy.track_experimental {
        for name in &removed {
            let experimental = declared_name(name);
            let Some(stable) = experimental.strip_suffix(EXPERIMENTAL_SUFFIX) else {
                continue;
            };
            if stable.is_empty() || !added.iter().any(|a| declared_name(a) == stable) {
                continue;
            }
            effective_removals.retain(|r| r != name);
            promoted += 1;
            adjustments.push(Adjustment::ExperimentalPromoted {
                removed: experimental.to_string(),
                added: stable.to_string(),
            });
        }
    }

    let mut removed_count = effective_removals.len();
    let mut added_count = added.len();
    if !policy.suppress_stdlib {
        // raw counters cover removals the section parser missed; recognized
        // promotions are netted out of them
        removed_count += (counts.total(ChangeType::Removed) as usize).saturating_sub(promoted);
        added_count += counts.total(ChangeType::Added) as usize;
    }

    if removed_count > 0 {
        return Adjusted { verdict: raw, adjustments };
    }

    let to = if added_count > 0 {
        Verdict::Compatible
    } else {
        Verdict::NoChange
    };
    adjustments.push(Adjustment::Downgraded {
        from: raw,
        to,
        removed: removed_count,
        added: added_count,
    });
    Adjusted { verdict: to, adjustments }
}
