use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::delta::{ChangeCounts, ChangeType, Surface, SymbolDelta};
use crate::filter::PublicApiFilter;
use crate::result::ComparisonResult;
use crate::symbol::SymbolKind;
use crate::verdict::Verdict;

/// `nm` kind letters of defined, exported symbols.
pub const EXPORTED_KINDS: [char; 8] = ['T', 'D', 'B', 'R', 'W', 'V', 'i', 'u'];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynSymbol {
    pub name: String,
    pub kind: char,
}

impl DynSymbol {
    pub fn symbol_kind(&self) -> SymbolKind {
        match self.kind {
            'T' | 'W' | 'i' => SymbolKind::Function,
            _ => SymbolKind::Variable,
        }
    }
}

/// Parses `nm -D --defined-only` style output (`[addr] kind name`), keeping
/// only whitelisted kinds.
pub fn parse_nm_output(text: &str) -> Vec<DynSymbol> {
    let mut out = Vec::new();
    for line in text.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let (kind, name) = match fields.as_slice() {
            [_addr, kind, name, ..] => (*kind, *name),
            [kind, name] => (*kind, *name),
            _ => continue,
        };
        let mut chars = kind.chars();
        let (Some(k), None) = (chars.next(), chars.next()) else {
            continue;
        };
        if EXPORTED_KINDS.contains(&k) {
            out.push(DynSymbol { name: name.to_string(), kind: k });
        }
    }
    out
}

/// Name-level comparison of two dynamic symbol tables.
///
/// Removed or kind-changed symbols make the result `BREAKING`; additions
/// alone make it `COMPATIBLE`. Lists hold bare names only.
pub fn compare_symbol_tables(
    old: &[DynSymbol],
    new: &[DynSymbol],
    old_filter: &PublicApiFilter,
    new_filter: &PublicApiFilter,
) -> ComparisonResult {
    let old_map = index(old);
    let new_map = index(new);

    let mut delta = SymbolDelta::default();
    let mut counts = ChangeCounts::default();

    for (name, sym) in &old_map {
        let (change, kind, filter) = match new_map.get(name) {
            None => (ChangeType::Removed, sym.symbol_kind(), old_filter),
            Some(n) if n.kind != sym.kind => (ChangeType::Changed, n.symbol_kind(), new_filter),
            Some(_) => continue,
        };
        if delta.record(kind, change, surface(filter, name), *name) {
            bump(&mut counts, kind, change);
        }
    }
    for (name, sym) in &new_map {
        if old_map.contains_key(name) {
            continue;
        }
        let kind = sym.symbol_kind();
        if delta.record(kind, ChangeType::Added, surface(new_filter, name), *name) {
            bump(&mut counts, kind, ChangeType::Added);
        }
    }

    let verdict = if counts.total(ChangeType::Removed) > 0 || counts.total(ChangeType::Changed) > 0 {
        Verdict::Breaking
    } else if counts.total(ChangeType::Added) > 0 {
        Verdict::Compatible
    } else {
        Verdict::NoChange
    };
    ComparisonResult::symbol_table(verdict, counts, delta)
}

fn index(symbols: &[DynSymbol]) -> BTreeMap<&str, &DynSymbol> {
    let mut map = BTreeMap::new();
    for s in symbols {
        map.entry(s.name.as_str()).or_insert(s);
    }
    map
}

fn bump(counts: &mut ChangeCounts, kind: SymbolKind, change: ChangeType) {
    let axis = match kind {
        SymbolKind::Function => &mut counts.functions,
        SymbolKind::Variable => &mut counts.variables,
    };
    match change {
        ChangeType::Removed => axis.removed += 1,
        ChangeType::Added => axis.added += 1,
        ChangeType::Changed => axis.changed += 1,
    }
}

fn surface(filter: &PublicApiFilter, name: &str) -> Surface {
    if filter.is_public(name) {
        Surface::Public
    } else {
        Surface::Private
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OLD: &str = "\
0000000000001130 T _ZN3foo3runEv
0000000000001140 T _ZN3foo4stopEv
0000000000004010 D foo_version
0000000000004020 B foo_counter
                 U malloc
0000000000001150 t local_helper
";

    const NEW: &str = "\
0000000000001130 T _ZN3foo3runEv
0000000000004010 R foo_version
0000000000004020 B foo_counter
0000000000001160 W _ZN3foo5startEv
";

    #[test]
    fn nm_output_keeps_exported_kinds_only() {
        let syms = parse_nm_output(OLD);
        let names: Vec<_> = syms.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["_ZN3foo3runEv", "_ZN3foo4stopEv", "foo_version", "foo_counter"]);
        assert_eq!(syms[0].symbol_kind(), SymbolKind::Function);
        assert_eq!(syms[2].symbol_kind(), SymbolKind::Variable);
    }

    #[test]
    fn removal_and_kind_change_are_breaking() {
        let f = PublicApiFilter::allow_all();
        let r = compare_symbol_tables(&parse_nm_output(OLD), &parse_nm_output(NEW), &f, &f);
        assert_eq!(r.verdict, Verdict::Breaking);
        assert!(r.is_fallback());
        assert_eq!(r.delta.functions.removed.public, vec!["_ZN3foo4stopEv".to_string()]);
        assert_eq!(r.delta.variables.changed.public, vec!["foo_version".to_string()]);
        assert_eq!(r.delta.functions.added.public, vec!["_ZN3foo5startEv".to_string()]);
        assert_eq!(r.counts.functions.removed, 1);
        assert_eq!(r.counts.variables.changed, 1);
        assert_eq!(r.counts.functions.added, 1);
    }

    #[test]
    fn additions_only_are_compatible() {
        let f = PublicApiFilter::allow_all();
        let old = parse_nm_output("0 T a\n");
        let new = parse_nm_output("0 T a\n0 T b\n");
        let r = compare_symbol_tables(&old, &new, &f, &f);
        assert_eq!(r.verdict, Verdict::Compatible);
        let same = compare_symbol_tables(&old, &old, &f, &f);
        assert_eq!(same.verdict, Verdict::NoChange);
    }

    #[test]
    fn fallback_lists_carry_bare_names() {
        let f = PublicApiFilter::allow_all();
        let r = compare_symbol_tables(&parse_nm_output("0 T _Z1fv\n"), &[], &f, &f);
        assert_eq!(r.public(ChangeType::Removed), vec!["_Z1fv"]);
        assert!(r.detail.is_empty());
        assert!(r.adjustments.is_empty());
    }
}
