//! Heuristic classification of demangled C++ names.
//!
//! This works on demangled text, not on a demangler AST. The rules are
//! deliberately simple and pinned by tests:
//! - template argument lists are removed with a depth counter, so nested
//!   `<...>` disappear in one pass;
//! - parameter lists are removed with a single non-nested `(...)` strip;
//! - a scope component that carried template arguments names a class
//!   template, so namespace accumulation stops before it;
//! - namespace accumulation also stops at a private marker component and
//!   is capped at two components.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::symbol::{Symbol, Tier};

pub const GLOBAL_NAMESPACE: &str = "(global)";

const MAX_NAMESPACE_COMPONENTS: usize = 2;

/// Scope components that end namespace accumulation.
pub const PRIVATE_SCOPE_MARKERS: [&str; 8] = [
    "detail",
    "internal",
    "backend",
    "impl",
    "v1",
    "v2",
    "interface1",
    "interface2",
];

const INTERNAL_TIER_MARKERS: [&str; 4] = ["::detail::", "::internal::", "::backend::", "::impl::"];
const PREVIEW_TIER_MARKERS: [&str; 3] = ["::preview::", "::experimental::", "::unstable::"];

// Stands in for a removed template argument list until components are split.
const TEMPLATE_MARK: char = '\u{1}';

pub fn looks_mangled(name: &str) -> bool {
    name.starts_with("_Z")
}

/// Namespace of a demangled name: at most two leading scope components, or
/// `(global)`.
///
/// A bare scope written with a trailing separator (`a::b::`) maps to itself,
/// so `extract_namespace(&format!("{ns}::"))` is a fixed point for every
/// namespace this function returns.
pub fn extract_namespace(demangled: &str) -> String {
    if demangled == GLOBAL_NAMESPACE {
        return GLOBAL_NAMESPACE.to_string();
    }
    let masked = mask_operator_tokens(demangled);
    let without_templates = strip_template_args(&masked);
    let stripped = strip_parameter_lists(&without_templates);

    let mut parts: Vec<&str> = stripped.split("::").collect();
    if parts.len() <= 1 {
        return GLOBAL_NAMESPACE.to_string();
    }
    // Return types precede the qualified name for template functions.
    if let Some(first) = parts.first().copied() {
        if let Some(idx) = first.rfind(' ') {
            parts[0] = &first[idx + 1..];
        }
    }

    let mut components = Vec::new();
    for part in &parts[..parts.len() - 1] {
        let part = part.trim();
        if part.is_empty() || part.contains(TEMPLATE_MARK) {
            break;
        }
        if PRIVATE_SCOPE_MARKERS.contains(&part) {
            break;
        }
        components.push(part);
        if components.len() == MAX_NAMESPACE_COMPONENTS {
            break;
        }
    }

    if components.is_empty() {
        GLOBAL_NAMESPACE.to_string()
    } else {
        components.join("::")
    }
}

pub fn classify_tier(demangled: &str) -> Tier {
    let lower = demangled.to_lowercase();
    if INTERNAL_TIER_MARKERS.iter().any(|m| lower.contains(m)) {
        Tier::Internal
    } else if PREVIEW_TIER_MARKERS.iter().any(|m| lower.contains(m)) {
        Tier::Preview
    } else {
        Tier::Public
    }
}

/// Removes `<...>` runs, tracking depth so nested lists go in one pass.
/// A stray `>` at depth zero is dropped.
fn strip_template_args(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut depth = 0usize;
    for c in name.chars() {
        match c {
            '<' => {
                if depth == 0 {
                    out.push(TEMPLATE_MARK);
                }
                depth += 1;
            }
            '>' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

/// Removes every `(` up to the next `)`, non-nested.
fn strip_parameter_lists(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut rest = name;
    while let Some(open) = rest.find('(') {
        match rest[open..].find(')') {
            Some(close) => {
                out.push_str(&rest[..open]);
                rest = &rest[open + close + 1..];
            }
            None => break,
        }
    }
    out.push_str(rest);
    out
}

/// Replaces the symbol characters of operator names (`operator<`,
/// `operator->`, `operator()` ...) so they do not look like template or
/// parameter brackets.
fn mask_operator_tokens(name: &str) -> String {
    const KEYWORD: &str = "operator";
    const OPERATOR_CHARS: &str = "<>=!+-*/%^&|~[],";

    let mut out = String::with_capacity(name.len());
    let mut rest = name;
    while let Some(idx) = rest.find(KEYWORD) {
        let at_boundary = rest[..idx]
            .chars()
            .next_back()
            .map_or(true, |c| c == ':' || c == ' ');
        let (head, tail) = rest.split_at(idx + KEYWORD.len());
        out.push_str(head);
        rest = tail;
        if !at_boundary {
            continue;
        }
        if let Some(after) = rest.strip_prefix("()") {
            out.push_str("_call");
            rest = after;
        }
        let op_len = rest
            .char_indices()
            .find(|(_, c)| !OPERATOR_CHARS.contains(*c))
            .map_or(rest.len(), |(i, _)| i);
        if op_len > 0 {
            out.push_str("_op");
            rest = &rest[op_len..];
        }
    }
    out.push_str(rest);
    out
}

/// Symbols grouped by tier, then by namespace, in name order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierGroups {
    pub public: BTreeMap<String, Vec<String>>,
    pub preview: BTreeMap<String, Vec<String>>,
    pub internal: BTreeMap<String, Vec<String>>,
}

impl TierGroups {
    pub fn from_symbols<'a>(symbols: impl IntoIterator<Item = &'a Symbol>) -> Self {
        let mut groups = TierGroups::default();
        for symbol in symbols {
            groups
                .tier_mut(symbol.tier)
                .entry(symbol.namespace.clone())
                .or_default()
                .push(symbol.demangled.clone());
        }
        for tier in Tier::ALL {
            for names in groups.tier_mut(tier).values_mut() {
                names.sort();
                names.dedup();
            }
        }
        groups
    }

    pub fn tier(&self, tier: Tier) -> &BTreeMap<String, Vec<String>> {
        match tier {
            Tier::Public => &self.public,
            Tier::Preview => &self.preview,
            Tier::Internal => &self.internal,
        }
    }

    fn tier_mut(&mut self, tier: Tier) -> &mut BTreeMap<String, Vec<String>> {
        match tier {
            Tier::Public => &mut self.public,
            Tier::Preview => &mut self.preview,
            Tier::Internal => &mut self.internal,
        }
    }

    pub fn count(&self, tier: Tier) -> usize {
        self.tier(tier).values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        Tier::ALL.iter().all(|t| self.tier(*t).is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::{NoDemangle, SymbolKind};

    #[test]
    fn nested_templates_are_removed_in_one_pass() {
        assert_eq!(extract_namespace("ns::Tmpl<a::b<c>>::method(int, a::b)"), "ns");
        assert_eq!(
            extract_namespace("std::vector<std::pair<int, std::map<int, int>>>::push_back(int const&)"),
            "std"
        );
    }

    #[test]
    fn caps_at_two_components() {
        assert_eq!(
            extract_namespace("daal::algorithms::covariance::Batch::compute()"),
            "daal::algorithms"
        );
        assert_eq!(extract_namespace("oneapi::dal::train()"), "oneapi::dal");
    }

    #[test]
    fn stops_before_private_marker() {
        assert_eq!(extract_namespace("oneapi::detail::foo()"), "oneapi");
        assert_eq!(extract_namespace("daal::v1::Model::get()"), "daal");
        assert_eq!(extract_namespace("detail::helper()"), GLOBAL_NAMESPACE);
        assert_eq!(extract_namespace("sycl::interface1::queue::submit()"), "sycl");
    }

    #[test]
    fn global_when_unqualified() {
        assert_eq!(extract_namespace("mkl_sgemm"), GLOBAL_NAMESPACE);
        assert_eq!(extract_namespace("foo(int)"), GLOBAL_NAMESPACE);
        assert_eq!(extract_namespace(""), GLOBAL_NAMESPACE);
    }

    #[test]
    fn operator_names_do_not_open_brackets() {
        assert_eq!(extract_namespace("ns::Foo::operator<(ns::Foo const&) const"), "ns::Foo");
        assert_eq!(extract_namespace("ns::operator<<(std::ostream&, ns::Bar const&)"), "ns");
        assert_eq!(extract_namespace("ns::Fn::operator()(int)"), "ns::Fn");
        assert_eq!(extract_namespace("ns::Ptr::operator->() const"), "ns::Ptr");
    }

    #[test]
    fn return_type_prefix_is_ignored() {
        assert_eq!(extract_namespace("int ns::make<int>(int)"), "ns");
        assert_eq!(extract_namespace("void oneapi::dal::run<float>()"), "oneapi::dal");
    }

    #[test]
    fn namespace_output_is_a_fixed_point() {
        let inputs = [
            "ns::Tmpl<a::b<c>>::method(args)",
            "daal::algorithms::covariance::Batch::compute()",
            "oneapi::detail::foo()",
            "mkl_sgemm",
        ];
        for input in inputs {
            let ns = extract_namespace(input);
            if ns == GLOBAL_NAMESPACE {
                assert_eq!(extract_namespace(&ns), ns);
            } else {
                assert_eq!(extract_namespace(&format!("{ns}::")), ns);
                assert_eq!(extract_namespace(&format!("{ns}::entity()")), ns);
            }
        }
    }

    #[test]
    fn tiers_by_marker() {
        assert_eq!(classify_tier("oneapi::dal::detail::foo()"), Tier::Internal);
        assert_eq!(classify_tier("ns::IMPL::x"), Tier::Internal);
        assert_eq!(classify_tier("sycl::ext::oneapi::experimental::bar()"), Tier::Preview);
        assert_eq!(classify_tier("ns::preview::x"), Tier::Preview);
        assert_eq!(classify_tier("oneapi::dal::train()"), Tier::Public);
        // internal wins over preview
        assert_eq!(classify_tier("ns::experimental::detail::x"), Tier::Internal);
    }

    #[test]
    fn groups_by_tier_and_namespace() {
        let symbols: Vec<Symbol> = [
            "oneapi::dal::train()",
            "oneapi::dal::infer()",
            "oneapi::dal::detail::x()",
            "sycl::experimental::y()",
        ]
        .iter()
        .map(|n| Symbol::classify(n, SymbolKind::Function, &NoDemangle))
        .collect();

        let groups = TierGroups::from_symbols(&symbols);
        assert_eq!(groups.count(Tier::Public), 2);
        assert_eq!(
            groups.public["oneapi::dal"],
            vec!["oneapi::dal::infer()".to_string(), "oneapi::dal::train()".to_string()]
        );
        assert_eq!(groups.internal["oneapi::dal"].len(), 1);
        assert_eq!(groups.preview["sycl::experimental"].len(), 1);
    }
}
