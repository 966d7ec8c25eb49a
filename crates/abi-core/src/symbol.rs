use serde::{Deserialize, Serialize};

use crate::classify::{classify_tier, extract_namespace, looks_mangled};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Public,
    Preview,
    Internal,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Public, Tier::Preview, Tier::Internal];

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Public => "public",
            Tier::Preview => "preview",
            Tier::Internal => "internal",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Variable,
}

impl SymbolKind {
    pub const ALL: [SymbolKind; 2] = [SymbolKind::Function, SymbolKind::Variable];
}

/// Turns a raw linkage name into a readable one.
///
/// Implementations must never fail: on any problem they return the input.
pub trait Demangler {
    fn demangle(&self, raw: &str) -> String;
}

/// Demangler that returns names unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoDemangle;

impl Demangler for NoDemangle {
    fn demangle(&self, raw: &str) -> String {
        raw.to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub raw: String,
    pub demangled: String,
    pub kind: SymbolKind,
    pub namespace: String,
    pub tier: Tier,
}

impl Symbol {
    /// Demangles (only names that look mangled) and classifies a raw symbol.
    pub fn classify(raw: &str, kind: SymbolKind, demangler: &dyn Demangler) -> Self {
        let demangled = if looks_mangled(raw) {
            demangler.demangle(raw)
        } else {
            raw.to_string()
        };
        let namespace = extract_namespace(&demangled);
        let tier = classify_tier(&demangled);
        Self {
            raw: raw.to_string(),
            demangled,
            kind,
            namespace,
            tier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Table(HashMap<&'static str, &'static str>);

    impl Demangler for Table {
        fn demangle(&self, raw: &str) -> String {
            self.0.get(raw).map(|s| s.to_string()).unwrap_or_else(|| raw.to_string())
        }
    }

    #[test]
    fn only_mangled_names_go_through_demangler() {
        let d = Table(HashMap::from([
            ("_ZN6oneapi3dal5trainEv", "oneapi::dal::train()"),
            ("plain_c_name", "should-not-be-used"),
        ]));
        let s = Symbol::classify("_ZN6oneapi3dal5trainEv", SymbolKind::Function, &d);
        assert_eq!(s.demangled, "oneapi::dal::train()");
        assert_eq!(s.namespace, "oneapi::dal");
        assert_eq!(s.tier, Tier::Public);

        let c = Symbol::classify("plain_c_name", SymbolKind::Function, &d);
        assert_eq!(c.demangled, "plain_c_name");
        assert_eq!(c.namespace, "(global)");
    }

    #[test]
    fn unknown_mangled_name_falls_back_to_raw() {
        let s = Symbol::classify("_Zbogus", SymbolKind::Variable, &NoDemangle);
        assert_eq!(s.demangled, "_Zbogus");
        assert_eq!(s.kind, SymbolKind::Variable);
    }
}
