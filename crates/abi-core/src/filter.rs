use std::collections::BTreeSet;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Implementation-detail namespaces and internal name prefixes. A match makes
/// a symbol private whatever the allow-list says.
pub const DENY_PATTERNS: [&str; 7] = [
    r"::detail::",
    r"::backend::",
    r"::internal::",
    r"::impl::",
    r"^mkl_",
    r"tbb::detail::",
    r"_Z.*internal",
];

/// Decides whether a symbol belongs to the public surface.
#[derive(Clone, Debug)]
pub struct PublicApiFilter {
    deny: Vec<Regex>,
    allow: Vec<Regex>,
    namespaces: Vec<String>,
}

impl PublicApiFilter {
    /// Filter without an allow-list: everything not denied is public.
    pub fn allow_all() -> Self {
        Self {
            deny: deny_patterns(),
            allow: Vec::new(),
            namespaces: Vec::new(),
        }
    }

    /// Filter that treats only the given namespaces (at a scope boundary) as
    /// public. An empty list behaves like [`PublicApiFilter::allow_all`].
    pub fn with_namespaces<I, S>(namespaces: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let namespaces: Vec<String> = namespaces
            .into_iter()
            .map(Into::into)
            .filter(|ns| !ns.trim().is_empty())
            .collect();
        let mut allow = Vec::with_capacity(namespaces.len());
        for ns in &namespaces {
            let pattern = format!("(?:^|::|[^\\w:]){}(?:$|::)", regex::escape(ns.trim()));
            let re = Regex::new(&pattern).map_err(|source| CoreError::Pattern {
                pattern: pattern.clone(),
                source,
            })?;
            allow.push(re);
        }
        Ok(Self {
            deny: deny_patterns(),
            allow,
            namespaces,
        })
    }

    pub fn from_manifest(manifest: &PublicApiManifest) -> Result<Self, CoreError> {
        Self::with_namespaces(manifest.namespaces.public.iter().cloned())
    }

    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }

    pub fn has_allow_list(&self) -> bool {
        !self.allow.is_empty()
    }

    pub fn is_public(&self, symbol: &str) -> bool {
        self.is_public_any(&[symbol])
    }

    /// Judges several spellings of one symbol (linkage name, declaration).
    /// A deny match on any of them makes it private.
    pub fn is_public_any(&self, spellings: &[&str]) -> bool {
        let denied = spellings
            .iter()
            .any(|s| self.deny.iter().any(|re| re.is_match(s)));
        if denied {
            return false;
        }
        if self.allow.is_empty() {
            return true;
        }
        spellings
            .iter()
            .any(|s| self.allow.iter().any(|re| re.is_match(s)))
    }
}

impl Default for PublicApiFilter {
    fn default() -> Self {
        Self::allow_all()
    }
}

fn deny_patterns() -> Vec<Regex> {
    DENY_PATTERNS
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
}

/// Public API manifest as written by the header scanner.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicApiManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub namespaces: ManifestNamespaces,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestNamespaces {
    #[serde(default)]
    pub public: BTreeSet<String>,
    #[serde(default)]
    pub private: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub all: BTreeSet<String>,
}

impl PublicApiManifest {
    pub fn from_json(text: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
