use serde::{Deserialize, Serialize};

use crate::digest::sha256_hex;

/// Identity of one cached baseline.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BaselineKey {
    pub package: String,
    pub version: String,
    /// Library base name when a version ships several libraries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library: Option<String>,
}

impl BaselineKey {
    pub fn new(package: impl Into<String>, version: impl Into<String>) -> Self {
        Self { package: package.into(), version: version.into(), library: None }
    }

    pub fn with_library(mut self, library: impl Into<String>) -> Self {
        self.library = Some(library.into());
        self
    }

    /// Readable prefix plus a digest of the full key, safe as a file name.
    pub fn file_stem(&self) -> String {
        let mut readable = format!("{}-{}", sanitize(&self.package), sanitize(&self.version));
        if let Some(lib) = &self.library {
            readable.push('-');
            readable.push_str(&sanitize(lib));
        }
        let identity = format!(
            "{}\0{}\0{}",
            self.package,
            self.version,
            self.library.as_deref().unwrap_or("")
        );
        let digest = sha256_hex(identity.as_bytes());
        format!("{}-{}", readable, &digest[..12])
    }
}

fn sanitize(s: &str) -> String {
    let cleaned: String = s
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+') { c } else { '_' })
        .take(48)
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stems_are_distinct_and_safe() {
        let a = BaselineKey::new("onednn", "3.1.0");
        let b = BaselineKey::new("onednn", "3.1.0").with_library("libdnnl.so");
        let c = BaselineKey::new("../evil", "1/2");
        assert_ne!(a.file_stem(), b.file_stem());
        assert!(a.file_stem().starts_with("onednn-3.1.0-"));
        assert!(b.file_stem().starts_with("onednn-3.1.0-libdnnl.so-"));
        assert!(!c.file_stem().contains('/'));
        assert_eq!(a.file_stem(), BaselineKey::new("onednn", "3.1.0").file_stem());
    }
}
