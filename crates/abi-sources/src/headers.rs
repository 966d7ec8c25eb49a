use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

use abi_core::{ManifestNamespaces, PublicApiManifest};
use anyhow::{bail, Result};
use regex::Regex;
use tracing::{debug, info};
use walkdir::WalkDir;

const HEADER_EXTS: [&str; 3] = ["h", "hpp", "hxx"];
const PRIVATE_COMPONENTS: [&str; 5] = ["detail", "internal", "backend", "impl", "_internal"];

fn is_header(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| HEADER_EXTS.contains(&e))
}

fn under_include(rel: &Path) -> bool {
    rel.components().any(|c| matches!(c, Component::Normal(n) if n == "include"))
}

/// Header files below `root`. When some live under an `include` directory
/// only those are returned.
pub fn find_headers(root: &Path) -> Vec<PathBuf> {
    let mut all: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_header(e.path()))
        .map(|e| e.into_path())
        .collect();
    all.sort();
    let included: Vec<PathBuf> = all
        .iter()
        .filter(|p| under_include(p.strip_prefix(root).unwrap_or(p)))
        .cloned()
        .collect();
    if included.is_empty() {
        all
    } else {
        included
    }
}

/// A namespace is private when any `::` component is an internal marker.
pub fn is_private_namespace(ns: &str) -> bool {
    ns.split("::").any(|part| PRIVATE_COMPONENTS.contains(&part))
}

fn is_private_header(rel: &Path) -> bool {
    rel.components()
        .any(|c| matches!(c, Component::Normal(n) if PRIVATE_COMPONENTS.iter().any(|m| n == *m)))
}

/// `namespace a::b {` declarations in one header's text.
pub fn namespace_declarations(text: &str) -> Vec<String> {
    let re = Regex::new(r"(?m)^\s*(?:inline\s+)?namespace\s+([A-Za-z_][\w:]*)\s*\{").expect("static namespace pattern");
    re.captures_iter(text).map(|c| c[1].trim_end_matches(':').to_string()).collect()
}

/// Scans a header tree and classifies every declared namespace.
pub fn scan_headers(root: &Path, library: &str) -> Result<PublicApiManifest> {
    let headers = find_headers(root);
    if headers.is_empty() {
        bail!("no header files under {}", root.display());
    }
    info!(count = headers.len(), root = %root.display(), "scanning headers");

    let mut ns = ManifestNamespaces::default();
    for header in &headers {
        let Ok(bytes) = fs::read(header) else {
            debug!(header = %header.display(), "unreadable header skipped");
            continue;
        };
        let text = String::from_utf8_lossy(&bytes);
        let private_file = is_private_header(header.strip_prefix(root).unwrap_or(header));
        for name in namespace_declarations(&text) {
            ns.all.insert(name.clone());
            if private_file || is_private_namespace(&name) {
                ns.private.insert(name);
            } else {
                ns.public.insert(name);
            }
        }
    }
    // A namespace seen in any public header stays public.
    let public: BTreeSet<String> = ns.public.clone();
    ns.private.retain(|n| !public.contains(n) || is_private_namespace(n));

    Ok(PublicApiManifest { library: Some(library.to_string()), version: None, namespaces: ns })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, body: &str) {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, body).unwrap();
    }

    #[test]
    fn finds_declarations() {
        let text = "namespace oneapi::dal {\n  inline namespace v1 {\nnamespace detail{\n// namespace fake\n";
        assert_eq!(namespace_declarations(text), vec!["oneapi::dal", "v1", "detail"]);
    }

    #[test]
    fn classifies_by_name_and_path() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(root, "include/dal/api.hpp", "namespace oneapi::dal {\nnamespace oneapi::dal::detail {\n");
        write(root, "include/dal/backend/gpu.hpp", "namespace oneapi::dal::gpu {\n");
        write(root, "include/dal/table.hpp", "namespace oneapi::dal {\n");
        write(root, "src/impl.cpp", "namespace hidden {\n");
        write(root, "tools/gen.h", "namespace tooling {\n");

        let m = scan_headers(root, "onedal").unwrap();
        assert_eq!(m.library.as_deref(), Some("onedal"));
        let public: Vec<_> = m.namespaces.public.iter().map(String::as_str).collect();
        assert_eq!(public, vec!["oneapi::dal"]);
        assert!(m.namespaces.private.contains("oneapi::dal::detail"));
        assert!(m.namespaces.private.contains("oneapi::dal::gpu"));
        assert!(!m.namespaces.all.contains("tooling"));
    }

    #[test]
    fn headers_outside_include_when_no_include_dir() {
        let dir = tempdir().unwrap();
        write(dir.path(), "api.h", "namespace foo {\n");
        let m = scan_headers(dir.path(), "foo").unwrap();
        assert!(m.namespaces.public.contains("foo"));
        assert!(scan_headers(&dir.path().join("missing"), "x").is_err());
    }
}
