use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use abi_core::library_base_name;
use tracing::debug;
use walkdir::WalkDir;

/// Which shared objects of a package tree are compared.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LibraryMatcher {
    /// Explicit file name prefix, e.g. `libsycl.so` or `libdnnl`.
    pub library_name: Option<String>,
}

impl LibraryMatcher {
    pub fn new(library_name: Option<String>) -> Self {
        Self { library_name: library_name.filter(|s| !s.trim().is_empty()) }
    }

    /// Name prefixes tried in order; the first that matches anything wins.
    pub fn prefixes(&self, package: &str) -> Vec<String> {
        let mut out = Vec::new();
        match &self.library_name {
            Some(name) => {
                out.push(name.clone());
                let stem = name.split(".so").next().unwrap_or(name);
                let bare = stem.strip_prefix("lib").unwrap_or(stem);
                out.push(format!("lib{bare}.so"));
            }
            None => {
                out.push(format!("lib{package}.so"));
                let underscored = package.replace('-', "_");
                if underscored != package {
                    out.push(format!("lib{underscored}.so"));
                }
            }
        }
        out.dedup();
        out
    }
}

/// Candidate shared objects below `root`: regular files (symlinks are not
/// followed), no `.py` files, nothing under a `debug` path, no preview builds.
fn candidates(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            let name = e.file_name().to_string_lossy();
            !name.ends_with(".py") && !name.contains("preview")
        })
        .filter(|e| {
            let rel = e.path().strip_prefix(root).unwrap_or(e.path());
            !rel.to_string_lossy().contains("debug")
        })
        .map(|e| e.into_path())
        .collect()
}

fn file_name(p: &Path) -> String {
    p.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

/// Finds the package's libraries, one per base name, preferring the longest
/// (most versioned) file name. Sorted by base name.
pub fn find_libraries(root: &Path, package: &str, matcher: &LibraryMatcher) -> Vec<PathBuf> {
    let all = candidates(root);
    for prefix in matcher.prefixes(package) {
        let matched: Vec<&PathBuf> = all.iter().filter(|p| file_name(p).starts_with(&prefix)).collect();
        if matched.is_empty() {
            continue;
        }
        let mut by_base: BTreeMap<String, &PathBuf> = BTreeMap::new();
        for path in matched {
            let name = file_name(path);
            let base = library_base_name(&name);
            let keep = match by_base.get(&base) {
                Some(current) => {
                    let current = file_name(current);
                    (name.len(), &name) > (current.len(), &current)
                }
                None => true,
            };
            if keep {
                by_base.insert(base, path);
            }
        }
        debug!(root = %root.display(), prefix = %prefix, count = by_base.len(), "libraries found");
        return by_base.into_values().cloned().collect();
    }
    debug!(root = %root.display(), package, "no library matched");
    Vec::new()
}

/// Any shared object under `root`, one per base name. Used for local trees
/// whose files are not named after the package.
pub fn find_any_libraries(root: &Path) -> Vec<PathBuf> {
    let mut by_base: BTreeMap<String, PathBuf> = BTreeMap::new();
    for path in candidates(root) {
        let name = file_name(&path);
        if !(name.contains(".so") || name.ends_with(".dylib")) {
            continue;
        }
        let base = library_base_name(&name);
        let longer = by_base.get(&base).map_or(true, |cur| file_name(cur).len() < name.len());
        if longer {
            by_base.insert(base, path);
        }
    }
    by_base.into_values().collect()
}

/// Libraries of an unpacked archive: the package's own when its files are
/// named after it, otherwise every shared object in the tree.
pub fn find_unpacked_libraries(root: &Path, package: &str, matcher: &LibraryMatcher) -> Vec<PathBuf> {
    let found = find_libraries(root, package, matcher);
    if found.is_empty() && matcher.library_name.is_none() {
        debug!(root = %root.display(), package, "no library named after the package; taking every shared object");
        return find_any_libraries(root);
    }
    found
}

/// The `include` directory at the top of a package tree (or below `usr` for
/// Debian layouts), if any.
pub fn find_headers_dir(root: &Path) -> Option<PathBuf> {
    ["include", "usr/include"].into_iter().map(|d| root.join(d)).find(|p| p.is_dir())
}
