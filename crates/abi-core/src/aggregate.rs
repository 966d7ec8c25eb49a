use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::adjust::Adjustment;
use crate::result::ComparisonResult;
use crate::verdict::Verdict;
use crate::version::TransitionKind;

/// Library base name: the file name cut after its shared-object extension.
///
/// `libfoo.so.3.1.0` -> `libfoo.so`, `libfoo.3.dylib` -> `libfoo.dylib`.
pub fn library_base_name(file_name: &str) -> String {
    if let Some(idx) = file_name.find(".so") {
        let end = idx + 3;
        if file_name.len() == end || file_name[end..].starts_with('.') {
            return file_name[..end].to_string();
        }
    }
    if let Some(stem) = file_name.strip_suffix(".dylib") {
        let base = stem
            .trim_end_matches(|c: char| c.is_ascii_digit() || c == '.')
            .trim_end_matches('.');
        return format!("{base}.dylib");
    }
    file_name.to_string()
}

/// Soname derived from a resolved file name: base name plus the first
/// version component, `libfoo.so.3.1.0` -> `libfoo.so.3`.
pub fn soname_of(file_name: &str) -> String {
    let base = library_base_name(file_name);
    match file_name.strip_prefix(base.as_str()).and_then(|r| r.strip_prefix('.')) {
        Some(rest) => match rest.split('.').next() {
            Some(major) if !major.is_empty() => format!("{base}.{major}"),
            _ => base,
        },
        None => base,
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Libraries of the two sides matched by base name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LibraryPair {
    pub base_name: String,
    pub old: Option<PathBuf>,
    pub new: Option<PathBuf>,
}

impl LibraryPair {
    pub fn old_base(&self) -> Option<String> {
        self.old.as_deref().map(|p| library_base_name(&file_name_of(p)))
    }

    pub fn new_base(&self) -> Option<String> {
        self.new.as_deref().map(|p| library_base_name(&file_name_of(p)))
    }
}

/// Pairs library files by base name. When one side carries several files
/// with the same base name the longest file name (most specific version) wins.
/// Two sides holding one library each are always paired, keyed by the new
/// side's base name.
pub fn pair_libraries(old: &[PathBuf], new: &[PathBuf]) -> Vec<LibraryPair> {
    fn pick(paths: &[PathBuf]) -> BTreeMap<String, PathBuf> {
        let mut out: BTreeMap<String, PathBuf> = BTreeMap::new();
        for p in paths {
            let name = file_name_of(p);
            let base = library_base_name(&name);
            let replace = out
                .get(&base)
                .map_or(true, |cur| file_name_of(cur).len() < name.len());
            if replace {
                out.insert(base, p.clone());
            }
        }
        out
    }

    let mut old_map = pick(old);
    let new_map = pick(new);
    if old_map.len() == 1 && new_map.len() == 1 {
        let old_path = old_map.into_values().next();
        return new_map
            .into_iter()
            .map(|(base_name, new_path)| LibraryPair { base_name, old: old_path.clone(), new: Some(new_path) })
            .collect();
    }
    let mut pairs = Vec::new();
    for (base, new_path) in new_map {
        let old_path = old_map.remove(&base);
        pairs.push(LibraryPair { base_name: base, old: old_path, new: Some(new_path) });
    }
    for (base, old_path) in old_map {
        pairs.push(LibraryPair { base_name: base, old: Some(old_path), new: None });
    }
    pairs.sort_by(|a, b| a.base_name.cmp(&b.base_name));
    pairs
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryComparison {
    pub base_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_file: Option<String>,
    pub result: ComparisonResult,
}

impl LibraryComparison {
    pub fn compared(base_name: impl Into<String>, old_file: &str, new_file: &str, result: ComparisonResult) -> Self {
        Self {
            base_name: base_name.into(),
            old_file: Some(old_file.to_string()),
            new_file: Some(new_file.to_string()),
            result,
        }
    }

    /// Library gone from the new side: a total removal.
    pub fn removed(base_name: impl Into<String>, old_file: &str) -> Self {
        let base_name = base_name.into();
        let result = ComparisonResult::forced(
            Verdict::Breaking,
            Adjustment::LibraryRemoved { library: base_name.clone() },
        );
        Self { base_name, old_file: Some(old_file.to_string()), new_file: None, result }
    }

    /// Library new on the new side: a pure addition.
    pub fn added(base_name: impl Into<String>, new_file: &str) -> Self {
        let base_name = base_name.into();
        let result = ComparisonResult::forced(
            Verdict::Compatible,
            Adjustment::LibraryAdded { library: base_name.clone() },
        );
        Self { base_name, old_file: None, new_file: Some(new_file.to_string()), result }
    }
}

/// Per-library results of one version transition, keyed by base name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryComparisonSet {
    pub libraries: BTreeMap<String, LibraryComparison>,
}

impl LibraryComparisonSet {
    pub fn single(entry: LibraryComparison) -> Self {
        let mut set = Self::default();
        set.insert(entry);
        set
    }

    pub fn insert(&mut self, entry: LibraryComparison) {
        self.libraries.insert(entry.base_name.clone(), entry);
    }

    pub fn get(&self, base_name: &str) -> Option<&LibraryComparison> {
        self.libraries.get(base_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LibraryComparison> {
        self.libraries.values()
    }

    pub fn len(&self) -> usize {
        self.libraries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.libraries.is_empty()
    }

    /// Outside a major transition a changed soname forces `BREAKING`.
    pub fn apply_soname_policy(&mut self, kind: TransitionKind) {
        if kind == TransitionKind::Major {
            return;
        }
        for entry in self.libraries.values_mut() {
            let (Some(old), Some(new)) = (&entry.old_file, &entry.new_file) else {
                continue;
            };
            let (old_soname, new_soname) = (soname_of(old), soname_of(new));
            if old_soname != new_soname {
                let from = entry.result.verdict;
                entry.result.escalate(
                    Verdict::Breaking,
                    Adjustment::SonameBump { old: old_soname, new: new_soname, from },
                );
            }
        }
    }

    /// Aggregate verdict. A library that could not be compared turns the set
    /// into `Error` unless a compared library already makes it incompatible.
    pub fn verdict(&self) -> Verdict {
        let compared = self.compared_verdict();
        if self.has_errors() && !compared.is_incompatible() {
            Verdict::Error
        } else {
            compared
        }
    }

    /// Worst verdict among the libraries that were compared; `Error` when
    /// none were.
    pub fn compared_verdict(&self) -> Verdict {
        Verdict::worst(self.iter().map(|e| e.result.verdict).filter(|v| *v != Verdict::Error))
    }

    pub fn has_errors(&self) -> bool {
        self.failed().next().is_some()
    }

    /// Libraries whose comparison did not run.
    pub fn failed(&self) -> impl Iterator<Item = &LibraryComparison> {
        self.iter().filter(|e| e.result.verdict == Verdict::Error)
    }

    pub fn any_fallback(&self) -> bool {
        self.iter().any(|e| e.result.is_fallback())
    }
}
