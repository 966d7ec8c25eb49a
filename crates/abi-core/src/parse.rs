use regex::{Captures, Regex};

use crate::delta::{AxisCounts, ChangeCounts, ChangeType, Surface, SymbolDelta};
use crate::filter::PublicApiFilter;
use crate::symbol::SymbolKind;

/// Structured view of one differ report.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedReport {
    pub counts: ChangeCounts,
    pub delta: SymbolDelta,
}

/// Parser for the type-aware differ's text report.
///
/// Unknown lines are skipped; a report with no recognizable content parses
/// to zero counts and an empty delta.
#[derive(Clone, Debug)]
pub struct ReportParser {
    function_summary: Regex,
    variable_summary: Regex,
    function_unreferenced_added: Regex,
    function_unreferenced_removed: Regex,
    variable_unreferenced_added: Regex,
    variable_unreferenced_removed: Regex,
    section_header: Regex,
    changed_section_header: Regex,
}

fn pattern(p: &str) -> Regex {
    Regex::new(p).expect("static report pattern")
}

impl Default for ReportParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportParser {
    pub fn new() -> Self {
        Self {
            function_summary: pattern(
                r"Functions changes summary:\s*(\d+) Removed(?: \([^)]*\))?,\s*(\d+) Changed(?: \([^)]*\))?,\s*(\d+) Added",
            ),
            variable_summary: pattern(
                r"Variables changes summary:\s*(\d+) Removed(?: \([^)]*\))?,\s*(\d+) Changed(?: \([^)]*\))?,\s*(\d+) Added",
            ),
            function_unreferenced_added: pattern(r"(\d+) Added function symbols? not referenced by debug info"),
            function_unreferenced_removed: pattern(r"(\d+) Removed function symbols? not referenced by debug info"),
            variable_unreferenced_added: pattern(r"(\d+) Added variable symbols? not referenced by debug info"),
            variable_unreferenced_removed: pattern(r"(\d+) Removed variable symbols? not referenced by debug info"),
            section_header: pattern(r"^(?:\d+\s+)?(Removed|Added|Changed)\s+(function|variable)"),
            changed_section_header: pattern(r"^\d+\s+(function|variable)s?\s+with\s+.*change"),
        }
    }

    pub fn parse(
        &self,
        report: &str,
        old_filter: &PublicApiFilter,
        new_filter: &PublicApiFilter,
    ) -> ParsedReport {
        ParsedReport {
            counts: self.parse_summary(report),
            delta: self.parse_changes(report, old_filter, new_filter),
        }
    }

    /// Summary counters. Symbols without debug info are reported on separate
    /// lines and are added on top of the primary counters.
    pub fn parse_summary(&self, report: &str) -> ChangeCounts {
        let mut counts = ChangeCounts::default();
        if let Some(c) = self.function_summary.captures(report) {
            counts.functions = axis_counts(&c);
        }
        if let Some(c) = self.variable_summary.captures(report) {
            counts.variables = axis_counts(&c);
        }
        counts.functions.added += first_number(&self.function_unreferenced_added, report);
        counts.functions.removed += first_number(&self.function_unreferenced_removed, report);
        counts.variables.added += first_number(&self.variable_unreferenced_added, report);
        counts.variables.removed += first_number(&self.variable_unreferenced_removed, report);
        counts
    }

    /// Per-symbol changes. Removals are judged by the old-side filter,
    /// additions and changes by the new-side filter.
    pub fn parse_changes(
        &self,
        report: &str,
        old_filter: &PublicApiFilter,
        new_filter: &PublicApiFilter,
    ) -> SymbolDelta {
        let mut delta = SymbolDelta::default();
        let mut section: Option<(ChangeType, SymbolKind)> = None;

        for line in report.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some(header) = self.header(trimmed) {
                section = Some(header);
                continue;
            }
            if !trimmed.starts_with('[') {
                // any other top-level heading closes the current section
                if !line.starts_with(char::is_whitespace) && trimmed.ends_with(':') {
                    section = None;
                }
                continue;
            }
            let Some((change, kind)) = section else {
                continue;
            };
            let Some(rest) = trimmed.strip_prefix(marker(change)) else {
                continue;
            };
            let Some(name) = symbol_name(rest) else {
                continue;
            };
            let filter = match change {
                ChangeType::Removed => old_filter,
                ChangeType::Added | ChangeType::Changed => new_filter,
            };
            let surface = if filter.is_public_any(&[name.as_str(), rest.trim()]) {
                Surface::Public
            } else {
                Surface::Private
            };
            delta.record(kind, change, surface, name);
        }
        delta
    }

    fn header(&self, trimmed: &str) -> Option<(ChangeType, SymbolKind)> {
        if trimmed.starts_with('[') {
            return None;
        }
        if let Some(c) = self.section_header.captures(trimmed) {
            let change = match &c[1] {
                "Removed" => ChangeType::Removed,
                "Added" => ChangeType::Added,
                _ => ChangeType::Changed,
            };
            return Some((change, kind_of(&c[2])));
        }
        self.changed_section_header
            .captures(trimmed)
            .map(|c| (ChangeType::Changed, kind_of(&c[1])))
    }
}

fn kind_of(word: &str) -> SymbolKind {
    if word == "variable" {
        SymbolKind::Variable
    } else {
        SymbolKind::Function
    }
}

fn marker(change: ChangeType) -> &'static str {
    match change {
        ChangeType::Removed => "[D]",
        ChangeType::Added => "[A]",
        ChangeType::Changed => "[C]",
    }
}

fn number(c: &Captures<'_>, idx: usize) -> u32 {
    c.get(idx)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

fn axis_counts(c: &Captures<'_>) -> AxisCounts {
    AxisCounts {
        removed: number(c, 1),
        changed: number(c, 2),
        added: number(c, 3),
    }
}

fn first_number(re: &Regex, report: &str) -> u32 {
    re.captures(report).map(|c| number(&c, 1)).unwrap_or(0)
}

/// Name following a change marker: the `{linkage}` name when present, else
/// the quoted declaration, else the first bare token.
fn symbol_name(rest: &str) -> Option<String> {
    let rest = rest.trim();
    if rest.is_empty() {
        return None;
    }
    if rest.ends_with('}') {
        if let Some(open) = rest.rfind('{') {
            let inner = &rest[open + 1..rest.len() - 1];
            let linkage = inner.split(',').next().unwrap_or("").trim();
            if !linkage.is_empty() {
                return Some(linkage.to_string());
            }
        }
    }
    if let Some(quoted) = rest.strip_prefix('\'') {
        if let Some(end) = quoted.find('\'') {
            let decl = quoted[..end].trim();
            if !decl.is_empty() {
                return Some(decl.to_string());
            }
        }
    }
    rest.split(|c: char| c.is_whitespace() || c == ',')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "\
Functions changes summary: 1 Removed, 1 Changed (2 filtered out), 1 Added functions
Variables changes summary: 0 Removed, 0 Changed, 1 Added variable
Function symbols changes summary: 2 Removed, 0 Added function symbols not referenced by debug info
Variable symbols changes summary: 0 Removed, 0 Added variable symbol not referenced by debug info

1 Removed function:

  [D] 'function void oneapi::dal::old_api()'    {_ZN6oneapi3dal7old_apiEv}

1 Added function:

  [A] 'function void oneapi::dal::new_api()'    {_ZN6oneapi3dal7new_apiEv}

1 function with some indirect sub-type change:

  [C] 'function void oneapi::dal::train(const oneapi::dal::table&)' at train.cpp:10:1 has some indirect sub-type changes:
    parameter 1 of type 'const oneapi::dal::table&' has sub-type changes:
      1 data member insertion:

1 Added variable:

  [A] 'int oneapi::dal::global_flag'    {_ZN6oneapi3dal11global_flagE}

2 Removed function symbols not referenced by debug info:

  [D] _ZN6oneapi3dal6detail6helperEv
  [D] mkl_serv_free
";

    #[test]
    fn summary_adds_unreferenced_counts() {
        let counts = ReportParser::new().parse_summary(REPORT);
        assert_eq!(counts.functions.removed, 3);
        assert_eq!(counts.functions.changed, 1);
        assert_eq!(counts.functions.added, 1);
        assert_eq!(counts.variables.added, 1);
        assert_eq!(counts.variables.removed, 0);
    }

    #[test]
    fn changes_are_bucketed_by_axis_and_surface() {
        let f = PublicApiFilter::allow_all();
        let d = ReportParser::new().parse_changes(REPORT, &f, &f);
        // mangled names never contain `::detail::`
        assert_eq!(
            d.functions.removed.public,
            vec![
                "_ZN6oneapi3dal7old_apiEv".to_string(),
                "_ZN6oneapi3dal6detail6helperEv".to_string(),
            ]
        );
        assert_eq!(d.functions.removed.private, vec!["mkl_serv_free".to_string()]);
        assert_eq!(d.functions.added.public, vec!["_ZN6oneapi3dal7new_apiEv".to_string()]);
        assert_eq!(
            d.functions.changed.public,
            vec!["function void oneapi::dal::train(const oneapi::dal::table&)".to_string()]
        );
        assert_eq!(
            d.variables.added.public,
            vec!["_ZN6oneapi3dal11global_flagE".to_string()]
        );
    }

    #[test]
    fn old_filter_judges_removals_new_filter_judges_additions() {
        let report = "\
1 Removed function:
  [D] 'function void a::f()'
1 Added function:
  [A] 'function void b::g()'
";
        let old = PublicApiFilter::with_namespaces(["a"]).unwrap();
        let new = PublicApiFilter::with_namespaces(["c"]).unwrap();
        let d = ReportParser::new().parse_changes(report, &old, &new);
        assert_eq!(d.functions.removed.public.len(), 1);
        assert_eq!(d.functions.added.private.len(), 1);
    }

    #[test]
    fn allow_list_sees_declaration_next_to_linkage_name() {
        let report = "\
1 Removed function:
  [D] 'function void oneapi::dal::old_api()'    {_ZN6oneapi3dal7old_apiEv}
  [D] 'function void sycl::old()'    {_ZN4sycl3oldEv}
";
        let f = PublicApiFilter::with_namespaces(["oneapi::dal"]).unwrap();
        let d = ReportParser::new().parse_changes(report, &f, &f);
        assert_eq!(d.functions.removed.public, vec!["_ZN6oneapi3dal7old_apiEv".to_string()]);
        assert_eq!(d.functions.removed.private, vec!["_ZN4sycl3oldEv".to_string()]);
    }

    #[test]
    fn legacy_header_wording_is_recognized() {
        let report = "\
Removed function symbols:
  [D] foo
Added variable symbols:
  [A] bar
";
        let f = PublicApiFilter::allow_all();
        let d = ReportParser::new().parse_changes(report, &f, &f);
        assert_eq!(d.functions.removed.public, vec!["foo".to_string()]);
        assert_eq!(d.variables.added.public, vec!["bar".to_string()]);
    }

    #[test]
    fn markers_outside_their_section_are_ignored() {
        let report = "\
  [D] orphan
1 Added function:
  [D] wrong_marker
  [A] right
Something else entirely:
  [A] after_reset
";
        let f = PublicApiFilter::allow_all();
        let d = ReportParser::new().parse_changes(report, &f, &f);
        assert_eq!(d.functions.added.public, vec!["right".to_string()]);
        assert!(d.functions.removed.is_empty());
    }

    #[test]
    fn garbage_parses_to_nothing() {
        let p = ReportParser::new();
        let f = PublicApiFilter::allow_all();
        let parsed = p.parse("no such format\n\u{0}\u{1}\n[[[", &f, &f);
        assert_eq!(parsed, ParsedReport::default());
    }

    #[test]
    fn duplicate_names_are_recorded_once() {
        let report = "\
2 Removed functions:
  [D] foo
  [D] foo
";
        let f = PublicApiFilter::allow_all();
        let d = ReportParser::new().parse_changes(report, &f, &f);
        assert_eq!(d.functions.removed.public, vec!["foo".to_string()]);
    }

    #[test]
    fn lambda_braces_inside_quotes_are_not_linkage() {
        assert_eq!(
            symbol_name("'function void ns::f()::{lambda()#1}::operator()() const'").as_deref(),
            Some("function void ns::f()::{lambda()#1}::operator()() const")
        );
        assert_eq!(symbol_name("'x' {_Z1xv, aliases _Z1yv}").as_deref(), Some("_Z1xv"));
        assert_eq!(symbol_name("  "), None);
    }
}
