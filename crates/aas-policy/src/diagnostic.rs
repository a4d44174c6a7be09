// diagnostic.rs - Policy diagnostics and their canonical ordering.
//
// Every problem the parser or validator finds becomes a PolicyDiagnostic.
// Diagnostics are always emitted sorted by (code, section, key, line,
// message), with a missing line number sorting after any present one.
// Tooling diffs these dumps and tests compare them verbatim, so the order
// is part of the output contract.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Malformed line, or a value of the wrong primitive type.
pub const CODE_INVALID_ENTRY: &str = "AASPOL001";
/// Missing required profile, or a `[profile]` header without a name.
pub const CODE_PROFILE_MISSING: &str = "AASPOL010";
/// Unknown section/key, undefined active profile, missing AI credentials.
pub const CODE_UNKNOWN_OR_UNDEFINED: &str = "AASPOL011";
/// Schema or enum violation (schemaVersion, safeWrites, mode, ranges).
pub const CODE_SCHEMA: &str = "AASPOL020";
/// Live profile without a valid autonomy level.
pub const CODE_LIVE_AUTONOMY: &str = "AASPOL030";
/// Reason attached to a LIVE policy that is blocked by errors.
pub const CODE_LIVE_BLOCKED: &str = "AASLIVE001";
/// Boolean field with a value other than true/false.
pub const CODE_INVALID_BOOL: &str = "POL099";
/// No last-known-good policy on disk.
pub const CODE_LKG_MISSING: &str = "POL990";
/// Last-known-good policy on disk does not parse.
pub const CODE_LKG_INVALID: &str = "POL991";

/// How serious a diagnostic is. Any `Error` makes its candidate invalid.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DiagnosticSeverity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for DiagnosticSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticSeverity::Info => write!(f, "Info"),
            DiagnosticSeverity::Warning => write!(f, "Warning"),
            DiagnosticSeverity::Error => write!(f, "Error"),
        }
    }
}

/// A single finding against a policy text or snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PolicyDiagnostic {
    pub code: String,
    pub severity: DiagnosticSeverity,
    /// Section the finding belongs to (`global`, `ai`, `profile live_pilot`, ...).
    pub section: String,
    pub key: String,
    /// 1-based line in the source text, when the finding maps to one.
    pub line: Option<usize>,
    pub message: String,
}

impl PolicyDiagnostic {
    pub fn new(
        code: &str,
        severity: DiagnosticSeverity,
        section: impl Into<String>,
        key: impl Into<String>,
        line: Option<usize>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code: code.to_string(),
            severity,
            section: section.into(),
            key: key.into(),
            line,
            message: message.into(),
        }
    }

    pub fn error(
        code: &str,
        section: impl Into<String>,
        key: impl Into<String>,
        line: Option<usize>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(code, DiagnosticSeverity::Error, section, key, line, message)
    }

    pub fn warning(
        code: &str,
        section: impl Into<String>,
        key: impl Into<String>,
        line: Option<usize>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(code, DiagnosticSeverity::Warning, section, key, line, message)
    }

    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::Error
    }

    /// Compare two diagnostics in canonical dump order.
    pub fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.code
            .cmp(&other.code)
            .then_with(|| self.section.cmp(&other.section))
            .then_with(|| self.key.cmp(&other.key))
            .then_with(|| cmp_line(self.line, other.line))
            .then_with(|| self.message.cmp(&other.message))
    }

    /// Render as one dump line: `CODE | Severity | Section.Key | Line-or-dash | Message`.
    pub fn dump_line(&self) -> String {
        let line = self
            .line
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string());
        format!(
            "{} | {} | {}.{} | {} | {}",
            self.code, self.severity, self.section, self.key, line, self.message
        )
    }
}

impl fmt::Display for PolicyDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dump_line())
    }
}

// Missing line numbers sort last.
fn cmp_line(a: Option<usize>, b: Option<usize>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Sort diagnostics into canonical order (stable, idempotent).
pub fn sort_diagnostics(diagnostics: &mut [PolicyDiagnostic]) {
    diagnostics.sort_by(|a, b| a.canonical_cmp(b));
}

/// Merge several diagnostic lists, drop exact duplicates, and sort.
pub fn merge_diagnostics<'a, I>(lists: I) -> Vec<PolicyDiagnostic>
where
    I: IntoIterator<Item = &'a [PolicyDiagnostic]>,
{
    let mut merged: Vec<PolicyDiagnostic> = Vec::new();
    for list in lists {
        for diagnostic in list {
            if !merged.contains(diagnostic) {
                merged.push(diagnostic.clone());
            }
        }
    }
    sort_diagnostics(&mut merged);
    merged
}

/// Whether any diagnostic in the list is an error.
pub fn has_errors(diagnostics: &[PolicyDiagnostic]) -> bool {
    diagnostics.iter().any(PolicyDiagnostic::is_error)
}

/// The first `limit` codes, in order, optionally without repeats.
pub fn top_codes(diagnostics: &[PolicyDiagnostic], limit: usize, distinct: bool) -> Vec<String> {
    let mut codes: Vec<String> = Vec::new();
    for diagnostic in diagnostics {
        if codes.len() == limit {
            break;
        }
        if distinct && codes.contains(&diagnostic.code) {
            continue;
        }
        codes.push(diagnostic.code.clone());
    }
    codes
}

/// Render a diagnostic list as dump file contents, one line each.
pub fn render_dump(diagnostics: &[PolicyDiagnostic]) -> String {
    let mut out = String::new();
    for diagnostic in diagnostics {
        out.push_str(&diagnostic.dump_line());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diag(code: &str, section: &str, key: &str, line: Option<usize>, msg: &str) -> PolicyDiagnostic {
        PolicyDiagnostic::error(code, section, key, line, msg)
    }

    #[test]
    fn sort_is_independent_of_insertion_order() {
        let items = vec![
            diag("AASPOL020", "global", "schemaVersion", None, "b"),
            diag("AASPOL001", "ai", "x", Some(4), "a"),
            diag("AASPOL011", "global", "activeProfile", None, "c"),
            diag("AASPOL001", "ai", "x", Some(2), "a"),
            diag("AASPOL001", "ai", "x", None, "a"),
        ];
        let mut forward = items.clone();
        let mut reversed: Vec<_> = items.into_iter().rev().collect();
        sort_diagnostics(&mut forward);
        sort_diagnostics(&mut reversed);
        assert_eq!(forward, reversed);

        let lines: Vec<_> = forward.iter().map(|d| d.line).collect();
        assert_eq!(lines, vec![Some(2), Some(4), None, None, None]);
        assert_eq!(forward[3].code, "AASPOL011");
        assert_eq!(forward[4].code, "AASPOL020");
    }

    #[test]
    fn sort_is_idempotent() {
        let mut once = vec![
            diag("B", "s", "k", None, "m"),
            diag("A", "s", "k", Some(1), "m"),
        ];
        sort_diagnostics(&mut once);
        let mut twice = once.clone();
        sort_diagnostics(&mut twice);
        assert_eq!(once, twice);
    }

    #[test]
    fn ordering_is_ordinal_not_case_folded() {
        let mut items = vec![
            diag("X", "global", "schemaVersion", None, "m"),
            diag("X", "global", "SafeWrites", None, "m"),
        ];
        sort_diagnostics(&mut items);
        // Uppercase letters sort before lowercase in byte order.
        assert_eq!(items[0].key, "SafeWrites");
    }

    #[test]
    fn dump_line_format() {
        let d = diag("AASPOL020", "global", "safeWrites", None, "safeWrites must be outOnly.");
        assert_eq!(
            d.dump_line(),
            "AASPOL020 | Error | global.safeWrites | - | safeWrites must be outOnly."
        );
        let w = PolicyDiagnostic::warning("AASPOL011", "ai", "colour", Some(12), "Unknown key colour.");
        assert_eq!(w.to_string(), "AASPOL011 | Warning | ai.colour | 12 | Unknown key colour.");
    }

    #[test]
    fn merge_drops_exact_duplicates() {
        let a = vec![diag("A", "s", "k", None, "m")];
        let b = vec![diag("A", "s", "k", None, "m"), diag("B", "s", "k", None, "m")];
        let merged = merge_diagnostics([a.as_slice(), b.as_slice()]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn top_codes_distinct_and_limited() {
        let items = vec![
            diag("A", "s", "k1", None, "m"),
            diag("A", "s", "k2", None, "m"),
            diag("B", "s", "k", None, "m"),
            diag("C", "s", "k", None, "m"),
        ];
        assert_eq!(top_codes(&items, 2, true), vec!["A", "B"]);
        assert_eq!(top_codes(&items, 3, false), vec!["A", "A", "B"]);
    }
}
