//! Compile-time diagnostics.
//!
//! Every pass appends to a shared [`Diagnostics`] report and keeps going;
//! no error aborts a pass. A compile succeeds iff the report holds zero
//! errors — warnings never fail a build.
//!
//! # Design
//!
//! - `Diagnostic` — one record: file, range, severity, kind, message
//! - `DiagnosticKind` — the error taxonomy, one variant per failure class
//! - `Diagnostics` — append-only, order-stable report
//!
//! Rendering follows the host toolchain convention:
//! `file(line,col): error: message`.

use crate::span::{SourceMap, SourceRange};
use std::fmt;

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Category of diagnostic.
///
/// Categorized by the pass that detects it; the parser reports `Syntax`,
/// name resolution reports `UndeclaredName`/`DuplicateSymbol`, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// Invalid token or malformed construct (from the parser)
    Syntax,
    /// Reference to a name with no visible declaration
    UndeclaredName,
    /// Second declaration of a name in the same scope
    DuplicateSymbol,
    /// Root-scope collision while importing another unit's symbols
    DuplicateImport,
    /// Member access on a struct that has no such field
    UnknownMember,
    /// Operand or assignment types don't line up
    TypeMismatch,
    /// Call with the wrong number of arguments
    ArityMismatch,
    /// Struct that transitively contains itself through non-reference fields
    CircularType,
    /// CONST initializer that depends on itself
    CircularConstant,
    /// CONST initializer referencing a non-constant
    NonConstInConst,
    /// Global declared with a reference or function type
    InvalidGlobalType,
    /// Static with a non-constant (or string) initializer
    InvalidStaticInitializer,
    /// Two CASE labels folding to the same value
    DuplicateCase,
    /// FUNC body missing a RETURN value
    MissingReturn,
    /// USING path that does not resolve to a readable unit
    InvalidUsingPath,
}

/// A single diagnostic record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub range: SourceRange,
    pub message: String,
}

impl Diagnostic {
    pub fn error(kind: DiagnosticKind, range: SourceRange, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Error,
            range,
            message: message.into(),
        }
    }

    pub fn warning(kind: DiagnosticKind, range: SourceRange, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Warning,
            range,
            message: message.into(),
        }
    }

    /// Render as `file(line,col): severity: message`.
    ///
    /// The unknown range renders its location as `(?)`.
    pub fn render(&self, sources: &SourceMap) -> String {
        let location = match sources.path(&self.range) {
            Some(path) => format!(
                "{}({},{})",
                path.display(),
                self.range.begin.line,
                self.range.begin.column
            ),
            None => "(?)".to_string(),
        };
        format!("{}: {}: {}", location, self.severity, self.message)
    }
}

/// Append-only diagnostic report.
///
/// Ordering is stable: records come out in the order passes pushed them,
/// which is the order the single-threaded pipeline visited the source.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    records: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, kind: DiagnosticKind, range: SourceRange, message: impl Into<String>) {
        self.records.push(Diagnostic::error(kind, range, message));
    }

    pub fn warning(&mut self, kind: DiagnosticKind, range: SourceRange, message: impl Into<String>) {
        self.records.push(Diagnostic::warning(kind, range, message));
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.records.push(diagnostic);
    }

    pub fn error_count(&self) -> usize {
        self.records
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    pub fn has_errors(&self) -> bool {
        self.records.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.records.iter()
    }

    /// Render every record, one per line, in report order.
    pub fn render(&self, sources: &SourceMap) -> String {
        self.records
            .iter()
            .map(|d| d.render(sources))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{Position, SourceMap};
    use std::path::PathBuf;

    fn test_sources() -> SourceMap {
        let mut map = SourceMap::new();
        map.add_file(PathBuf::from("test.sc"), "INT x = y\n".to_string());
        map
    }

    #[test]
    fn test_render_with_location() {
        let sources = test_sources();
        let range = SourceRange::new(0, Position::new(1, 9), Position::new(1, 10));
        let diag = Diagnostic::error(DiagnosticKind::UndeclaredName, range, "undeclared name 'y'");
        assert_eq!(
            diag.render(&sources),
            "test.sc(1,9): error: undeclared name 'y'"
        );
    }

    #[test]
    fn test_render_unknown_range() {
        let sources = test_sources();
        let diag = Diagnostic::warning(
            DiagnosticKind::DuplicateImport,
            SourceRange::unknown(),
            "duplicate import of 'VEC3'",
        );
        assert_eq!(
            diag.render(&sources),
            "(?): warning: duplicate import of 'VEC3'"
        );
    }

    #[test]
    fn test_error_counting() {
        let mut diags = Diagnostics::new();
        assert!(!diags.has_errors());

        diags.warning(
            DiagnosticKind::DuplicateImport,
            SourceRange::unknown(),
            "dup",
        );
        assert!(!diags.has_errors());
        assert_eq!(diags.len(), 1);

        diags.error(DiagnosticKind::TypeMismatch, SourceRange::unknown(), "bad");
        assert!(diags.has_errors());
        assert_eq!(diags.error_count(), 1);
    }

    #[test]
    fn test_order_is_stable() {
        let mut diags = Diagnostics::new();
        diags.error(DiagnosticKind::TypeMismatch, SourceRange::unknown(), "first");
        diags.error(DiagnosticKind::TypeMismatch, SourceRange::unknown(), "second");
        let messages: Vec<_> = diags.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second"]);
    }
}
