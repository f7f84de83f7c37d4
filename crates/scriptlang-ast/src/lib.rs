//! Foundation types for the ScriptLang compiler.
//!
//! This crate holds everything the rest of the pipeline agrees on before any
//! semantics happen: source locations, the diagnostic report, and the
//! untyped syntax tree the parser produces.

pub mod ast;
pub mod diag;
pub mod span;

pub use ast::*;
pub use diag::{Diagnostic, DiagnosticKind, Diagnostics, Severity};
pub use span::{Position, SourceFile, SourceMap, SourceRange};
