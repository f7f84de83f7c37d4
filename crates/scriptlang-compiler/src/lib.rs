// Allow unwrap in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! The ScriptLang compilation pipeline.
//!
//! Unified entry point: source text in, compiled [`Program`] plus
//! diagnostics out. Consolidates lexing, parsing, USING resolution,
//! both sema passes, and code generation.
//!
//! Every pass is non-fatal — the pipeline runs to the end and reports
//! everything it found. A compile succeeds iff the diagnostics hold zero
//! errors; the emitter refuses to run otherwise.
//!
//! # USING resolution
//!
//! `USING "path"` paths resolve relative to the importing file. Each
//! unit is compiled once per invocation (cached by canonical path) in
//! dependency-first order; its root-scope symbols are imported into the
//! user, and its defined functions and statics become part of the entry
//! script's program. A cycle reports `InvalidUsingPath` at the USING
//! that closes it.

use scriptlang_ast::span::SourceMap;
use scriptlang_ast::{Decl, DiagnosticKind, Diagnostics, FunctionProvenance, SourceRange};
use scriptlang_codegen::{EmitError, UnitCodegen};
use scriptlang_sema::{first_pass, native_hash, second_pass, Analysis, SymbolTable, TypePool};
use scriptlang_vm::{NativeDb, Program};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Failures outside the diagnostic model.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("emission failed: {0}")]
    Emit(#[from] EmitError),
}

/// Result of one compilation.
#[derive(Debug)]
pub struct CompileOutput {
    /// The compiled program; `None` when diagnostics contain errors.
    pub program: Option<Program>,
    pub diagnostics: Diagnostics,
    pub sources: SourceMap,
}

impl CompileOutput {
    pub fn succeeded(&self) -> bool {
        self.program.is_some() && !self.diagnostics.has_errors()
    }
}

/// Compile an entry script from disk, resolving USING imports.
pub fn compile_file(path: &Path, natives: Option<&NativeDb>) -> Result<CompileOutput, CompileError> {
    let source = std::fs::read_to_string(path).map_err(|source| CompileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut driver = Driver::new(natives);
    // Track the entry like any other unit so a USING that loops back to
    // it reports a cycle instead of compiling the entry twice.
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    driver.in_progress.push(canonical);
    driver.process_unit(path.to_path_buf(), source, path.parent().map(Path::to_path_buf));
    driver.in_progress.pop();
    driver.finish()
}

/// Compile a single unit from memory. USING is unavailable without a
/// file context and reports `InvalidUsingPath`.
pub fn compile_source(
    name: &str,
    source: &str,
    natives: Option<&NativeDb>,
) -> Result<CompileOutput, CompileError> {
    let mut driver = Driver::new(natives);
    driver.process_unit(PathBuf::from(name), source.to_string(), None);
    driver.finish()
}

struct CompiledUnit {
    analysis: Analysis,
    table: SymbolTable,
}

struct Driver<'a> {
    pool: TypePool,
    diags: Diagnostics,
    sources: SourceMap,
    /// Dependency-first; the entry unit lands last.
    units: Vec<CompiledUnit>,
    /// Canonical path → unit index (`None` for units that failed to load).
    cache: HashMap<PathBuf, Option<usize>>,
    in_progress: Vec<PathBuf>,
    statics_cursor: u32,
    natives: Option<&'a NativeDb>,
}

impl<'a> Driver<'a> {
    fn new(natives: Option<&'a NativeDb>) -> Self {
        Self {
            pool: TypePool::new(),
            diags: Diagnostics::new(),
            sources: SourceMap::new(),
            units: Vec::new(),
            cache: HashMap::new(),
            in_progress: Vec::new(),
            statics_cursor: 0,
            natives,
        }
    }

    /// Load and compile a USING dependency.
    fn load_unit(&mut self, path: &Path, requested_at: SourceRange) -> Option<usize> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if let Some(&cached) = self.cache.get(&canonical) {
            return cached;
        }
        if self.in_progress.contains(&canonical) {
            self.diags.error(
                DiagnosticKind::InvalidUsingPath,
                requested_at,
                format!("circular USING of '{}'", path.display()),
            );
            return None;
        }

        let source = match std::fs::read_to_string(path) {
            Ok(source) => source,
            Err(err) => {
                self.diags.error(
                    DiagnosticKind::InvalidUsingPath,
                    requested_at,
                    format!("cannot read '{}': {err}", path.display()),
                );
                self.cache.insert(canonical, None);
                return None;
            }
        };

        self.in_progress.push(canonical.clone());
        let index = self.process_unit(
            path.to_path_buf(),
            source,
            path.parent().map(Path::to_path_buf),
        );
        self.in_progress.pop();
        self.cache.insert(canonical, Some(index));
        Some(index)
    }

    /// Compile one unit: parse, resolve imports, run both passes.
    fn process_unit(&mut self, path: PathBuf, source: String, base_dir: Option<PathBuf>) -> usize {
        debug!(unit = %path.display(), "compiling unit");
        let file_id = self.sources.add_file(path, source);
        let file = self.sources.file(file_id).clone();

        let (tokens, lex_errors) = scriptlang_lexer::tokenize(&file.source);
        let (unit, parse_errors) = scriptlang_parser::parse(&tokens, &lex_errors, file_id, &file);
        for err in parse_errors {
            self.diags
                .error(DiagnosticKind::Syntax, err.range, err.message);
        }

        let mut table = SymbolTable::with_builtins(&mut self.pool);

        // Resolve imports before registration so USING symbols are
        // visible to this unit's own declarations.
        for decl in &unit.decls {
            let Decl::Using { path, range } = decl else {
                continue;
            };
            match &base_dir {
                Some(dir) => {
                    if let Some(dep) = self.load_unit(&dir.join(path), *range) {
                        let dep_table = std::mem::take(&mut self.units[dep].table);
                        table.import(&dep_table, &mut self.diags);
                        self.units[dep].table = dep_table;
                    }
                }
                None => {
                    self.diags.error(
                        DiagnosticKind::InvalidUsingPath,
                        *range,
                        "USING requires a file-based compile",
                    );
                }
            }
        }

        let first = first_pass::run(
            &unit,
            &mut self.pool,
            &mut table,
            &mut self.diags,
            self.statics_cursor,
        );
        self.statics_cursor += first.script.statics_size;

        let functions = second_pass::run(
            &unit,
            &first.functions,
            &mut self.pool,
            &mut table,
            &mut self.diags,
        );

        self.check_declared_natives(&unit);

        self.units.push(CompiledUnit {
            analysis: Analysis {
                script: first.script,
                functions,
                statics: first.statics,
                owned_globals: first.owned_globals,
            },
            table,
        });
        self.units.len() - 1
    }

    /// With a native database present, a declared native whose hash the
    /// database does not know is suspicious — warn, don't fail.
    fn check_declared_natives(&mut self, unit: &scriptlang_ast::Unit) {
        let Some(db) = self.natives else { return };
        for decl in &unit.decls {
            let Decl::Function(func) = decl else { continue };
            if func.provenance != FunctionProvenance::Native {
                continue;
            }
            let hash = native_hash(&func.name);
            if !db.contains(hash) {
                self.diags.warning(
                    DiagnosticKind::UndeclaredName,
                    func.name_range,
                    format!(
                        "native '{}' ({hash:#018x}) is not in the native database",
                        func.name
                    ),
                );
            }
        }
    }

    fn finish(self) -> Result<CompileOutput, CompileError> {
        if self.diags.has_errors() {
            info!(
                errors = self.diags.error_count(),
                "compilation failed; emitter skipped"
            );
            return Ok(CompileOutput {
                program: None,
                diagnostics: self.diags,
                sources: self.sources,
            });
        }

        let unit_refs: Vec<UnitCodegen> = self
            .units
            .iter()
            .map(|u| UnitCodegen {
                analysis: &u.analysis,
                table: &u.table,
            })
            .collect();
        let program = scriptlang_codegen::generate(&unit_refs, &self.pool)?;
        info!(
            script = %program.name,
            code_bytes = program.code_size(),
            "compilation succeeded"
        );

        Ok(CompileOutput {
            program: Some(program),
            diagnostics: self.diags,
            sources: self.sources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_source_minimal() {
        let output = compile_source("t.sc", "SCRIPT_NAME t\nPROC MAIN()\nENDPROC\n", None).unwrap();
        assert!(output.succeeded());
        assert!(output.diagnostics.is_empty());
    }

    #[test]
    fn test_errors_suppress_program() {
        let output = compile_source("t.sc", "PROC MAIN()\nx = 1\nENDPROC\n", None).unwrap();
        assert!(output.program.is_none());
        assert!(output.diagnostics.has_errors());
    }

    #[test]
    fn test_using_without_file_context() {
        let output =
            compile_source("t.sc", "USING \"other.sch\"\nPROC MAIN()\nENDPROC\n", None).unwrap();
        assert!(output.diagnostics.has_errors());
        assert!(output
            .diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::InvalidUsingPath));
    }

    #[test]
    fn test_diagnostics_render_format() {
        let output = compile_source("my.sc", "PROC MAIN()\ny = 1\nENDPROC\n", None).unwrap();
        let rendered = output.diagnostics.render(&output.sources);
        assert!(rendered.contains("my.sc(2,1): error:"), "{rendered}");
    }
}
