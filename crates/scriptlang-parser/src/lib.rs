// Allow unwrap in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Hand-written recursive descent parser for ScriptLang.
//!
//! # Architecture
//!
//! - `stream`: token stream wrapper with lookahead and recovery helpers
//! - `error`: [`ParseError`] and its categories
//! - `expr`: Pratt expression parser (precedence climbing)
//! - `stmt`: statement parsers (line-terminated grammar)
//! - `decl`: top-level declaration parsers (keyword-dispatched)
//!
//! # Public API
//!
//! [`parse`] takes the lexer output for one file and produces a
//! [`Unit`](scriptlang_ast::Unit) plus all parse errors — parsing never
//! aborts at the first problem.

mod decl;
mod error;
mod expr;
mod stmt;
mod stream;

pub use error::{ParseError, ParseErrorKind};
pub use stream::TokenStream;

use scriptlang_ast::span::{FileId, SourceFile};
use scriptlang_ast::Unit;
use scriptlang_lexer::Token;
use std::ops::Range;

/// Parse one translation unit from its token stream.
///
/// `lex_errors` (byte spans the lexer rejected) are folded into the error
/// list so the caller reports everything in one place.
pub fn parse(
    tokens: &[(Token, Range<usize>)],
    lex_errors: &[Range<usize>],
    file_id: FileId,
    file: &SourceFile,
) -> (Unit, Vec<ParseError>) {
    let mut stream = TokenStream::new(tokens, file_id, file);
    let (unit, mut errors) = decl::parse_unit(&mut stream);

    for span in lex_errors {
        let range = scriptlang_ast::SourceRange::new(
            file_id,
            file.position(span.start as u32),
            file.position(span.end as u32),
        );
        errors.push(ParseError::bad_token(range));
    }

    (unit, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptlang_ast::{Decl, ExprKind, FunctionProvenance, Stmt, TypeWrapper};
    use std::path::PathBuf;

    fn parse_source(source: &str) -> (Unit, Vec<ParseError>) {
        let file = SourceFile::new(PathBuf::from("test.sc"), source.to_string());
        let (tokens, lex_errors) = scriptlang_lexer::tokenize(source);
        parse(&tokens, &lex_errors, 0, &file)
    }

    fn parse_ok(source: &str) -> Unit {
        let (unit, errors) = parse_source(source);
        assert!(errors.is_empty(), "unexpected parse errors: {errors:?}");
        unit
    }

    #[test]
    fn test_minimal_script() {
        let unit = parse_ok("SCRIPT_NAME t\nPROC MAIN()\nENDPROC\n");
        assert_eq!(unit.decls.len(), 2);
        assert!(matches!(&unit.decls[0], Decl::ScriptName { name, .. } if name == "t"));
        let Decl::Function(f) = &unit.decls[1] else {
            panic!("expected function");
        };
        assert_eq!(f.name, "MAIN");
        assert_eq!(f.provenance, FunctionProvenance::Defined);
        assert!(f.ret.is_none());
        assert!(f.body.as_ref().unwrap().is_empty());
    }

    #[test]
    fn test_func_with_params_and_return() {
        let unit = parse_ok("FUNC INT ADD(INT a, INT b)\nRETURN a + b\nENDFUNC\n");
        let Decl::Function(f) = &unit.decls[0] else {
            panic!("expected function");
        };
        assert_eq!(f.params.len(), 2);
        assert!(f.ret.is_some());
        let body = f.body.as_ref().unwrap();
        assert!(matches!(&body[0], Stmt::Return { value: Some(_), .. }));
    }

    #[test]
    fn test_struct_with_multi_declarators() {
        let unit = parse_ok("STRUCT P\nFLOAT x, y, z\nENDSTRUCT\n");
        let Decl::Struct { name, fields, .. } = &unit.decls[0] else {
            panic!("expected struct");
        };
        assert_eq!(name, "P");
        let names: Vec<_> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_declarator_wrappers() {
        let unit = parse_ok("INT x[4]\nINT& r\n");
        let Decl::Static(x) = &unit.decls[0] else {
            panic!("expected static");
        };
        assert!(matches!(x.ty.wrappers[0], TypeWrapper::Array(_)));
        let Decl::Static(r) = &unit.decls[1] else {
            panic!("expected static");
        };
        assert!(matches!(r.ty.wrappers[0], TypeWrapper::Ref));
    }

    #[test]
    fn test_if_else() {
        let unit = parse_ok(
            "PROC MAIN()\nIF x > 0\ny = 1\nELSE\ny = 2\nENDIF\nENDPROC\n",
        );
        let Decl::Function(f) = &unit.decls[0] else {
            panic!("expected function");
        };
        let Stmt::If {
            then_body,
            else_body,
            ..
        } = &f.body.as_ref().unwrap()[0]
        else {
            panic!("expected IF");
        };
        assert_eq!(then_body.len(), 1);
        assert_eq!(else_body.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_switch_cases() {
        let unit = parse_ok(
            "PROC MAIN()\nSWITCH v\nCASE 1\nBREAK\nCASE 2\nBREAK\nDEFAULT\nBREAK\nENDSWITCH\nENDPROC\n",
        );
        let Decl::Function(f) = &unit.decls[0] else {
            panic!("expected function");
        };
        let Stmt::Switch { cases, default, .. } = &f.body.as_ref().unwrap()[0] else {
            panic!("expected SWITCH");
        };
        assert_eq!(cases.len(), 2);
        assert!(default.is_some());
    }

    #[test]
    fn test_repeat() {
        let unit = parse_ok("PROC MAIN()\nREPEAT 10 i\nfoo(i)\nENDREPEAT\nENDPROC\n");
        let Decl::Function(f) = &unit.decls[0] else {
            panic!("expected function");
        };
        assert!(matches!(
            &f.body.as_ref().unwrap()[0],
            Stmt::Repeat { .. }
        ));
    }

    #[test]
    fn test_vector_literal() {
        let unit = parse_ok("VEC3 v = <<1.0, 2.0, 3.0>>\n");
        let Decl::Static(v) = &unit.decls[0] else {
            panic!("expected static");
        };
        let ExprKind::Vector(parts) = &v.init.as_ref().unwrap().kind else {
            panic!("expected vector literal");
        };
        assert_eq!(parts.len(), 3);
    }

    #[test]
    fn test_native_and_proto() {
        let unit = parse_ok("NATIVE FUNC INT GET_GAME_TIMER()\nPROTO PROC CALLBACK(INT arg)\n");
        let Decl::Function(native) = &unit.decls[0] else {
            panic!("expected function");
        };
        assert_eq!(native.provenance, FunctionProvenance::Native);
        assert!(native.body.is_none());
        let Decl::Function(proto) = &unit.decls[1] else {
            panic!("expected function");
        };
        assert_eq!(proto.provenance, FunctionProvenance::Prototype);
    }

    #[test]
    fn test_global_block() {
        let unit = parse_ok("GLOBAL 3 main_script\nINT g_counter\nVEC3 g_pos\nENDGLOBAL\n");
        let Decl::Global { block, owner, vars, .. } = &unit.decls[0] else {
            panic!("expected global block");
        };
        assert_eq!(*block, 3);
        assert_eq!(owner, "main_script");
        assert_eq!(vars.len(), 2);
    }

    #[test]
    fn test_const_requires_initializer() {
        let (_, errors) = parse_source("CONST INT X\n");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("initializer"));
    }

    #[test]
    fn test_error_recovery_continues() {
        // First line is garbage; the PROC after it must still parse.
        let (unit, errors) = parse_source("CONST\nPROC MAIN()\nENDPROC\n");
        assert!(!errors.is_empty());
        assert!(unit
            .decls
            .iter()
            .any(|d| matches!(d, Decl::Function(f) if f.name == "MAIN")));
    }

    #[test]
    fn test_compound_assignment() {
        let unit = parse_ok("PROC MAIN()\nx += 1\nENDPROC\n");
        let Decl::Function(f) = &unit.decls[0] else {
            panic!("expected function");
        };
        assert!(matches!(
            &f.body.as_ref().unwrap()[0],
            Stmt::Assign { op: Some(_), .. }
        ));
    }

    #[test]
    fn test_bare_invocation_statement() {
        let unit = parse_ok("PROC MAIN()\nDO_THING(1, 2)\nENDPROC\n");
        let Decl::Function(f) = &unit.decls[0] else {
            panic!("expected function");
        };
        assert!(matches!(&f.body.as_ref().unwrap()[0], Stmt::Invoke { .. }));
    }

    #[test]
    fn test_non_invocation_expression_statement_is_error() {
        let (_, errors) = parse_source("PROC MAIN()\nx + 1\nENDPROC\n");
        assert!(errors
            .iter()
            .any(|e| e.message.contains("must be an invocation")));
    }
}
