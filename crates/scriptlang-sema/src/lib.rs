// Allow unwrap in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Semantic analysis for ScriptLang.
//!
//! # Pipeline Position
//!
//! ```text
//! Lex → Parse → First Pass → Second Pass → Code Generation
//!               ^^^^^^^^^^^^^^^^^^^^^^^^
//!                      THIS CRATE
//! ```
//!
//! - `types` — the type arena ([`TypePool`]) and assignability rules
//! - `symbol` — symbol arena, scope chain, cross-unit import
//! - `first_pass` — registration, type resolution, constant folding,
//!   static/global layout
//! - `bind` — expression typing (AST → bound expression)
//! - `second_pass` — statement checks, frame layout, bound functions
//! - `const_eval` — the constant-expression interpreter
//! - `bound` — the bound tree handed to the emitter

pub mod bind;
pub mod bound;
pub mod const_eval;
pub mod first_pass;
pub mod second_pass;
pub mod symbol;
pub mod types;

pub use bound::{BoundCase, BoundExpr, BoundExprKind, BoundFunction, BoundStmt};
pub use const_eval::ConstValue;
pub use first_pass::{native_hash, PendingFunction, ScriptInfo};
pub use symbol::{
    FunctionKind, FunctionSymbol, Symbol, SymbolId, SymbolTable, TypeSymbol, VarKind,
    VariableSymbol,
};
pub use types::{ArrayLen, BasicKind, FunctionType, Param, StructField, Type, TypeId, TypePool};

use scriptlang_ast::{Diagnostics, Unit};

/// The result of analysing one unit: everything the emitter needs besides
/// the pool and table themselves.
#[derive(Debug)]
pub struct Analysis {
    pub script: ScriptInfo,
    pub functions: Vec<BoundFunction>,
    /// Statics in slot order.
    pub statics: Vec<SymbolId>,
    /// Owned-block globals in offset order.
    pub owned_globals: Vec<SymbolId>,
}

/// Run both passes over one unit.
///
/// The table must already hold built-ins ([`SymbolTable::with_builtins`])
/// and any symbols imported through USING.
pub fn analyze_unit(
    unit: &Unit,
    pool: &mut TypePool,
    table: &mut SymbolTable,
    diags: &mut Diagnostics,
) -> Analysis {
    let first = first_pass::run(unit, pool, table, diags, 0);
    let functions = second_pass::run(unit, &first.functions, pool, table, diags);
    Analysis {
        script: first.script,
        functions,
        statics: first.statics,
        owned_globals: first.owned_globals,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptlang_ast::span::SourceFile;
    use scriptlang_ast::DiagnosticKind;
    use std::path::PathBuf;

    fn analyze(source: &str) -> (Analysis, TypePool, SymbolTable, Diagnostics) {
        let file = SourceFile::new(PathBuf::from("test.sc"), source.to_string());
        let (tokens, lex_errors) = scriptlang_lexer::tokenize(source);
        let (unit, parse_errors) = scriptlang_parser::parse(&tokens, &lex_errors, 0, &file);
        assert!(
            parse_errors.is_empty(),
            "unexpected parse errors: {parse_errors:?}"
        );

        let mut pool = TypePool::new();
        let mut table = SymbolTable::with_builtins(&mut pool);
        let mut diags = Diagnostics::new();
        let analysis = analyze_unit(&unit, &mut pool, &mut table, &mut diags);
        (analysis, pool, table, diags)
    }

    fn kinds(diags: &Diagnostics) -> Vec<DiagnosticKind> {
        diags.iter().map(|d| d.kind).collect()
    }

    #[test]
    fn test_minimal_script() {
        let (analysis, _, table, diags) = analyze("SCRIPT_NAME t\nPROC MAIN()\nENDPROC\n");
        assert!(diags.is_empty(), "{:?}", kinds(&diags));
        assert_eq!(analysis.script.name, "t");
        assert_eq!(analysis.functions.len(), 1);
        let Symbol::Function(main) = table.get(analysis.functions[0].symbol) else {
            panic!("expected function symbol");
        };
        assert_eq!(main.args_size, 0);
        assert_eq!(main.locals_size, 0);
    }

    #[test]
    fn test_mutual_recursion_needs_no_forward_declaration() {
        let source = "\
SCRIPT_NAME t
FUNC INT A(INT n)
RETURN B(n)
ENDFUNC
FUNC INT B(INT n)
RETURN A(n)
ENDFUNC
";
        let (analysis, _, _, diags) = analyze(source);
        assert!(diags.is_empty(), "{:?}", kinds(&diags));
        assert_eq!(analysis.functions.len(), 2);
    }

    #[test]
    fn test_mutually_recursive_structs_through_arrays() {
        let source = "\
STRUCT OUTER
    INNER items[2]
ENDSTRUCT
STRUCT INNER
    FLOAT weight
ENDSTRUCT
PROC MAIN()
ENDPROC
";
        let (_, pool, table, diags) = analyze(source);
        assert!(diags.is_empty(), "{:?}", kinds(&diags));
        let Some(Symbol::Type(outer)) = table.lookup("OUTER").map(|id| table.get(id)) else {
            panic!("OUTER not registered");
        };
        // 1 length slot + 2 × (1 float)
        assert_eq!(pool.size_of(outer.ty), 3);
    }

    #[test]
    fn test_circular_struct_reports_once() {
        let (_, _, _, diags) = analyze("STRUCT A\n    A b\nENDSTRUCT\nPROC MAIN()\nENDPROC\n");
        assert_eq!(kinds(&diags), vec![DiagnosticKind::CircularType]);
    }

    #[test]
    fn test_constant_chain_folds_out_of_order() {
        let source = "\
CONST INT X = Y + 1
CONST INT Y = 2
PROC MAIN()
ENDPROC
";
        let (_, _, table, diags) = analyze(source);
        assert!(diags.is_empty(), "{:?}", kinds(&diags));
        let Some(Symbol::Variable(x)) = table.lookup("X").map(|id| table.get(id)) else {
            panic!("X not registered");
        };
        assert_eq!(x.const_value(), Some(&ConstValue::Int(3)));
    }

    #[test]
    fn test_self_referential_constant() {
        let source = "\
CONST INT X = Y + 1
CONST INT Y = 2
CONST INT Z = Z + 1
PROC MAIN()
ENDPROC
";
        let (_, _, table, diags) = analyze(source);
        assert_eq!(kinds(&diags), vec![DiagnosticKind::CircularConstant]);
        // X and Y still folded.
        let Some(Symbol::Variable(x)) = table.lookup("X").map(|id| table.get(id)) else {
            panic!("X not registered");
        };
        assert_eq!(x.const_value(), Some(&ConstValue::Int(3)));
    }

    #[test]
    fn test_frame_layout() {
        let source = "\
FUNC INT F(INT a, VEC3 v)
    INT local1
    INT arr[3]
    RETURN a
ENDFUNC
";
        let (analysis, _, table, diags) = analyze(source);
        assert!(diags.is_empty(), "{:?}", kinds(&diags));
        let Symbol::Function(f) = table.get(analysis.functions[0].symbol) else {
            panic!("expected function symbol");
        };
        // args: INT(1) + VEC3(3); locals: INT(1) + INT[3](4)
        assert_eq!(f.args_size, 4);
        assert_eq!(f.locals_size, 5);
    }

    #[test]
    fn test_static_vector_initializer_folds_to_cells() {
        let source = "\
SCRIPT_NAME t
VEC3 origin = <<1.0, 2.0, 3.0>>
PROC MAIN()
ENDPROC
";
        let (analysis, _, table, diags) = analyze(source);
        assert!(diags.is_empty(), "{:?}", kinds(&diags));
        let Symbol::Variable(origin) = table.get(analysis.statics[0]) else {
            panic!("expected variable");
        };
        assert_eq!(
            origin.init,
            Some(vec![
                ConstValue::Float(1.0),
                ConstValue::Float(2.0),
                ConstValue::Float(3.0)
            ])
        );
        assert_eq!(analysis.script.statics_size, 3);
    }

    #[test]
    fn test_global_block_layout() {
        let source = "\
SCRIPT_NAME owner_script
GLOBAL 3 owner_script
    INT g_counter
    VEC3 g_pos
ENDGLOBAL
PROC MAIN()
ENDPROC
";
        let (analysis, _, table, diags) = analyze(source);
        assert!(diags.is_empty(), "{:?}", kinds(&diags));
        assert_eq!(analysis.script.globals_block, Some(3));
        assert_eq!(analysis.script.globals_size, 4);
        let Symbol::Variable(counter) = table.get(analysis.owned_globals[0]) else {
            panic!("expected variable");
        };
        assert_eq!(counter.slot, Some(3 << 18));
    }

    #[test]
    fn test_static_may_not_be_ref() {
        let (_, _, _, diags) = analyze("INT& r\nPROC MAIN()\nENDPROC\n");
        assert!(kinds(&diags).contains(&DiagnosticKind::TypeMismatch));
    }

    #[test]
    fn test_global_may_not_be_ref() {
        let source = "\
SCRIPT_NAME t
GLOBAL 1 t
    INT& bad
ENDGLOBAL
PROC MAIN()
ENDPROC
";
        let (_, _, _, diags) = analyze(source);
        assert!(kinds(&diags).contains(&DiagnosticKind::InvalidGlobalType));
    }

    #[test]
    fn test_string_static_initializer_rejected() {
        let (_, _, _, diags) = analyze("STRING s = \"hi\"\nPROC MAIN()\nENDPROC\n");
        assert!(kinds(&diags).contains(&DiagnosticKind::InvalidStaticInitializer));
    }

    #[test]
    fn test_undeclared_name() {
        let (_, _, _, diags) = analyze("PROC MAIN()\nx = 1\nENDPROC\n");
        assert!(kinds(&diags).contains(&DiagnosticKind::UndeclaredName));
    }

    #[test]
    fn test_arity_mismatch() {
        let source = "\
PROC TAKES_TWO(INT a, INT b)
ENDPROC
PROC MAIN()
    TAKES_TWO(1)
ENDPROC
";
        let (_, _, _, diags) = analyze(source);
        assert!(kinds(&diags).contains(&DiagnosticKind::ArityMismatch));
    }

    #[test]
    fn test_duplicate_case() {
        let source = "\
CONST INT TWO = 2
PROC MAIN()
    INT v
    SWITCH v
    CASE 2
        BREAK
    CASE TWO
        BREAK
    ENDSWITCH
ENDPROC
";
        let (_, _, _, diags) = analyze(source);
        assert!(kinds(&diags).contains(&DiagnosticKind::DuplicateCase));
    }

    #[test]
    fn test_missing_return() {
        let source = "\
FUNC INT F(BOOL flag)
    IF flag
        RETURN 1
    ENDIF
ENDFUNC
";
        let (_, _, _, diags) = analyze(source);
        assert!(kinds(&diags).contains(&DiagnosticKind::MissingReturn));
    }

    #[test]
    fn test_return_both_branches_ok() {
        let source = "\
FUNC INT F(BOOL flag)
    IF flag
        RETURN 1
    ELSE
        RETURN 2
    ENDIF
ENDFUNC
";
        let (_, _, _, diags) = analyze(source);
        assert!(diags.is_empty(), "{:?}", kinds(&diags));
    }

    #[test]
    fn test_member_access_and_unknown_member() {
        let source = "\
STRUCT P
    FLOAT x, y, z
ENDSTRUCT
PROC MAIN()
    P p
    p.y = 1.0
    p.w = 2.0
ENDPROC
";
        let (_, _, _, diags) = analyze(source);
        assert_eq!(kinds(&diags), vec![DiagnosticKind::UnknownMember]);
    }

    #[test]
    fn test_no_int_float_widening() {
        let source = "\
PROC MAIN()
    FLOAT f
    f = 1
ENDPROC
";
        let (_, _, _, diags) = analyze(source);
        assert!(kinds(&diags).contains(&DiagnosticKind::TypeMismatch));
    }

    #[test]
    fn test_assign_through_ref_any_forbidden() {
        let source = "\
PROC TAKE(ANY& slot)
    slot = 1
ENDPROC
";
        let (_, _, _, diags) = analyze(source);
        assert!(kinds(&diags).contains(&DiagnosticKind::TypeMismatch));
    }

    #[test]
    fn test_native_gets_hash() {
        let (_, _, table, diags) = analyze("NATIVE FUNC INT GET_GAME_TIMER()\nPROC MAIN()\nENDPROC\n");
        assert!(diags.is_empty(), "{:?}", kinds(&diags));
        let Some(Symbol::Function(native)) =
            table.lookup("GET_GAME_TIMER").map(|id| table.get(id))
        else {
            panic!("native not registered");
        };
        assert_eq!(native.kind, FunctionKind::Native(native_hash("GET_GAME_TIMER")));
    }

    #[test]
    fn test_array_length_from_constant() {
        let source = "\
CONST INT SIZE = 4
INT table[SIZE]
PROC MAIN()
ENDPROC
";
        let (analysis, pool, table, diags) = analyze(source);
        assert!(diags.is_empty(), "{:?}", kinds(&diags));
        let Symbol::Variable(arr) = table.get(analysis.statics[0]) else {
            panic!("expected variable");
        };
        assert_eq!(pool.size_of(arr.ty), 5);
    }

    #[test]
    fn test_bound_exprs_carry_resolved_types() {
        let source = "\
FUNC INT ADD(INT a, INT b)
    RETURN a + b
ENDFUNC
";
        let (analysis, pool, _, diags) = analyze(source);
        assert!(diags.is_empty(), "{:?}", kinds(&diags));
        let BoundStmt::Return(Some(expr)) = &analysis.functions[0].body[0] else {
            panic!("expected return");
        };
        assert!(!pool.is_unresolved(expr.ty));
        assert_eq!(expr.ty, TypePool::INT);
    }
}
