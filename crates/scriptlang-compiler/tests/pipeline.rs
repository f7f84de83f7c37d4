//! End-to-end pipeline tests: source text in, program or diagnostics
//! out.

use scriptlang_compiler::{compile_file, compile_source};
use scriptlang_vm::encode;
use scriptlang_vm::Opcode;

fn compile_ok(source: &str) -> scriptlang_vm::Program {
    let output = compile_source("test.sc", source, None).expect("pipeline error");
    let rendered = output.diagnostics.render(&output.sources);
    assert!(output.succeeded(), "compile failed:\n{rendered}");
    output.program.expect("program missing on success")
}

fn compile_errors(source: &str) -> scriptlang_ast::Diagnostics {
    let output = compile_source("test.sc", source, None).expect("pipeline error");
    assert!(output.program.is_none(), "expected a failed compile");
    output.diagnostics
}

/// Decode a flat code stream into (offset, opcode) pairs.
fn decode(code: &[u8]) -> Vec<(usize, Opcode)> {
    let mut out = Vec::new();
    let mut at = 0;
    while at < code.len() {
        let op = Opcode::from_byte(code[at]).expect("undecodable output");
        out.push((at, op));
        at += Opcode::instruction_len(code, at).expect("truncated output");
    }
    out
}

#[test]
fn minimal_script_compiles_to_enter_leave() {
    let program = compile_ok("SCRIPT_NAME t\nPROC MAIN()\nENDPROC\n");
    let code = program.flat_code();
    assert_eq!(
        code,
        vec![
            Opcode::Enter as u8,
            0,
            2,
            0,
            1,
            b't',
            Opcode::Leave as u8,
            0,
            0
        ]
    );
}

#[test]
fn mutual_recursion_binds_calls_both_ways() {
    let source = "\
SCRIPT_NAME t
PROC MAIN()
ENDPROC
FUNC INT A(INT n)
    RETURN B(n)
ENDFUNC
FUNC INT B(INT n)
    RETURN A(n)
ENDFUNC
";
    let program = compile_ok(source);
    let code = program.flat_code();
    let ops = decode(&code);

    let enters: Vec<usize> = ops
        .iter()
        .filter(|(_, op)| *op == Opcode::Enter)
        .map(|(at, _)| *at)
        .collect();
    let calls: Vec<usize> = ops
        .iter()
        .filter(|(_, op)| *op == Opcode::Call)
        .map(|(at, _)| encode::read_u24(&code, at + 1) as usize)
        .collect();

    assert_eq!(enters.len(), 3);
    assert_eq!(calls, vec![enters[2], enters[1]]);
}

#[test]
fn struct_and_vector_global_image() {
    let source = "\
SCRIPT_NAME t
STRUCT P
    FLOAT x, y, z
ENDSTRUCT
GLOBAL 1 t
    P p = <<1.0, 2.0, 3.0>>
ENDGLOBAL
PROC MAIN()
    p.y = 4.0
ENDPROC
";
    let program = compile_ok(source);
    // p.y sits at offset 1 of the block image and holds 2.0.
    assert_eq!(program.globals.len(), 3);
    assert_eq!(program.globals[1], 2.0f32.to_bits() as u64);

    // The store to p.y goes through the field offset.
    let code = program.flat_code();
    assert!(code.contains(&(Opcode::IoffsetU8 as u8)));
}

#[test]
fn circular_struct_fails_without_output() {
    let diags = compile_errors("STRUCT A\n    A b\nENDSTRUCT\nPROC MAIN()\nENDPROC\n");
    let kinds: Vec<_> = diags.iter().map(|d| d.kind).collect();
    assert_eq!(kinds, vec![scriptlang_ast::DiagnosticKind::CircularType]);
}

#[test]
fn constant_chain_folds_regardless_of_order() {
    let source = "\
SCRIPT_NAME t
CONST INT X = Y + 1
CONST INT Y = 2
INT s = X
PROC MAIN()
ENDPROC
";
    let program = compile_ok(source);
    assert_eq!(program.statics, vec![3]);
}

#[test]
fn self_referential_constant_fails_alone() {
    let source = "\
SCRIPT_NAME t
CONST INT X = Y + 1
CONST INT Y = 2
CONST INT Z = Z + 1
PROC MAIN()
ENDPROC
";
    let diags = compile_errors(source);
    let kinds: Vec<_> = diags.iter().map(|d| d.kind).collect();
    assert_eq!(
        kinds,
        vec![scriptlang_ast::DiagnosticKind::CircularConstant]
    );
}

#[test]
fn switch_emits_count_entries_and_default_jump() {
    let source = "\
SCRIPT_NAME t
PROC MAIN()
    INT v
    SWITCH v
    CASE 10
        BREAK
    CASE 20
        BREAK
    CASE 30
        BREAK
    DEFAULT
        v = 0
    ENDSWITCH
ENDPROC
";
    let program = compile_ok(source);
    let code = program.flat_code();
    let ops = decode(&code);
    let (switch_at, _) = ops
        .iter()
        .find(|(_, op)| *op == Opcode::Switch)
        .expect("SWITCH missing");

    // count byte, then exactly 3 × 6 operand bytes.
    assert_eq!(code[switch_at + 1], 3);
    assert_eq!(
        Opcode::instruction_len(&code, *switch_at),
        Some(2 + 3 * 6)
    );
    // Terminating J to the default body.
    let j_at = switch_at + 2 + 3 * 6;
    assert_eq!(code[j_at], Opcode::J as u8);
}

#[test]
fn frame_size_matches_enter_operand() {
    // Invariant: args + 2 + locals is the declared frame size.
    let source = "\
SCRIPT_NAME t
PROC MAIN()
ENDPROC
FUNC INT F(INT a, INT b)
    INT x
    VEC3 v
    RETURN x
ENDFUNC
";
    let program = compile_ok(source);
    let code = program.flat_code();
    let ops = decode(&code);
    let f_enter = ops
        .iter()
        .filter(|(_, op)| *op == Opcode::Enter)
        .nth(1)
        .map(|(at, _)| *at)
        .expect("F's ENTER missing");
    assert_eq!(code[f_enter + 1], 2); // args
    assert_eq!(encode::read_u16(&code, f_enter + 2), 2 + 2 + 4); // frame
}

#[test]
fn repeat_lowering_counts_up() {
    let source = "\
SCRIPT_NAME t
PROC MAIN()
    INT i
    INT total
    REPEAT 10 i
        total = total + 1
    ENDREPEAT
ENDPROC
";
    let program = compile_ok(source);
    let code = program.flat_code();
    // The loop gate fuses into ILT_JZ and the back edge is a J.
    assert!(code.contains(&(Opcode::IltJz as u8)));
    assert!(code.contains(&(Opcode::J as u8)));
}

#[test]
fn logical_and_short_circuits() {
    let source = "\
SCRIPT_NAME t
PROC MAIN()
    BOOL a
    BOOL b
    IF a AND b
        a = FALSE
    ENDIF
ENDPROC
";
    let program = compile_ok(source);
    let code = program.flat_code();
    let ops = decode(&code);
    assert!(ops.iter().any(|(_, op)| *op == Opcode::Dup));
    assert!(ops.iter().filter(|(_, op)| *op == Opcode::Jz).count() >= 2);
}

#[test]
fn warnings_do_not_fail_the_build() {
    // An unknown native with a database present warns but compiles.
    let db = scriptlang_vm::NativeDb::new(vec![]);
    let output = compile_source(
        "t.sc",
        "SCRIPT_NAME t\nNATIVE PROC MYSTERY()\nPROC MAIN()\n    MYSTERY()\nENDPROC\n",
        Some(&db),
    )
    .unwrap();
    assert!(output.succeeded());
    assert_eq!(output.diagnostics.len(), 1);
}

#[test]
fn using_imports_and_compiles_dependencies() {
    let dir = std::env::temp_dir().join(format!("slang_using_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();

    let lib = "\
CONST INT LIMIT = 3
FUNC INT DOUBLE(INT n)
    RETURN n * 2
ENDFUNC
";
    let main = "\
SCRIPT_NAME app
USING \"lib.sch\"
INT result
PROC MAIN()
    result = DOUBLE(LIMIT)
ENDPROC
";
    std::fs::write(dir.join("lib.sch"), lib).unwrap();
    std::fs::write(dir.join("app.sc"), main).unwrap();

    let output = compile_file(&dir.join("app.sc"), None).unwrap();
    let rendered = output.diagnostics.render(&output.sources);
    assert!(output.succeeded(), "compile failed:\n{rendered}");

    let program = output.program.unwrap();
    assert_eq!(program.name, "app");
    // DOUBLE's body is part of the program: one CALL, two ENTERs.
    let code = program.flat_code();
    let ops = decode(&code);
    assert_eq!(ops.iter().filter(|(_, op)| *op == Opcode::Enter).count(), 2);
    assert_eq!(ops.iter().filter(|(_, op)| *op == Opcode::Call).count(), 1);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn circular_using_is_reported() {
    let dir = std::env::temp_dir().join(format!("slang_cycle_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();

    std::fs::write(dir.join("a.sch"), "USING \"b.sch\"\nCONST INT A = 1\n").unwrap();
    std::fs::write(dir.join("b.sch"), "USING \"a.sch\"\nCONST INT B = 2\n").unwrap();
    std::fs::write(
        dir.join("main.sc"),
        "SCRIPT_NAME m\nUSING \"a.sch\"\nPROC MAIN()\nENDPROC\n",
    )
    .unwrap();

    let output = compile_file(&dir.join("main.sc"), None).unwrap();
    assert!(output
        .diagnostics
        .iter()
        .any(|d| d.kind == scriptlang_ast::DiagnosticKind::InvalidUsingPath));

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn disassembly_round_trip_preserves_program_facts() {
    let source = "\
SCRIPT_NAME roundtrip
SCRIPT_HASH 0x1234
STRUCT P
    FLOAT x, y, z
ENDSTRUCT
GLOBAL 2 roundtrip
    P origin = <<1.0, 2.0, 3.0>>
ENDGLOBAL
INT counter
NATIVE FUNC INT GET_GAME_TIMER()
PROC MAIN()
    counter = GET_GAME_TIMER()
ENDPROC
";
    let program = compile_ok(source);
    let listing = scriptlang_disasm::disassemble(&program, None).expect("disassembly failed");

    assert!(listing.contains(".script roundtrip"));
    assert!(listing.contains(".hash 0x00001234"));
    assert!(listing.contains(".globals block 2"));
    assert!(listing.contains("main:"));
    // 2.0 sits in the middle of the vector image.
    assert!(listing.contains(&format!(".int {}", 2.0f32.to_bits())));
    // The native hash survives as a fallback name.
    assert!(listing.contains("_0x"));
}
