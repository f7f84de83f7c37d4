// Allow unwrap in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Code generation for ScriptLang.
//!
//! Takes the sema output (bound functions, laid-out symbols, script
//! facts) and produces a [`Program`]: the flat instruction stream with
//! all fixups applied, the static and global cell images, the string
//! pool, and the native import table.
//!
//! The emitter refuses to run on an errored compile; callers gate on
//! `Diagnostics::has_errors()` before coming here.

pub mod emitter;
pub mod lower;

pub use emitter::{EmitError, Emitter, EmitterOutput, Label};

use lower::FunctionLowerer;
use scriptlang_sema::{
    Analysis, ConstValue, Symbol, SymbolId, SymbolTable, Type, TypeId, TypePool,
};
use scriptlang_vm::Program;
use std::collections::HashMap;
use tracing::debug;

/// One analysed unit paired with its symbol table.
///
/// A compilation hands `generate` every unit of the USING graph in
/// dependency-first order; the last unit is the entry script.
#[derive(Clone, Copy)]
pub struct UnitCodegen<'a> {
    pub analysis: &'a Analysis,
    pub table: &'a SymbolTable,
}

/// Lower an analysed compilation into a compiled program.
///
/// The entry unit's MAIN is emitted first (code offset 0) and carries
/// the script name in its prologue; all other defined functions of every
/// unit follow. Cross-unit calls resolve by case-folded function name —
/// root-scope names are unique across the import graph.
pub fn generate(units: &[UnitCodegen], pool: &TypePool) -> Result<Program, EmitError> {
    let entry = units.last().expect("generate requires at least one unit");
    let script = &entry.analysis.script;
    let entry_unit = units.len() - 1;

    let mut emitter = Emitter::new();

    // Emission order: entry MAIN, then every other function.
    let entry_main = entry.analysis.functions.iter().position(|f| {
        matches!(entry.table.get(f.symbol), Symbol::Function(sym) if sym.name.eq_ignore_ascii_case("MAIN"))
    });
    let mut order: Vec<(usize, usize)> = Vec::new();
    if let Some(main) = entry_main {
        order.push((entry_unit, main));
    }
    for (unit_idx, unit) in units.iter().enumerate() {
        for func_idx in 0..unit.analysis.functions.len() {
            if Some((unit_idx, func_idx)) != entry_main.map(|m| (entry_unit, m)) {
                order.push((unit_idx, func_idx));
            }
        }
    }

    // One label per emitted body; calls resolve through the by-name map
    // (first definition wins, matching import collision handling).
    let mut labels: Vec<Label> = Vec::with_capacity(order.len());
    let mut call_targets: HashMap<String, Label> = HashMap::new();
    for &(unit_idx, func_idx) in &order {
        let unit = &units[unit_idx];
        let label = emitter.new_label();
        labels.push(label);
        if let Symbol::Function(sym) = unit.table.get(unit.analysis.functions[func_idx].symbol) {
            call_targets
                .entry(sym.name.to_ascii_lowercase())
                .or_insert(label);
        }
    }

    for (position, &(unit_idx, func_idx)) in order.iter().enumerate() {
        let unit = &units[unit_idx];
        let function = &unit.analysis.functions[func_idx];
        let display_name = if position == 0 && entry_main.is_some() {
            script.name.clone()
        } else {
            match unit.table.get(function.symbol) {
                Symbol::Function(sym) => sym.name.clone(),
                _ => String::new(),
            }
        };
        let mut lowerer = FunctionLowerer::new(pool, unit.table, &mut emitter, &call_targets);
        lowerer.lower_function(function, labels[position], &display_name);
    }

    let output = emitter.finish()?;
    debug!(
        code_bytes = output.code.len(),
        natives = output.natives.len(),
        "emission complete"
    );

    // Static slots were laid out cumulatively across units; the image is
    // their concatenation.
    let statics_size: u32 = units.iter().map(|u| u.analysis.script.statics_size).sum();
    let mut statics = vec![0u64; statics_size as usize];
    for unit in units {
        fill_image(
            &mut statics,
            unit.analysis.statics.iter().map(|&s| (s, 0)),
            pool,
            unit.table,
        );
    }

    // Global slots pack the block index in the high bits; mask it off to
    // get image offsets. Only the entry unit's owned block is imaged.
    let mut globals = vec![0u64; script.globals_size as usize];
    fill_image(
        &mut globals,
        entry.analysis.owned_globals.iter().map(|&s| (s, 0x3FFFF + 1)),
        pool,
        entry.table,
    );

    Ok(Program::new(
        script.name.clone(),
        script.hash,
        script.globals_block,
        globals,
        statics,
        0,
        output.string_pool,
        output.natives,
        output.code,
    ))
}

/// Fill a cell image: array length headers first, then folded
/// initializer cells on top.
fn fill_image(
    image: &mut [u64],
    symbols: impl Iterator<Item = (SymbolId, u32)>,
    pool: &TypePool,
    table: &SymbolTable,
) {
    for (symbol, address_mask) in symbols {
        let Symbol::Variable(var) = table.get(symbol) else {
            continue;
        };
        let Some(slot) = var.slot else { continue };
        let base = if address_mask > 0 {
            (slot & (address_mask - 1)) as usize
        } else {
            slot as usize
        };
        fill_length_cells(pool, var.ty, base, image);
        if let Some(cells) = &var.init {
            for (index, cell) in cells.iter().enumerate() {
                if let Some(target) = image.get_mut(base + index) {
                    *target = cell_bits(cell);
                }
            }
        }
    }
}

/// Arrays carry their length in the leading slot, recursively.
fn fill_length_cells(pool: &TypePool, ty: TypeId, base: usize, image: &mut [u64]) {
    match pool.get(ty) {
        Type::Array { elem, len } => {
            let len = match len {
                scriptlang_sema::ArrayLen::Lit(n) => *n,
                scriptlang_sema::ArrayLen::Named(_) => 0,
            };
            if let Some(cell) = image.get_mut(base) {
                *cell = len as u64;
            }
            let elem_size = pool.size_of(*elem) as usize;
            for index in 0..len as usize {
                fill_length_cells(pool, *elem, base + 1 + index * elem_size, image);
            }
        }
        Type::Struct { fields, .. } => {
            let mut offset = base;
            for field in fields {
                fill_length_cells(pool, field.ty, offset, image);
                offset += pool.size_of(field.ty) as usize;
            }
        }
        _ => {}
    }
}

/// An image cell. Values are 32-bit quantities in 8-byte cells: INTs as
/// two's complement, FLOATs as IEEE-754 bits, BOOLs as 0/1.
fn cell_bits(value: &ConstValue) -> u64 {
    match value {
        ConstValue::Int(v) => (*v as i32) as u32 as u64,
        ConstValue::Float(v) => v.to_bits() as u64,
        ConstValue::Bool(v) => u64::from(*v),
        // Strings never reach images; layout rejects the initializer.
        ConstValue::Str(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptlang_ast::span::SourceFile;
    use scriptlang_ast::Diagnostics;
    use scriptlang_sema::native_hash;
    use scriptlang_vm::{encode, Opcode};
    use std::path::PathBuf;

    fn compile(source: &str) -> Program {
        let file = SourceFile::new(PathBuf::from("test.sc"), source.to_string());
        let (tokens, lex_errors) = scriptlang_lexer::tokenize(source);
        let (unit, parse_errors) = scriptlang_parser::parse(&tokens, &lex_errors, 0, &file);
        assert!(parse_errors.is_empty(), "parse errors: {parse_errors:?}");

        let mut pool = TypePool::new();
        let mut table = SymbolTable::with_builtins(&mut pool);
        let mut diags = Diagnostics::new();
        let analysis = scriptlang_sema::analyze_unit(&unit, &mut pool, &mut table, &mut diags);
        assert!(!diags.has_errors(), "sema errors: {diags:?}");

        generate(
            &[UnitCodegen {
                analysis: &analysis,
                table: &table,
            }],
            &pool,
        )
        .unwrap()
    }

    #[test]
    fn test_minimal_program_is_enter_leave() {
        let program = compile("SCRIPT_NAME t\nPROC MAIN()\nENDPROC\n");
        let code = program.flat_code();
        // ENTER 0, 2, 1, 't'
        assert_eq!(code[0], Opcode::Enter as u8);
        assert_eq!(code[1], 0); // args
        assert_eq!(encode::read_u16(&code, 2), 2); // frame = 0 + 2 + 0
        assert_eq!(code[4], 1); // name length
        assert_eq!(code[5], b't');
        // LEAVE 0, 0
        assert_eq!(code[6], Opcode::Leave as u8);
        assert_eq!(code[7], 0);
        assert_eq!(code[8], 0);
        assert_eq!(code.len(), 9);
    }

    #[test]
    fn test_mutual_recursion_calls_bind_both_ways() {
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
        let program = compile(source);
        let code = program.flat_code();

        // Collect the two CALL operands and the two ENTER offsets.
        let mut calls = Vec::new();
        let mut enters = Vec::new();
        let mut at = 0;
        while at < code.len() {
            let op = Opcode::from_byte(code[at]).unwrap();
            if op == Opcode::Call {
                calls.push(encode::read_u24(&code, at + 1) as usize);
            }
            if op == Opcode::Enter {
                enters.push(at);
            }
            at += Opcode::instruction_len(&code, at).unwrap();
        }
        assert_eq!(calls.len(), 2);
        assert_eq!(enters.len(), 3);
        // A calls B's entry and B calls A's entry.
        assert_eq!(calls[0], enters[2]);
        assert_eq!(calls[1], enters[1]);
    }

    #[test]
    fn test_struct_vector_global_image() {
        let source = "\
SCRIPT_NAME t
STRUCT P
    FLOAT x, y, z
ENDSTRUCT
GLOBAL 1 t
    P p = <<1.0, 2.0, 3.0>>
ENDGLOBAL
PROC MAIN()
ENDPROC
";
        let program = compile(source);
        assert_eq!(program.globals_block, Some(1));
        assert_eq!(program.globals.len(), 3);
        assert_eq!(program.globals[1], 2.0f32.to_bits() as u64);
    }

    #[test]
    fn test_switch_encoding() {
        let source = "\
SCRIPT_NAME t
PROC MAIN()
    INT v
    SWITCH v
    CASE 1
        BREAK
    CASE 2
        BREAK
    CASE 3
        BREAK
    DEFAULT
        BREAK
    ENDSWITCH
ENDPROC
";
        let program = compile(source);
        let code = program.flat_code();
        let mut at = 0;
        let mut found = None;
        while at < code.len() {
            if code[at] == Opcode::Switch as u8 {
                found = Some(at);
                break;
            }
            at += Opcode::instruction_len(&code, at).unwrap();
        }
        let at = found.expect("SWITCH not emitted");
        assert_eq!(code[at + 1], 3); // count
        // 3 entries × (u32 value + s16 offset), then the J to default.
        assert_eq!(encode::read_u32(&code, at + 2), 1);
        assert_eq!(encode::read_u32(&code, at + 8), 2);
        assert_eq!(encode::read_u32(&code, at + 14), 3);
        assert_eq!(code[at + 20], Opcode::J as u8);
    }

    #[test]
    fn test_native_import_table() {
        let source = "\
SCRIPT_NAME t
NATIVE PROC WAIT(INT ms)
PROC MAIN()
    WAIT(0)
    WAIT(1)
ENDPROC
";
        let program = compile(source);
        assert_eq!(program.natives, vec![native_hash("WAIT")]);
    }

    #[test]
    fn test_string_pool_dedup_and_reference() {
        let source = "\
SCRIPT_NAME t
NATIVE PROC LOG(STRING msg)
PROC MAIN()
    LOG(\"hello\")
    LOG(\"hello\")
ENDPROC
";
        let program = compile(source);
        assert_eq!(program.strings(), vec![(0, "hello")]);
        let code = program.flat_code();
        // Both calls push offset 0 then STRING.
        let count = code
            .iter()
            .filter(|&&b| b == Opcode::String as u8)
            .count();
        assert!(count >= 2);
    }

    #[test]
    fn test_array_static_length_header() {
        let program = compile("SCRIPT_NAME t\nINT counts[4]\nPROC MAIN()\nENDPROC\n");
        assert_eq!(program.statics.len(), 5);
        assert_eq!(program.statics[0], 4); // length cell
    }

    #[test]
    fn test_fused_compare_branch() {
        let source = "\
SCRIPT_NAME t
PROC MAIN()
    INT a
    IF a < 10
        a = 1
    ENDIF
ENDPROC
";
        let program = compile(source);
        let code = program.flat_code();
        assert!(code.contains(&(Opcode::IltJz as u8)));
        // The fused form replaces a separate ILT.
        assert!(!code.contains(&(Opcode::Ilt as u8)));
    }
}
