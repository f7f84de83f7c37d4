// Allow unwrap in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Disassembler for compiled ScriptLang programs.
//!
//! Recovers symbolic assembly from a [`Program`]: natives resolved
//! through the optional database, pool strings with synthesized labels,
//! code with function and jump labels recovered in two passes, and the
//! static/global/argument images in run-length `.int` form.
//!
//! The disassembler is independent of compiler diagnostics; its only
//! failure mode is corrupt input.

use scriptlang_vm::encode;
use scriptlang_vm::{NativeDb, Opcode, Program};
use std::collections::HashMap;
use std::fmt::Write as _;
use thiserror::Error;

/// Corrupt-input failures.
#[derive(Debug, Error)]
pub enum DisasmError {
    #[error("undecodable opcode byte {byte:#04x} at code offset {at:#x}")]
    BadOpcode { at: usize, byte: u8 },
    #[error("truncated instruction at code offset {at:#x}")]
    Truncated { at: usize },
    #[error("image cell {index} holds {value:#x}, which exceeds u32")]
    CellOutOfRange { index: usize, value: u64 },
    #[error("branch at {at:#x} targets {target:#x}, outside the code")]
    BranchOutOfBounds { at: usize, target: i64 },
}

/// Disassemble a whole program into listing text.
pub fn disassemble(program: &Program, natives: Option<&NativeDb>) -> Result<String, DisasmError> {
    let code = program.flat_code();
    let labels = scan_labels(&code)?;
    let strings = StringLabels::new(program);

    let mut out = String::new();
    let _ = writeln!(out, ".script {}", program.name);
    let _ = writeln!(out, ".hash {:#010x}", program.hash);

    if !program.natives.is_empty() {
        let _ = writeln!(out, "\n.natives");
        for &hash in &program.natives {
            let _ = writeln!(out, "    {}", native_name(natives, hash));
        }
    }

    if let Some(block) = program.globals_block {
        let _ = writeln!(out, "\n.globals block {block}");
        write_image(&mut out, &program.globals)?;
    }

    let _ = writeln!(out, "\n.statics");
    let args = program.args_count as usize;
    let plain = program.statics.len() - args;
    write_image(&mut out, &program.statics[..plain])?;
    if args > 0 {
        let _ = writeln!(out, "\n.args");
        write_image(&mut out, &program.statics[plain..])?;
    }

    if !program.string_pool.is_empty() {
        let _ = writeln!(out, "\n.strings");
        for (offset, text) in program.strings() {
            let label = strings.label_at(offset).unwrap_or_default();
            let _ = writeln!(out, "{label}: .str \"{}\"", escape(text));
        }
    }

    let _ = writeln!(out, "\n.code");
    write_code(&mut out, &code, &labels, &strings, program, natives)?;

    Ok(out)
}

// =============================================================================
// Labels
// =============================================================================

/// Address → recovered label name.
type Labels = HashMap<usize, String>;

/// First pass: find every branch, call, switch, and ENTER target.
///
/// Function entries are named `func_<addr>` (address 0 is always `main`);
/// plain jump targets are `lbl_<addr>`. An address that is both keeps
/// its function name.
fn scan_labels(code: &[u8]) -> Result<Labels, DisasmError> {
    let mut labels = Labels::new();
    let mut jump_targets = Vec::new();

    let mut at = 0;
    while at < code.len() {
        let op = Opcode::from_byte(code[at]).ok_or(DisasmError::BadOpcode {
            at,
            byte: code[at],
        })?;
        let len = Opcode::instruction_len(code, at).ok_or(DisasmError::Truncated { at })?;

        if op == Opcode::Enter {
            let name = if at == 0 {
                "main".to_string()
            } else {
                format!("func_{at}")
            };
            labels.insert(at, name);
        } else if op.is_branch() {
            let target = (at + len) as i64 + encode::read_s16(code, at + 1) as i64;
            check_target(code, at, target)?;
            jump_targets.push(target as usize);
        } else if op == Opcode::Call {
            let target = encode::read_u24(code, at + 1) as usize;
            let name = if target == 0 {
                "main".to_string()
            } else {
                format!("func_{target}")
            };
            labels.insert(target, name);
        } else if op == Opcode::Switch {
            let count = code[at + 1] as usize;
            for entry in 0..count {
                let entry_at = at + 2 + entry * 6;
                let entry_end = entry_at + 6;
                let target = entry_end as i64 + encode::read_s16(code, entry_at + 4) as i64;
                check_target(code, at, target)?;
                jump_targets.push(target as usize);
            }
        }

        at += len;
    }

    for target in jump_targets {
        labels
            .entry(target)
            .or_insert_with(|| format!("lbl_{target}"));
    }
    Ok(labels)
}

fn check_target(code: &[u8], at: usize, target: i64) -> Result<(), DisasmError> {
    if target < 0 || target > code.len() as i64 {
        return Err(DisasmError::BranchOutOfBounds { at, target });
    }
    Ok(())
}

// =============================================================================
// Code listing
// =============================================================================

/// Second pass: print instructions, prefixing label lines and separating
/// functions with a blank line.
fn write_code(
    out: &mut String,
    code: &[u8],
    labels: &Labels,
    strings: &StringLabels,
    program: &Program,
    natives: Option<&NativeDb>,
) -> Result<(), DisasmError> {
    let mut at = 0;
    while at < code.len() {
        let op = Opcode::from_byte(code[at]).ok_or(DisasmError::BadOpcode {
            at,
            byte: code[at],
        })?;
        let len = Opcode::instruction_len(code, at).ok_or(DisasmError::Truncated { at })?;

        if let Some(label) = labels.get(&at) {
            if op == Opcode::Enter && at != 0 {
                let _ = writeln!(out);
            }
            let _ = writeln!(out, "{label}:");
        }

        let text = render_instruction(code, at, len, op, labels, strings, program, natives);
        let _ = writeln!(out, "    {text}");
        at += len;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn render_instruction(
    code: &[u8],
    at: usize,
    len: usize,
    op: Opcode,
    labels: &Labels,
    strings: &StringLabels,
    program: &Program,
    natives: Option<&NativeDb>,
) -> String {
    let mnemonic = op.mnemonic();
    match op {
        Opcode::Enter => {
            let args = code[at + 1];
            let frame = encode::read_u16(code, at + 2);
            let name_len = code[at + 4] as usize;
            let name = String::from_utf8_lossy(&code[at + 5..at + 5 + name_len]);
            format!("{mnemonic} {args}, {frame}, '{name}'")
        }
        Opcode::Leave => {
            format!("{mnemonic} {}, {}", code[at + 1], code[at + 2])
        }
        Opcode::Native => {
            let packed = code[at + 1];
            let index = encode::read_u16(code, at + 2) as usize;
            let name = program
                .natives
                .get(index)
                .map(|&hash| native_name(natives, hash))
                .unwrap_or_else(|| format!("<bad native index {index}>"));
            format!("{mnemonic} {}, {}, {name}", packed >> 2, packed & 3)
        }
        Opcode::Call => {
            let target = encode::read_u24(code, at + 1) as usize;
            match labels.get(&target) {
                Some(label) => format!("{mnemonic} {label}"),
                None => format!("{mnemonic} {target}"),
            }
        }
        Opcode::Switch => {
            let count = code[at + 1] as usize;
            let mut parts = Vec::with_capacity(count);
            for entry in 0..count {
                let entry_at = at + 2 + entry * 6;
                let value = encode::read_u32(code, entry_at);
                let target =
                    (entry_at + 6) as i64 + encode::read_s16(code, entry_at + 4) as i64;
                let name = labels
                    .get(&(target as usize))
                    .cloned()
                    .unwrap_or_else(|| format!("{target}"));
                parts.push(format!("{value}:{name}"));
            }
            format!("{mnemonic} {}", parts.join(", "))
        }
        _ if op.is_branch() => {
            let target = (at + len) as i64 + encode::read_s16(code, at + 1) as i64;
            let name = labels
                .get(&(target as usize))
                .cloned()
                .unwrap_or_else(|| format!("{target}"));
            format!("{mnemonic} {name}")
        }
        Opcode::PushConstF => {
            format!("{mnemonic} {}", encode::read_f32(code, at + 1))
        }
        Opcode::PushConstS16 | Opcode::IoffsetS16 | Opcode::IoffsetS16Load
        | Opcode::IoffsetS16Store => {
            format!("{mnemonic} {}", encode::read_s16(code, at + 1))
        }
        _ => {
            let mut text = mnemonic.to_string();
            match op.fixed_operand_len() {
                1 => {
                    let _ = write!(text, " {}", code[at + 1]);
                }
                2 => {
                    let _ = write!(text, " {}", encode::read_u16(code, at + 1));
                }
                3 => {
                    let _ = write!(text, " {}", encode::read_u24(code, at + 1));
                }
                4 => {
                    let _ = write!(text, " {}", encode::read_u32(code, at + 1));
                }
                _ => {}
            }
            // A constant push that feeds STRING is a pool offset; name it.
            if is_int_push(op) && code.get(at + len) == Some(&(Opcode::String as u8)) {
                if let Some(offset) = push_value(code, at, op) {
                    if let Some(label) = strings.label_at(offset as usize) {
                        let _ = write!(text, " ; {label}");
                    }
                }
            }
            text
        }
    }
}

fn is_int_push(op: Opcode) -> bool {
    use Opcode::*;
    matches!(
        op,
        PushConst0
            | PushConst1
            | PushConst2
            | PushConst3
            | PushConst4
            | PushConst5
            | PushConst6
            | PushConst7
            | PushConstU8
            | PushConstS16
            | PushConstU24
            | PushConstU32
    )
}

fn push_value(code: &[u8], at: usize, op: Opcode) -> Option<u32> {
    use Opcode::*;
    match op {
        PushConst0 | PushConst1 | PushConst2 | PushConst3 | PushConst4 | PushConst5
        | PushConst6 | PushConst7 => Some(op as u32 - PushConst0 as u32),
        PushConstU8 => Some(code[at + 1] as u32),
        PushConstS16 => u32::try_from(encode::read_s16(code, at + 1)).ok(),
        PushConstU24 => Some(encode::read_u24(code, at + 1)),
        PushConstU32 => Some(encode::read_u32(code, at + 1)),
        _ => None,
    }
}

// =============================================================================
// Strings
// =============================================================================

/// Synthesized labels for pool strings, disambiguated with `_2`, `_3`, …
struct StringLabels {
    by_offset: HashMap<usize, String>,
}

impl StringLabels {
    fn new(program: &Program) -> Self {
        let mut by_offset = HashMap::new();
        let mut used: HashMap<String, u32> = HashMap::new();
        for (offset, text) in program.strings() {
            let base = string_label(text);
            let count = used.entry(base.clone()).or_insert(0);
            *count += 1;
            let label = if *count == 1 {
                base
            } else {
                format!("{base}_{count}")
            };
            by_offset.insert(offset, label);
        }
        Self { by_offset }
    }

    fn label_at(&self, offset: usize) -> Option<String> {
        self.by_offset.get(&offset).cloned()
    }
}

/// `a` + the camel-cased first 25 identifier characters of the text;
/// empty strings become `aEmptyString`.
fn string_label(text: &str) -> String {
    let mut label = String::from("a");
    let mut capitalize = true;
    for ch in text.chars() {
        if label.len() >= 26 {
            break;
        }
        if ch.is_ascii_alphanumeric() {
            if capitalize {
                label.push(ch.to_ascii_uppercase());
                capitalize = false;
            } else {
                label.push(ch);
            }
        } else {
            capitalize = true;
        }
    }
    if label.len() == 1 {
        label.push_str("EmptyString");
    }
    label
}

/// Escape non-printable bytes for the listing.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

// =============================================================================
// Images
// =============================================================================

/// Run-length compress consecutive equal cells as
/// `.int <count> dup (<value>)`.
fn write_image(out: &mut String, cells: &[u64]) -> Result<(), DisasmError> {
    for (index, &value) in cells.iter().enumerate() {
        if value > u32::MAX as u64 {
            return Err(DisasmError::CellOutOfRange { index, value });
        }
    }

    let mut index = 0;
    while index < cells.len() {
        let value = cells[index];
        let mut run = 1;
        while index + run < cells.len() && cells[index + run] == value {
            run += 1;
        }
        if run == 1 {
            let _ = writeln!(out, "    .int {value}");
        } else {
            let _ = writeln!(out, "    .int {run} dup ({value})");
        }
        index += run;
    }
    Ok(())
}

fn native_name(db: Option<&NativeDb>, hash: u64) -> String {
    db.and_then(|db| db.resolve_original(hash))
        .map(|def| def.name.clone())
        .unwrap_or_else(|| format!("_0x{hash:016X}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptlang_vm::NativeDef;

    /// Hand-assemble a tiny program: main calls func_N, which returns.
    fn sample_program() -> Program {
        let mut code = Vec::new();
        // main: ENTER 0, 2, 'm'
        code.extend_from_slice(&[Opcode::Enter as u8, 0, 2, 0, 1, b'm']);
        // CALL func (patched below)
        let call_at = code.len();
        code.extend_from_slice(&[Opcode::Call as u8, 0, 0, 0]);
        // LEAVE 0, 0
        code.extend_from_slice(&[Opcode::Leave as u8, 0, 0]);
        // func: ENTER 0, 2, 'f'
        let func_at = code.len();
        code.extend_from_slice(&[Opcode::Enter as u8, 0, 2, 0, 1, b'f']);
        code.extend_from_slice(&[Opcode::Leave as u8, 0, 0]);
        encode::patch_u24(&mut code, call_at + 1, func_at as u32);

        Program::new(
            "sample".to_string(),
            0x1234,
            None,
            vec![],
            vec![7, 7, 7, 9],
            0,
            b"hello\0\0".to_vec(),
            vec![0xDEAD],
            code,
        )
    }

    #[test]
    fn test_function_labels() {
        let listing = disassemble(&sample_program(), None).unwrap();
        assert!(listing.contains("main:"));
        assert!(listing.contains("func_13:"));
        assert!(listing.contains("CALL func_13"));
    }

    #[test]
    fn test_image_run_length() {
        let listing = disassemble(&sample_program(), None).unwrap();
        assert!(listing.contains(".int 3 dup (7)"));
        assert!(listing.contains(".int 9"));
    }

    #[test]
    fn test_native_fallback_without_db() {
        let listing = disassemble(&sample_program(), None).unwrap();
        assert!(listing.contains("_0x000000000000DEAD"));
    }

    #[test]
    fn test_native_resolution_with_db() {
        let db = NativeDb::new(vec![NativeDef {
            hash: 0xDEAD,
            original_hash: 0xDEAD,
            name: "DO_SOMETHING".to_string(),
            params: 0,
            returns: 0,
        }]);
        let listing = disassemble(&sample_program(), Some(&db)).unwrap();
        assert!(listing.contains("DO_SOMETHING"));
    }

    #[test]
    fn test_string_labels() {
        let listing = disassemble(&sample_program(), None).unwrap();
        assert!(listing.contains("aHello: .str \"hello\""));
        assert!(listing.contains("aEmptyString: .str \"\""));
    }

    #[test]
    fn test_string_label_synthesis() {
        assert_eq!(string_label("hello world"), "aHelloWorld");
        assert_eq!(string_label(""), "aEmptyString");
        assert_eq!(string_label("~r~dead"), "aRDead");
        // 25 identifier chars, then truncation
        let long = "abcdefghijklmnopqrstuvwxyz0123";
        assert_eq!(string_label(long).len(), 26);
    }

    #[test]
    fn test_duplicate_string_labels_disambiguated() {
        let program = Program::new(
            "s".to_string(),
            0,
            None,
            vec![],
            vec![],
            0,
            b"hi!\0hi?\0".to_vec(),
            vec![],
            vec![Opcode::Enter as u8, 0, 2, 0, 1, b's', Opcode::Leave as u8, 0, 0],
        );
        let listing = disassemble(&program, None).unwrap();
        assert!(listing.contains("aHi: "));
        assert!(listing.contains("aHi_2: "));
    }

    #[test]
    fn test_oversized_cell_is_fatal() {
        let program = Program::new(
            "s".to_string(),
            0,
            None,
            vec![],
            vec![u64::MAX],
            0,
            vec![],
            vec![],
            vec![Opcode::Enter as u8, 0, 2, 0, 1, b's', Opcode::Leave as u8, 0, 0],
        );
        assert!(matches!(
            disassemble(&program, None),
            Err(DisasmError::CellOutOfRange { .. })
        ));
    }

    #[test]
    fn test_bad_opcode_is_fatal() {
        let program = Program::new(
            "s".to_string(),
            0,
            None,
            vec![],
            vec![],
            0,
            vec![],
            vec![],
            vec![0xFE],
        );
        assert!(matches!(
            disassemble(&program, None),
            Err(DisasmError::BadOpcode { .. })
        ));
    }

    #[test]
    fn test_blank_line_between_functions() {
        let listing = disassemble(&sample_program(), None).unwrap();
        assert!(listing.contains("\n\nfunc_13:"));
    }
}
