//! The instruction emitter.
//!
//! An explicit value threaded through lowering — byte buffer, label
//! table, pending fixups, string pool, and native import table together,
//! never ambient state. Branches and calls are emitted with placeholder
//! operands and a recorded fixup; [`Emitter::finish`] resolves every
//! label and patches the stream.
//!
//! Page discipline: before any instruction whose bytes would straddle a
//! 16 KB page boundary, the emitter pads with NOPs to the boundary, so
//! the fixup pass works on final offsets and the pager can split the
//! stream blindly.

use indexmap::{IndexMap, IndexSet};
use scriptlang_vm::encode;
use scriptlang_vm::{Opcode, PAGE_SIZE};
use thiserror::Error;

/// Interned label handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

/// Width of a pending patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FixupKind {
    /// s16 relative to `base`
    RelS16,
    /// u24 absolute code offset
    AbsU24,
}

#[derive(Debug, Clone, Copy)]
struct Fixup {
    /// Byte offset of the operand.
    at: usize,
    /// Offset the relative displacement is measured from.
    base: usize,
    kind: FixupKind,
    label: Label,
}

/// Emission failures. These are resource-limit errors, not diagnostics;
/// the type system has already accepted the program by the time they can
/// occur.
#[derive(Debug, Error)]
pub enum EmitError {
    #[error("branch displacement {displacement} does not fit in s16")]
    BranchOutOfRange { displacement: i64 },
    #[error("code offset {offset:#x} does not fit in u24")]
    CodeOffsetOutOfRange { offset: usize },
    #[error("label bound twice")]
    LabelRebound,
    #[error("unbound label at finish")]
    UnboundLabel,
}

/// Everything `finish` hands to the program builder.
#[derive(Debug)]
pub struct EmitterOutput {
    pub code: Vec<u8>,
    pub string_pool: Vec<u8>,
    pub natives: Vec<u64>,
}

/// Byte-stream emitter with label/fixup bookkeeping.
#[derive(Debug, Default)]
pub struct Emitter {
    code: Vec<u8>,
    labels: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
    /// Interned strings: text → byte offset in the pool.
    strings: IndexMap<String, u32>,
    string_bytes: Vec<u8>,
    /// Deduplicated native hashes in first-use order.
    natives: IndexSet<u64>,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current code offset.
    pub fn offset(&self) -> usize {
        self.code.len()
    }

    pub fn new_label(&mut self) -> Label {
        let label = Label(self.labels.len() as u32);
        self.labels.push(None);
        label
    }

    /// Bind a label to the current offset.
    pub fn bind_label(&mut self, label: Label) -> Result<(), EmitError> {
        let slot = &mut self.labels[label.0 as usize];
        if slot.is_some() {
            return Err(EmitError::LabelRebound);
        }
        *slot = Some(self.code.len());
        Ok(())
    }

    /// Pad with NOPs when `len` more bytes would straddle a page.
    fn reserve_instruction(&mut self, len: usize) {
        debug_assert!(len <= PAGE_SIZE, "instruction longer than a page");
        let within = self.code.len() % PAGE_SIZE;
        if within + len > PAGE_SIZE {
            let pad = PAGE_SIZE - within;
            self.code
                .extend(std::iter::repeat(Opcode::Nop as u8).take(pad));
        }
    }

    /// Emit an operand-free instruction.
    pub fn op(&mut self, op: Opcode) {
        debug_assert_eq!(op.fixed_operand_len(), 0, "operands required for {op:?}");
        self.reserve_instruction(1);
        self.code.push(op as u8);
    }

    /// Emit an instruction with a u8 operand.
    pub fn op_u8(&mut self, op: Opcode, value: u8) {
        self.reserve_instruction(2);
        self.code.push(op as u8);
        self.code.push(value);
    }

    /// Emit an instruction with a u16 operand.
    pub fn op_u16(&mut self, op: Opcode, value: u16) {
        self.reserve_instruction(3);
        self.code.push(op as u8);
        encode::write_u16(&mut self.code, value);
    }

    /// Emit an instruction with an s16 operand.
    pub fn op_s16(&mut self, op: Opcode, value: i16) {
        self.reserve_instruction(3);
        self.code.push(op as u8);
        encode::write_s16(&mut self.code, value);
    }

    /// Emit an instruction with a u24 operand.
    pub fn op_u24(&mut self, op: Opcode, value: u32) {
        self.reserve_instruction(4);
        self.code.push(op as u8);
        encode::write_u24(&mut self.code, value);
    }

    /// Emit an instruction with a u32 operand.
    pub fn op_u32(&mut self, op: Opcode, value: u32) {
        self.reserve_instruction(5);
        self.code.push(op as u8);
        encode::write_u32(&mut self.code, value);
    }

    /// Emit an instruction with an f32 operand.
    pub fn op_f32(&mut self, op: Opcode, value: f32) {
        self.reserve_instruction(5);
        self.code.push(op as u8);
        encode::write_f32(&mut self.code, value);
    }

    /// Push an integer constant using the narrowest encoding.
    pub fn push_int(&mut self, value: i64) {
        match value {
            0..=7 => {
                let op = Opcode::from_byte(Opcode::PushConst0 as u8 + value as u8)
                    .expect("PUSH_CONST_0..7 are contiguous");
                self.op(op);
            }
            8..=0xFF => self.op_u8(Opcode::PushConstU8, value as u8),
            -0x8000..=0x7FFF => self.op_s16(Opcode::PushConstS16, value as i16),
            0x8000..=0xFF_FFFF => self.op_u24(Opcode::PushConstU24, value as u32),
            _ => self.op_u32(Opcode::PushConstU32, value as u32),
        }
    }

    /// Push a float constant.
    pub fn push_float(&mut self, value: f32) {
        self.op_f32(Opcode::PushConstF, value);
    }

    /// Emit a branch to a label (s16 fixup, relative to the next
    /// instruction).
    pub fn branch(&mut self, op: Opcode, target: Label) {
        debug_assert!(op.is_branch(), "{op:?} is not a branch");
        self.reserve_instruction(3);
        self.code.push(op as u8);
        let at = self.code.len();
        encode::write_s16(&mut self.code, 0);
        self.fixups.push(Fixup {
            at,
            base: at + 2,
            kind: FixupKind::RelS16,
            label: target,
        });
    }

    /// Emit a CALL to a label (u24 absolute fixup).
    pub fn call(&mut self, target: Label) {
        self.reserve_instruction(4);
        self.code.push(Opcode::Call as u8);
        let at = self.code.len();
        encode::write_u24(&mut self.code, 0);
        self.fixups.push(Fixup {
            at,
            base: 0,
            kind: FixupKind::AbsU24,
            label: target,
        });
    }

    /// Emit a SWITCH table. Case offsets are s16 relative to the end of
    /// their own entry.
    pub fn switch(&mut self, cases: &[(u32, Label)]) {
        debug_assert!(cases.len() <= u8::MAX as usize, "too many SWITCH cases");
        self.reserve_instruction(2 + cases.len() * 6);
        self.code.push(Opcode::Switch as u8);
        self.code.push(cases.len() as u8);
        for (value, target) in cases {
            encode::write_u32(&mut self.code, *value);
            let at = self.code.len();
            encode::write_s16(&mut self.code, 0);
            self.fixups.push(Fixup {
                at,
                base: at + 2,
                kind: FixupKind::RelS16,
                label: *target,
            });
        }
    }

    /// Emit the function prologue.
    pub fn enter(&mut self, args: u8, frame: u16, name: &str) {
        let name_bytes = name.as_bytes();
        let name_len = name_bytes.len().min(u8::MAX as usize);
        self.reserve_instruction(5 + name_len);
        self.code.push(Opcode::Enter as u8);
        self.code.push(args);
        encode::write_u16(&mut self.code, frame);
        self.code.push(name_len as u8);
        self.code.extend_from_slice(&name_bytes[..name_len]);
    }

    /// Emit the function epilogue.
    pub fn leave(&mut self, args: u8, returns: u8) {
        self.reserve_instruction(3);
        self.code.push(Opcode::Leave as u8);
        self.code.push(args);
        self.code.push(returns);
    }

    /// Emit a native invocation; the hash is interned into the import
    /// table and its index becomes the operand.
    pub fn native(&mut self, arg_slots: u8, return_slots: u8, hash: u64) {
        debug_assert!(arg_slots < 64 && return_slots < 4, "NATIVE packing overflow");
        let (index, _) = self.natives.insert_full(hash);
        self.reserve_instruction(4);
        self.code.push(Opcode::Native as u8);
        self.code.push(arg_slots << 2 | return_slots);
        encode::write_u16(&mut self.code, index as u16);
    }

    /// Intern a string and return its pool byte offset.
    pub fn intern_string(&mut self, text: &str) -> u32 {
        if let Some(&offset) = self.strings.get(text) {
            return offset;
        }
        let offset = self.string_bytes.len() as u32;
        self.string_bytes.extend_from_slice(text.as_bytes());
        self.string_bytes.push(0);
        self.strings.insert(text.to_string(), offset);
        offset
    }

    /// Push a reference to an interned string.
    pub fn push_string(&mut self, text: &str) {
        let offset = self.intern_string(text);
        self.push_int(offset as i64);
        self.op(Opcode::String);
    }

    /// Resolve fixups and seal the stream.
    pub fn finish(mut self) -> Result<EmitterOutput, EmitError> {
        for fixup in &self.fixups {
            let target = self.labels[fixup.label.0 as usize].ok_or(EmitError::UnboundLabel)?;
            match fixup.kind {
                FixupKind::RelS16 => {
                    let displacement = target as i64 - fixup.base as i64;
                    let value = i16::try_from(displacement)
                        .map_err(|_| EmitError::BranchOutOfRange { displacement })?;
                    encode::patch_s16(&mut self.code, fixup.at, value);
                }
                FixupKind::AbsU24 => {
                    if target > 0x00FF_FFFF {
                        return Err(EmitError::CodeOffsetOutOfRange { offset: target });
                    }
                    encode::patch_u24(&mut self.code, fixup.at, target as u32);
                }
            }
        }
        Ok(EmitterOutput {
            code: self.code,
            string_pool: self.string_bytes,
            natives: self.natives.into_iter().collect(),
        })
    }
}
