//! Opcode definitions and metadata.
//!
//! Opcodes are **data, not behavior**: every property the toolchain needs
//! (mnemonic, operand length) lives in metadata functions here, and both
//! the emitter and the disassembler drive off the same tables. Operand
//! bytes are little-endian. Two opcodes have variable length: `ENTER`
//! (the embedded name) and `SWITCH` (the case table); their totals depend
//! on the first operand.
//!
//! Discriminants are part of the compiled-program format — append new
//! opcodes at the end, never renumber.

use serde::{Deserialize, Serialize};

/// VM instruction opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0,

    // === Integer arithmetic ===
    Iadd = 1,
    Isub = 2,
    Imul = 3,
    Idiv = 4,
    Imod = 5,
    Ineg = 6,
    Inot = 7,

    // === Float arithmetic ===
    Fadd = 8,
    Fsub = 9,
    Fmul = 10,
    Fdiv = 11,
    Fmod = 12,
    Fneg = 13,

    // === Integer comparison ===
    Ieq = 14,
    Ine = 15,
    Igt = 16,
    Ige = 17,
    Ilt = 18,
    Ile = 19,

    // === Float comparison ===
    Feq = 20,
    Fne = 21,
    Fgt = 22,
    Fge = 23,
    Flt = 24,
    Fle = 25,

    // === Bitwise ===
    Iand = 26,
    Ior = 27,
    Ixor = 28,

    // === Stack ===
    Dup = 29,
    Drop = 30,
    /// Pop an address, push the cell it points at
    Load = 31,
    /// Pop an address and a value, store the value
    Store = 32,

    // === Calls and frames ===
    /// `argret:u8 index:u16` — argret packs `arg_count << 2 | return_count`
    Native = 33,
    /// `args:u8 frame:u16 name_len:u8 name[name_len]`
    Enter = 34,
    /// `args:u8 returns:u8`
    Leave = 35,

    // === Arrays (element size operand; address and index on stack) ===
    ArrayU8 = 36,
    ArrayU16 = 37,

    // === Frame slots ===
    LocalU8 = 38,
    LocalU8Load = 39,
    LocalU8Store = 40,
    LocalU16 = 41,
    LocalU16Load = 42,
    LocalU16Store = 43,

    // === Script statics ===
    StaticU8 = 44,
    StaticU8Load = 45,
    StaticU8Store = 46,
    StaticU16 = 47,
    StaticU16Load = 48,
    StaticU16Store = 49,

    // === Globals ===
    GlobalU16 = 50,
    GlobalU16Load = 51,
    GlobalU16Store = 52,
    GlobalU24 = 53,
    GlobalU24Load = 54,
    GlobalU24Store = 55,

    // === Struct field offsets ===
    IoffsetU8 = 56,
    IoffsetU8Load = 57,
    IoffsetU8Store = 58,
    IoffsetS16 = 59,
    IoffsetS16Load = 60,
    IoffsetS16Store = 61,

    // === Push-constant family, narrowest form wins ===
    PushConst0 = 62,
    PushConst1 = 63,
    PushConst2 = 64,
    PushConst3 = 65,
    PushConst4 = 66,
    PushConst5 = 67,
    PushConst6 = 68,
    PushConst7 = 69,
    PushConstU8 = 70,
    PushConstU8U8 = 71,
    PushConstU8U8U8 = 72,
    PushConstS16 = 73,
    PushConstU24 = 74,
    PushConstU32 = 75,
    PushConstF = 76,

    // === Branches (s16 relative to the next instruction) ===
    J = 77,
    Jz = 78,
    IeqJz = 79,
    IneJz = 80,
    IgtJz = 81,
    IgeJz = 82,
    IltJz = 83,
    IleJz = 84,

    /// `u24` absolute code offset
    Call = 85,
    /// Pop a string-pool byte offset, push the string reference
    String = 86,
    /// `count:u8 { case_value:u32 jump:s16 }[count]`
    Switch = 87,

    // === Error handling ===
    Catch = 88,
    Throw = 89,

    // === Text labels (operand is the destination buffer size in cells) ===
    TextLabelAssignString = 90,
    TextLabelAssignInt = 91,
    TextLabelAppendString = 92,
    TextLabelAppendInt = 93,
}

/// Every opcode in discriminant order; index == discriminant.
const ALL: &[Opcode] = &[
    Opcode::Nop,
    Opcode::Iadd,
    Opcode::Isub,
    Opcode::Imul,
    Opcode::Idiv,
    Opcode::Imod,
    Opcode::Ineg,
    Opcode::Inot,
    Opcode::Fadd,
    Opcode::Fsub,
    Opcode::Fmul,
    Opcode::Fdiv,
    Opcode::Fmod,
    Opcode::Fneg,
    Opcode::Ieq,
    Opcode::Ine,
    Opcode::Igt,
    Opcode::Ige,
    Opcode::Ilt,
    Opcode::Ile,
    Opcode::Feq,
    Opcode::Fne,
    Opcode::Fgt,
    Opcode::Fge,
    Opcode::Flt,
    Opcode::Fle,
    Opcode::Iand,
    Opcode::Ior,
    Opcode::Ixor,
    Opcode::Dup,
    Opcode::Drop,
    Opcode::Load,
    Opcode::Store,
    Opcode::Native,
    Opcode::Enter,
    Opcode::Leave,
    Opcode::ArrayU8,
    Opcode::ArrayU16,
    Opcode::LocalU8,
    Opcode::LocalU8Load,
    Opcode::LocalU8Store,
    Opcode::LocalU16,
    Opcode::LocalU16Load,
    Opcode::LocalU16Store,
    Opcode::StaticU8,
    Opcode::StaticU8Load,
    Opcode::StaticU8Store,
    Opcode::StaticU16,
    Opcode::StaticU16Load,
    Opcode::StaticU16Store,
    Opcode::GlobalU16,
    Opcode::GlobalU16Load,
    Opcode::GlobalU16Store,
    Opcode::GlobalU24,
    Opcode::GlobalU24Load,
    Opcode::GlobalU24Store,
    Opcode::IoffsetU8,
    Opcode::IoffsetU8Load,
    Opcode::IoffsetU8Store,
    Opcode::IoffsetS16,
    Opcode::IoffsetS16Load,
    Opcode::IoffsetS16Store,
    Opcode::PushConst0,
    Opcode::PushConst1,
    Opcode::PushConst2,
    Opcode::PushConst3,
    Opcode::PushConst4,
    Opcode::PushConst5,
    Opcode::PushConst6,
    Opcode::PushConst7,
    Opcode::PushConstU8,
    Opcode::PushConstU8U8,
    Opcode::PushConstU8U8U8,
    Opcode::PushConstS16,
    Opcode::PushConstU24,
    Opcode::PushConstU32,
    Opcode::PushConstF,
    Opcode::J,
    Opcode::Jz,
    Opcode::IeqJz,
    Opcode::IneJz,
    Opcode::IgtJz,
    Opcode::IgeJz,
    Opcode::IltJz,
    Opcode::IleJz,
    Opcode::Call,
    Opcode::String,
    Opcode::Switch,
    Opcode::Catch,
    Opcode::Throw,
    Opcode::TextLabelAssignString,
    Opcode::TextLabelAssignInt,
    Opcode::TextLabelAppendString,
    Opcode::TextLabelAppendInt,
];

impl Opcode {
    /// Decode an opcode byte.
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        let op = ALL.get(byte as usize).copied()?;
        debug_assert_eq!(op as u8, byte, "ALL table out of order");
        Some(op)
    }

    /// Mnemonic as printed by the disassembler.
    pub fn mnemonic(self) -> &'static str {
        use Opcode::*;
        match self {
            Nop => "NOP",
            Iadd => "IADD",
            Isub => "ISUB",
            Imul => "IMUL",
            Idiv => "IDIV",
            Imod => "IMOD",
            Ineg => "INEG",
            Inot => "INOT",
            Fadd => "FADD",
            Fsub => "FSUB",
            Fmul => "FMUL",
            Fdiv => "FDIV",
            Fmod => "FMOD",
            Fneg => "FNEG",
            Ieq => "IEQ",
            Ine => "INE",
            Igt => "IGT",
            Ige => "IGE",
            Ilt => "ILT",
            Ile => "ILE",
            Feq => "FEQ",
            Fne => "FNE",
            Fgt => "FGT",
            Fge => "FGE",
            Flt => "FLT",
            Fle => "FLE",
            Iand => "IAND",
            Ior => "IOR",
            Ixor => "IXOR",
            Dup => "DUP",
            Drop => "DROP",
            Load => "LOAD",
            Store => "STORE",
            Native => "NATIVE",
            Enter => "ENTER",
            Leave => "LEAVE",
            ArrayU8 => "ARRAY_U8",
            ArrayU16 => "ARRAY_U16",
            LocalU8 => "LOCAL_U8",
            LocalU8Load => "LOCAL_U8_LOAD",
            LocalU8Store => "LOCAL_U8_STORE",
            LocalU16 => "LOCAL_U16",
            LocalU16Load => "LOCAL_U16_LOAD",
            LocalU16Store => "LOCAL_U16_STORE",
            StaticU8 => "STATIC_U8",
            StaticU8Load => "STATIC_U8_LOAD",
            StaticU8Store => "STATIC_U8_STORE",
            StaticU16 => "STATIC_U16",
            StaticU16Load => "STATIC_U16_LOAD",
            StaticU16Store => "STATIC_U16_STORE",
            GlobalU16 => "GLOBAL_U16",
            GlobalU16Load => "GLOBAL_U16_LOAD",
            GlobalU16Store => "GLOBAL_U16_STORE",
            GlobalU24 => "GLOBAL_U24",
            GlobalU24Load => "GLOBAL_U24_LOAD",
            GlobalU24Store => "GLOBAL_U24_STORE",
            IoffsetU8 => "IOFFSET_U8",
            IoffsetU8Load => "IOFFSET_U8_LOAD",
            IoffsetU8Store => "IOFFSET_U8_STORE",
            IoffsetS16 => "IOFFSET_S16",
            IoffsetS16Load => "IOFFSET_S16_LOAD",
            IoffsetS16Store => "IOFFSET_S16_STORE",
            PushConst0 => "PUSH_CONST_0",
            PushConst1 => "PUSH_CONST_1",
            PushConst2 => "PUSH_CONST_2",
            PushConst3 => "PUSH_CONST_3",
            PushConst4 => "PUSH_CONST_4",
            PushConst5 => "PUSH_CONST_5",
            PushConst6 => "PUSH_CONST_6",
            PushConst7 => "PUSH_CONST_7",
            PushConstU8 => "PUSH_CONST_U8",
            PushConstU8U8 => "PUSH_CONST_U8_U8",
            PushConstU8U8U8 => "PUSH_CONST_U8_U8_U8",
            PushConstS16 => "PUSH_CONST_S16",
            PushConstU24 => "PUSH_CONST_U24",
            PushConstU32 => "PUSH_CONST_U32",
            PushConstF => "PUSH_CONST_F",
            J => "J",
            Jz => "JZ",
            IeqJz => "IEQ_JZ",
            IneJz => "INE_JZ",
            IgtJz => "IGT_JZ",
            IgeJz => "IGE_JZ",
            IltJz => "ILT_JZ",
            IleJz => "ILE_JZ",
            Call => "CALL",
            String => "STRING",
            Switch => "SWITCH",
            Catch => "CATCH",
            Throw => "THROW",
            TextLabelAssignString => "TEXT_LABEL_ASSIGN_STRING",
            TextLabelAssignInt => "TEXT_LABEL_ASSIGN_INT",
            TextLabelAppendString => "TEXT_LABEL_APPEND_STRING",
            TextLabelAppendInt => "TEXT_LABEL_APPEND_INT",
        }
    }

    /// Fixed operand bytes following the opcode byte.
    ///
    /// `ENTER` and `SWITCH` report only their fixed prefix; the total
    /// comes from [`Opcode::instruction_len`].
    pub fn fixed_operand_len(self) -> usize {
        use Opcode::*;
        match self {
            Native => 3,
            Enter => 4,
            Leave => 2,
            ArrayU8 | LocalU8 | LocalU8Load | LocalU8Store | StaticU8 | StaticU8Load
            | StaticU8Store | IoffsetU8 | IoffsetU8Load | IoffsetU8Store | PushConstU8
            | Switch | TextLabelAssignString | TextLabelAssignInt | TextLabelAppendString
            | TextLabelAppendInt => 1,
            ArrayU16 | LocalU16 | LocalU16Load | LocalU16Store | StaticU16 | StaticU16Load
            | StaticU16Store | GlobalU16 | GlobalU16Load | GlobalU16Store | IoffsetS16
            | IoffsetS16Load | IoffsetS16Store | PushConstU8U8 | PushConstS16 | J | Jz
            | IeqJz | IneJz | IgtJz | IgeJz | IltJz | IleJz => 2,
            GlobalU24 | GlobalU24Load | GlobalU24Store | PushConstU8U8U8 | PushConstU24
            | Call => 3,
            PushConstU32 | PushConstF => 4,
            _ => 0,
        }
    }

    /// Total instruction length at `at` in `code`, operands included.
    ///
    /// `None` when the byte stream is truncated or not an opcode.
    pub fn instruction_len(code: &[u8], at: usize) -> Option<usize> {
        let op = Opcode::from_byte(*code.get(at)?)?;
        let fixed = 1 + op.fixed_operand_len();
        let total = match op {
            Opcode::Enter => {
                // args:u8 frame:u16 name_len:u8 name[name_len]
                let name_len = *code.get(at + 4)? as usize;
                fixed + name_len
            }
            Opcode::Switch => {
                let count = *code.get(at + 1)? as usize;
                fixed + count * 6
            }
            _ => fixed,
        };
        (at + total <= code.len()).then_some(total)
    }

    /// Is this a branch with an s16 offset relative to the next
    /// instruction?
    pub fn is_branch(self) -> bool {
        use Opcode::*;
        matches!(self, J | Jz | IeqJz | IneJz | IgtJz | IgeJz | IltJz | IleJz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_table_matches_discriminants() {
        for (index, op) in ALL.iter().enumerate() {
            assert_eq!(*op as usize, index);
        }
    }

    #[test]
    fn test_roundtrip_from_byte() {
        assert_eq!(Opcode::from_byte(0), Some(Opcode::Nop));
        assert_eq!(
            Opcode::from_byte(Opcode::TextLabelAppendInt as u8),
            Some(Opcode::TextLabelAppendInt)
        );
        assert_eq!(Opcode::from_byte(200), None);
    }

    #[test]
    fn test_enter_length_includes_name() {
        // ENTER 0, 2, 4, "main"
        let code = [Opcode::Enter as u8, 0, 2, 0, 4, b'm', b'a', b'i', b'n'];
        assert_eq!(Opcode::instruction_len(&code, 0), Some(9));
    }

    #[test]
    fn test_switch_length_scales_with_count() {
        let mut code = vec![Opcode::Switch as u8, 3];
        code.extend(std::iter::repeat(0).take(3 * 6));
        assert_eq!(Opcode::instruction_len(&code, 0), Some(2 + 18));
    }

    #[test]
    fn test_truncated_stream() {
        let code = [Opcode::Call as u8, 0x01];
        assert_eq!(Opcode::instruction_len(&code, 0), None);
    }

    #[test]
    fn test_branch_predicate() {
        assert!(Opcode::J.is_branch());
        assert!(Opcode::IleJz.is_branch());
        assert!(!Opcode::Call.is_branch());
        assert!(!Opcode::Switch.is_branch());
    }
}
