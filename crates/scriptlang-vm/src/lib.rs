// Allow unwrap in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! The ScriptLang VM's instruction set and program container.
//!
//! - `opcode` — opcode bytes and length metadata (shared by the emitter
//!   and the disassembler)
//! - `encode` — little-endian operand readers/writers/patchers
//! - `program` — the compiled program: code pages, images, string pool,
//!   native import table
//! - `natives` — the read-only native-definition database

pub mod encode;
pub mod natives;
pub mod opcode;
pub mod program;

pub use natives::{NativeDb, NativeDbError, NativeDef};
pub use opcode::Opcode;
pub use program::{Program, ProgramError, FORMAT_VERSION, MAGIC, PAGE_SIZE};
