//! The compiled program container.
//!
//! An in-memory image of one compiled script: code pages, static and
//! global cell images, the string pool, and the native import table. A
//! separate packager wraps this into the host engine's encrypted script
//! container; this type only guarantees the layout rules the VM relies
//! on (16 KB pages, 8-byte cells, NUL-terminated pool strings).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Code page size in bytes. Instructions never straddle a page; the
/// emitter pads with NOPs instead.
pub const PAGE_SIZE: usize = 16_384;

/// Container format version.
pub const FORMAT_VERSION: u16 = 2;

/// Container magic.
pub const MAGIC: [u8; 4] = *b"SLPG";

/// Errors raised while loading or walking a compiled program.
#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("bad magic {found:?}")]
    BadMagic { found: [u8; 4] },
    #[error("unsupported format version {found} (expected {expected})")]
    BadVersion { expected: u16, found: u16 },
    #[error("code page {page} exceeds the page size")]
    OversizedPage { page: usize },
    #[error("malformed program: {0}")]
    Malformed(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("container parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One compiled script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    magic: [u8; 4],
    version: u16,
    pub name: String,
    /// 32-bit integrity tag from `SCRIPT_HASH`.
    pub hash: u32,
    /// Index of the global block this script owns, if any.
    pub globals_block: Option<u32>,
    /// Cell image of the owned global block.
    pub globals: Vec<u64>,
    /// Static cell image; the last `args_count` cells are the script
    /// arguments.
    pub statics: Vec<u64>,
    pub args_count: u32,
    /// Concatenated NUL-terminated UTF-8 strings.
    pub string_pool: Vec<u8>,
    /// Deduplicated native hashes in first-use order; `NATIVE`
    /// instructions index into this table.
    pub natives: Vec<u64>,
    /// Code split into pages of at most [`PAGE_SIZE`] bytes.
    pub code: Vec<Vec<u8>>,
}

impl Program {
    /// Assemble a program from a flat, already page-padded code stream.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        hash: u32,
        globals_block: Option<u32>,
        globals: Vec<u64>,
        statics: Vec<u64>,
        args_count: u32,
        string_pool: Vec<u8>,
        natives: Vec<u64>,
        flat_code: Vec<u8>,
    ) -> Self {
        let code = flat_code
            .chunks(PAGE_SIZE)
            .map(<[u8]>::to_vec)
            .collect();
        Self {
            magic: MAGIC,
            version: FORMAT_VERSION,
            name,
            hash,
            globals_block,
            globals,
            statics,
            args_count,
            string_pool,
            natives,
            code,
        }
    }

    /// Total code size in bytes.
    pub fn code_size(&self) -> usize {
        self.code.iter().map(Vec::len).sum()
    }

    /// The code pages re-joined into one addressable stream.
    pub fn flat_code(&self) -> Vec<u8> {
        let mut flat = Vec::with_capacity(self.code_size());
        for page in &self.code {
            flat.extend_from_slice(page);
        }
        flat
    }

    /// The string starting at a byte offset in the pool.
    pub fn string_at(&self, offset: usize) -> Option<&str> {
        let tail = self.string_pool.get(offset..)?;
        let end = tail.iter().position(|&b| b == 0)?;
        std::str::from_utf8(&tail[..end]).ok()
    }

    /// All pool strings with their byte offsets, in pool order.
    pub fn strings(&self) -> Vec<(usize, &str)> {
        let mut out = Vec::new();
        let mut offset = 0;
        while offset < self.string_pool.len() {
            match self.string_at(offset) {
                Some(s) => {
                    out.push((offset, s));
                    offset += s.len() + 1;
                }
                None => break,
            }
        }
        out
    }

    /// Validate container invariants after loading.
    pub fn validate(&self) -> Result<(), ProgramError> {
        if self.magic != MAGIC {
            return Err(ProgramError::BadMagic { found: self.magic });
        }
        if self.version != FORMAT_VERSION {
            return Err(ProgramError::BadVersion {
                expected: FORMAT_VERSION,
                found: self.version,
            });
        }
        if let Some(page) = self.code.iter().position(|p| p.len() > PAGE_SIZE) {
            return Err(ProgramError::OversizedPage { page });
        }
        if (self.args_count as usize) > self.statics.len() {
            return Err(ProgramError::Malformed(
                "args_count exceeds statics image".to_string(),
            ));
        }
        Ok(())
    }

    /// Serialize into the interchange form consumed by the packager and
    /// the disassembler CLI.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProgramError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Load and validate a serialized program.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProgramError> {
        let program: Program = serde_json::from_slice(bytes)?;
        program.validate()?;
        Ok(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Program {
        Program::new(
            "test".to_string(),
            0xDEAD_BEEF,
            Some(3),
            vec![1, 2],
            vec![0, 42],
            1,
            b"first\0second\0".to_vec(),
            vec![0x1122_3344_5566_7788],
            vec![0; PAGE_SIZE + 10],
        )
    }

    #[test]
    fn test_code_paging() {
        let program = sample();
        assert_eq!(program.code.len(), 2);
        assert_eq!(program.code[0].len(), PAGE_SIZE);
        assert_eq!(program.code[1].len(), 10);
        assert_eq!(program.code_size(), PAGE_SIZE + 10);
        assert_eq!(program.flat_code().len(), PAGE_SIZE + 10);
    }

    #[test]
    fn test_string_pool_walk() {
        let program = sample();
        assert_eq!(program.string_at(0), Some("first"));
        assert_eq!(program.string_at(6), Some("second"));
        assert_eq!(
            program.strings(),
            vec![(0, "first"), (6, "second")]
        );
    }

    #[test]
    fn test_roundtrip() {
        let program = sample();
        let bytes = program.to_bytes().unwrap();
        let loaded = Program::from_bytes(&bytes).unwrap();
        assert_eq!(loaded.name, "test");
        assert_eq!(loaded.hash, 0xDEAD_BEEF);
        assert_eq!(loaded.statics, vec![0, 42]);
        assert_eq!(loaded.natives, vec![0x1122_3344_5566_7788]);
    }

    #[test]
    fn test_validate_rejects_bad_args_count() {
        let mut program = sample();
        program.args_count = 99;
        assert!(matches!(
            program.validate(),
            Err(ProgramError::Malformed(_))
        ));
    }
}
