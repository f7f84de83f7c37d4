//! The native-definition database.
//!
//! A read-only oracle mapping 64-bit native hashes to their definitions.
//! Hashes drift between engine versions; each record carries the
//! original hash alongside the current one, and [`NativeDb::resolve_original`]
//! accepts either and lands on the same record. The database is loaded
//! once and may be shared across compilations.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// One native function definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeDef {
    /// Current-version hash.
    pub hash: u64,
    /// Hash the native carried when it was introduced.
    pub original_hash: u64,
    pub name: String,
    /// Argument slot count.
    pub params: u8,
    /// Return slot count.
    pub returns: u8,
}

#[derive(Debug, Error)]
pub enum NativeDbError {
    #[error("i/o error reading native database: {0}")]
    Io(#[from] std::io::Error),
    #[error("native database parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Read-only native database with version-translation lookup.
#[derive(Debug, Default)]
pub struct NativeDb {
    defs: Vec<NativeDef>,
    /// Any known alias (current or original hash) → definition index.
    by_hash: HashMap<u64, usize>,
}

impl NativeDb {
    pub fn new(defs: Vec<NativeDef>) -> Self {
        let mut by_hash = HashMap::with_capacity(defs.len() * 2);
        for (index, def) in defs.iter().enumerate() {
            by_hash.insert(def.hash, index);
            by_hash.insert(def.original_hash, index);
        }
        Self { defs, by_hash }
    }

    /// Load from a JSON array of [`NativeDef`] records.
    pub fn from_json(json: &str) -> Result<Self, NativeDbError> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    pub fn load(path: &Path) -> Result<Self, NativeDbError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Resolve a hash of any version to its definition.
    pub fn resolve_original(&self, hash: u64) -> Option<&NativeDef> {
        self.by_hash.get(&hash).map(|&index| &self.defs[index])
    }

    pub fn contains(&self, hash: u64) -> bool {
        self.by_hash.contains_key(&hash)
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NativeDb {
        NativeDb::new(vec![
            NativeDef {
                hash: 0x1111,
                original_hash: 0xAAAA,
                name: "GET_GAME_TIMER".to_string(),
                params: 0,
                returns: 1,
            },
            NativeDef {
                hash: 0x2222,
                original_hash: 0x2222,
                name: "WAIT".to_string(),
                params: 1,
                returns: 0,
            },
        ])
    }

    #[test]
    fn test_resolve_by_current_hash() {
        let db = sample();
        assert_eq!(
            db.resolve_original(0x1111).map(|d| d.name.as_str()),
            Some("GET_GAME_TIMER")
        );
    }

    #[test]
    fn test_resolve_by_original_hash() {
        let db = sample();
        assert_eq!(
            db.resolve_original(0xAAAA).map(|d| d.name.as_str()),
            Some("GET_GAME_TIMER")
        );
    }

    #[test]
    fn test_unknown_hash() {
        let db = sample();
        assert!(db.resolve_original(0x9999).is_none());
        assert!(!db.contains(0x9999));
    }

    #[test]
    fn test_from_json() {
        let json = r#"[
            {"hash": 17, "original_hash": 17, "name": "WAIT", "params": 1, "returns": 0}
        ]"#;
        let db = NativeDb::from_json(json).unwrap();
        assert_eq!(db.len(), 1);
        assert!(db.contains(17));
    }
}
