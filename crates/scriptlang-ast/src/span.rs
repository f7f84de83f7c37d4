//! Source location tracking for error reporting.
//!
//! # Design
//!
//! - `Position` — a `(line, column)` pair, both 1-based
//! - `SourceRange` — half-open `[begin, end)` over one file, with an
//!   explicit "unknown" sentinel for built-in symbols
//! - `SourceMap` — owns all source files of a compilation and converts
//!   byte offsets into positions
//! - `SourceFile` — a single file with a precomputed line index
//!
//! # Examples
//!
//! ```
//! # use scriptlang_ast::span::*;
//! # use std::path::PathBuf;
//! let mut map = SourceMap::new();
//! let file = map.add_file(PathBuf::from("test.sc"), "SCRIPT_NAME t\n".to_string());
//! let range = map.range(file, 0..11);
//! assert_eq!(range.begin, Position::new(1, 1));
//! assert_eq!(range.end, Position::new(1, 12));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Identifier of a file inside a [`SourceMap`].
pub type FileId = u16;

/// A `(line, column)` source position, both 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.line, self.column)
    }
}

/// Half-open source range `[begin, end)` over one file.
///
/// Built-in symbols (VEC3, the implicit entry point) have no source text;
/// they carry the [`SourceRange::unknown`] sentinel, which formats as `(?)`
/// and never participates in snippet lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRange {
    pub file: FileId,
    pub begin: Position,
    pub end: Position,
}

impl SourceRange {
    /// File id reserved for the unknown sentinel.
    const UNKNOWN_FILE: FileId = FileId::MAX;

    pub fn new(file: FileId, begin: Position, end: Position) -> Self {
        Self { file, begin, end }
    }

    /// The sentinel range used for symbols with no source text.
    pub fn unknown() -> Self {
        Self {
            file: Self::UNKNOWN_FILE,
            begin: Position::new(0, 0),
            end: Position::new(0, 0),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.file == Self::UNKNOWN_FILE
    }

    /// Range covering both `self` and `other`.
    ///
    /// Unknown operands are absorbed; merging two unknowns stays unknown.
    pub fn merge(&self, other: &SourceRange) -> SourceRange {
        if self.is_unknown() {
            return *other;
        }
        if other.is_unknown() {
            return *self;
        }
        debug_assert_eq!(self.file, other.file, "cannot merge ranges from different files");
        SourceRange {
            file: self.file,
            begin: self.begin.min(other.begin),
            end: self.end.max(other.end),
        }
    }
}

/// Collection of all source files in a compilation.
#[derive(Debug, Clone, Default)]
pub struct SourceMap {
    files: Vec<SourceFile>,
}

/// A single source file with a line index.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path as given to the compiler (shown in diagnostics).
    pub path: PathBuf,
    /// Original source text.
    pub source: String,
    /// Byte offsets of each line start; `line_starts[0]` is always 0 and a
    /// trailing EOF sentinel closes the last line.
    line_starts: Vec<u32>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self { files: Vec::new() }
    }

    /// Add a source file and return its id.
    pub fn add_file(&mut self, path: PathBuf, source: String) -> FileId {
        let id = self.files.len();
        assert!(
            id < SourceRange::UNKNOWN_FILE as usize,
            "too many source files"
        );
        self.files.push(SourceFile::new(path, source));
        id as FileId
    }

    pub fn file(&self, id: FileId) -> &SourceFile {
        &self.files[id as usize]
    }

    /// Path for a range's file, or `None` for the unknown sentinel.
    pub fn path(&self, range: &SourceRange) -> Option<&Path> {
        if range.is_unknown() {
            return None;
        }
        Some(&self.files[range.file as usize].path)
    }

    /// Look up a file id by path.
    pub fn find(&self, path: &Path) -> Option<FileId> {
        self.files
            .iter()
            .position(|f| f.path == path)
            .map(|i| i as FileId)
    }

    /// Build a [`SourceRange`] from a byte range inside a file.
    pub fn range(&self, file: FileId, bytes: std::ops::Range<usize>) -> SourceRange {
        let f = &self.files[file as usize];
        SourceRange::new(file, f.position(bytes.start as u32), f.position(bytes.end as u32))
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

impl SourceFile {
    pub fn new(path: PathBuf, source: String) -> Self {
        let line_starts = compute_line_starts(&source);
        Self {
            path,
            source,
            line_starts,
        }
    }

    /// Convert a byte offset into a 1-based `(line, column)` position.
    ///
    /// # Panics
    /// Panics if the offset is beyond EOF.
    pub fn position(&self, offset: u32) -> Position {
        assert!(
            offset <= self.source.len() as u32,
            "offset {} is beyond EOF (len = {})",
            offset,
            self.source.len()
        );
        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx.max(1) - 1,
        };
        Position::new(
            (line_idx + 1) as u32,
            offset - self.line_starts[line_idx] + 1,
        )
    }

    /// Text of a 1-based line, without its terminator.
    pub fn line_text(&self, line: u32) -> Option<&str> {
        if line == 0 || line as usize >= self.line_starts.len() {
            return None;
        }
        let start = self.line_starts[(line - 1) as usize] as usize;
        let end = self.line_starts[line as usize] as usize;
        Some(self.source[start..end].trim_end_matches(['\n', '\r']))
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len() - 1
    }
}

/// Byte offsets of line starts, with an EOF sentinel closing the last line.
fn compute_line_starts(source: &str) -> Vec<u32> {
    let mut line_starts = vec![0];
    for (idx, ch) in source.char_indices() {
        if ch == '\n' {
            line_starts.push((idx + 1) as u32);
        }
    }
    if line_starts.last() != Some(&(source.len() as u32)) {
        line_starts.push(source.len() as u32);
    }
    line_starts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_from_offset() {
        let file = SourceFile::new(PathBuf::from("t.sc"), "hello\nworld\n".to_string());
        assert_eq!(file.position(0), Position::new(1, 1));
        assert_eq!(file.position(5), Position::new(1, 6));
        assert_eq!(file.position(6), Position::new(2, 1));
        assert_eq!(file.position(11), Position::new(2, 6));
    }

    #[test]
    fn test_unknown_sentinel() {
        let unknown = SourceRange::unknown();
        assert!(unknown.is_unknown());
        let real = SourceRange::new(0, Position::new(1, 1), Position::new(1, 5));
        assert_eq!(unknown.merge(&real), real);
        assert_eq!(real.merge(&unknown), real);
        assert!(unknown.merge(&SourceRange::unknown()).is_unknown());
    }

    #[test]
    fn test_range_merge() {
        let a = SourceRange::new(0, Position::new(1, 1), Position::new(1, 5));
        let b = SourceRange::new(0, Position::new(1, 3), Position::new(2, 2));
        let merged = a.merge(&b);
        assert_eq!(merged.begin, Position::new(1, 1));
        assert_eq!(merged.end, Position::new(2, 2));
    }

    #[test]
    fn test_line_text() {
        let file = SourceFile::new(PathBuf::from("t.sc"), "hello\nworld".to_string());
        assert_eq!(file.line_text(1), Some("hello"));
        assert_eq!(file.line_text(2), Some("world"));
        assert_eq!(file.line_text(3), None);
        assert_eq!(file.line_count(), 2);
    }

    #[test]
    fn test_source_map_range() {
        let mut map = SourceMap::new();
        let id = map.add_file(PathBuf::from("t.sc"), "PROC MAIN()\nENDPROC\n".to_string());
        let range = map.range(id, 5..9);
        assert_eq!(range.begin, Position::new(1, 6));
        assert_eq!(range.end, Position::new(1, 10));
        assert_eq!(map.find(Path::new("t.sc")), Some(id));
        assert_eq!(map.find(Path::new("missing.sc")), None);
    }
}
