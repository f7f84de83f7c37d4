//! Symbol arena and the lexically scoped symbol table.
//!
//! Symbols live in a per-unit arena referenced by [`SymbolId`]; the scope
//! chain maps case-folded names to ids. All names in a scope are visible
//! to all members of that scope — addition order never affects lookup,
//! which is what lets mutually recursive functions and structs resolve
//! without forward declarations.

use crate::const_eval::ConstValue;
use crate::types::{BasicKind, StructField, Type, TypeId, TypePool};
use indexmap::IndexMap;
use scriptlang_ast::{DiagnosticKind, Diagnostics, SourceRange};

/// Handle into a [`SymbolTable`]'s arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(u32);

impl SymbolId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A named type (built-in basic, VEC3, or a user STRUCT).
#[derive(Debug, Clone)]
pub struct TypeSymbol {
    pub name: String,
    pub range: SourceRange,
    pub ty: TypeId,
}

/// Storage class of a variable symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Static,
    Global,
    Constant,
    Local,
    /// Function parameter — a local in the leading frame slots
    Argument,
}

/// A variable of any storage class.
#[derive(Debug, Clone)]
pub struct VariableSymbol {
    pub name: String,
    pub range: SourceRange,
    pub ty: TypeId,
    pub kind: VarKind,
    /// Frame slot for locals/arguments, static slot for statics, absolute
    /// address for globals. Unset until layout assigns it.
    pub slot: Option<u32>,
    /// Folded initializer cells. Constants hold exactly one; statics and
    /// globals hold one cell per initialized slot.
    pub init: Option<Vec<ConstValue>>,
}

impl VariableSymbol {
    /// The folded value of a (scalar) constant.
    pub fn const_value(&self) -> Option<&ConstValue> {
        match self.init.as_deref() {
            Some([value]) => Some(value),
            _ => None,
        }
    }
}

/// How a function is provided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Defined,
    /// Engine-provided, identified by its 64-bit hash
    Native(u64),
    Prototype,
}

/// A PROC or FUNC of any provenance.
#[derive(Debug, Clone)]
pub struct FunctionSymbol {
    pub name: String,
    pub range: SourceRange,
    /// Always a `Type::Function` id
    pub ty: TypeId,
    pub kind: FunctionKind,
    /// Slot counts, filled in by the second pass for defined functions.
    pub args_size: u32,
    pub locals_size: u32,
}

/// Any symbol.
#[derive(Debug, Clone)]
pub enum Symbol {
    Type(TypeSymbol),
    Variable(VariableSymbol),
    Function(FunctionSymbol),
}

impl Symbol {
    pub fn name(&self) -> &str {
        match self {
            Symbol::Type(s) => &s.name,
            Symbol::Variable(s) => &s.name,
            Symbol::Function(s) => &s.name,
        }
    }

    pub fn range(&self) -> SourceRange {
        match self {
            Symbol::Type(s) => s.range,
            Symbol::Variable(s) => s.range,
            Symbol::Function(s) => s.range,
        }
    }
}

/// Chain of scopes over a symbol arena.
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    /// scopes[0] is the root; the last entry is the innermost scope.
    scopes: Vec<Scope>,
}

#[derive(Debug, Default)]
struct Scope {
    /// Case-folded name → symbol. Insertion order is preserved so imports
    /// and reports stay deterministic.
    names: IndexMap<String, SymbolId>,
}

/// Case fold used for every name comparison in the language.
fn fold(name: &str) -> String {
    name.to_ascii_lowercase()
}

impl SymbolTable {
    /// Empty table with only the root scope.
    pub fn new() -> Self {
        Self {
            symbols: Vec::new(),
            scopes: vec![Scope::default()],
        }
    }

    /// Table pre-loaded with the built-in type symbols (the five basic
    /// types plus the VEC3 struct). Built-ins carry the unknown range and
    /// are excluded from imports.
    pub fn with_builtins(pool: &mut TypePool) -> Self {
        let mut table = Self::new();
        for kind in [
            BasicKind::Int,
            BasicKind::Float,
            BasicKind::Bool,
            BasicKind::String,
            BasicKind::Any,
        ] {
            let added = table.add(Symbol::Type(TypeSymbol {
                name: kind.name().to_string(),
                range: SourceRange::unknown(),
                ty: TypePool::basic(kind),
            }));
            debug_assert!(added.is_ok(), "builtin registration cannot collide");
        }

        let vec3 = pool.alloc(Type::Struct {
            name: "VEC3".to_string(),
            fields: ["x", "y", "z"]
                .iter()
                .map(|n| StructField {
                    name: n.to_string(),
                    ty: TypePool::FLOAT,
                    range: SourceRange::unknown(),
                })
                .collect(),
        });
        let added = table.add(Symbol::Type(TypeSymbol {
            name: "VEC3".to_string(),
            range: SourceRange::unknown(),
            ty: vec3,
        }));
        debug_assert!(added.is_ok(), "builtin registration cannot collide");
        table
    }

    /// Add a symbol to the innermost scope.
    ///
    /// Same-scope shadowing is forbidden; on a name collision the symbol
    /// is not added and the existing id comes back as the error.
    pub fn add(&mut self, symbol: Symbol) -> Result<SymbolId, SymbolId> {
        let key = fold(symbol.name());
        let scope = self
            .scopes
            .last_mut()
            .expect("symbol table always has a root scope");
        if let Some(&existing) = scope.names.get(&key) {
            return Err(existing);
        }
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(symbol);
        scope
            .names
            .insert(key, id);
        Ok(id)
    }

    /// Innermost visible symbol with this name.
    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        let key = fold(name);
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.names.get(&key).copied())
    }

    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.index()]
    }

    pub fn get_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.index()]
    }

    pub fn enter_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    pub fn exit_scope(&mut self) {
        assert!(self.scopes.len() > 1, "cannot exit the root scope");
        self.scopes.pop();
    }

    /// Copy the root-scope symbols of `other` into this table's root.
    ///
    /// Built-ins (unknown range) are skipped — every table already has its
    /// own. A collision reports `DuplicateImport` as a warning and keeps
    /// the existing symbol, which makes import idempotent.
    pub fn import(&mut self, other: &SymbolTable, diags: &mut Diagnostics) {
        let imports: Vec<Symbol> = other.scopes[0]
            .names
            .values()
            .map(|&id| other.get(id).clone())
            .filter(|s| !s.range().is_unknown())
            .collect();

        for symbol in imports {
            let key = fold(symbol.name());
            if let Some(&existing) = self.scopes[0].names.get(&key) {
                diags.warning(
                    DiagnosticKind::DuplicateImport,
                    self.get(existing).range(),
                    format!("import collides with existing symbol '{}'", symbol.name()),
                );
                continue;
            }
            let id = SymbolId(self.symbols.len() as u32);
            self.symbols.push(symbol);
            self.scopes[0].names.insert(key, id);
        }
    }

    /// All symbols in arena order.
    pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &Symbol)> {
        self.symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (SymbolId(i as u32), s))
    }

    /// Ids of every symbol currently in the root scope, in insertion order.
    pub fn root_symbols(&self) -> impl Iterator<Item = SymbolId> + '_ {
        self.scopes[0].names.values().copied()
    }

    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str, line: u32) -> Symbol {
        Symbol::Variable(VariableSymbol {
            name: name.to_string(),
            range: SourceRange::new(
                0,
                scriptlang_ast::span::Position::new(line, 1),
                scriptlang_ast::span::Position::new(line, 2),
            ),
            ty: TypePool::INT,
            kind: VarKind::Static,
            slot: None,
            init: None,
        })
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let mut table = SymbolTable::new();
        table.add(var("Counter", 1)).unwrap();
        assert!(table.lookup("counter").is_some());
        assert!(table.lookup("COUNTER").is_some());
        assert_eq!(table.lookup("counter"), table.lookup("Counter"));
    }

    #[test]
    fn test_same_scope_duplicate_rejected() {
        let mut table = SymbolTable::new();
        let first = table.add(var("x", 1)).unwrap();
        let err = table.add(var("X", 2)).unwrap_err();
        assert_eq!(err, first);
    }

    #[test]
    fn test_outer_scope_shadowing_allowed() {
        let mut table = SymbolTable::new();
        let outer = table.add(var("x", 1)).unwrap();
        table.enter_scope();
        let inner = table.add(var("x", 2)).unwrap();
        assert_eq!(table.lookup("x"), Some(inner));
        table.exit_scope();
        assert_eq!(table.lookup("x"), Some(outer));
    }

    #[test]
    fn test_import_copies_root_only_and_skips_builtins() {
        let mut pool = TypePool::new();
        let mut src = SymbolTable::with_builtins(&mut pool);
        src.add(var("shared", 1)).unwrap();
        src.enter_scope();
        src.add(var("nested", 2)).unwrap();
        src.exit_scope();

        let mut dst = SymbolTable::with_builtins(&mut pool);
        let mut diags = Diagnostics::new();
        dst.import(&src, &mut diags);

        assert!(diags.is_empty(), "builtins must not collide on import");
        assert!(dst.lookup("shared").is_some());
        assert!(dst.lookup("nested").is_none());
    }

    #[test]
    fn test_import_is_idempotent_modulo_warning() {
        let mut pool = TypePool::new();
        let mut src = SymbolTable::with_builtins(&mut pool);
        src.add(var("shared", 1)).unwrap();

        let mut dst = SymbolTable::with_builtins(&mut pool);
        let mut diags = Diagnostics::new();
        dst.import(&src, &mut diags);
        let count_after_first = dst.iter().count();

        dst.import(&src, &mut diags);
        assert_eq!(dst.iter().count(), count_after_first);
        assert_eq!(diags.len(), 1);
        assert!(!diags.has_errors(), "duplicate import is a warning");
    }

}
