//! The type arena and the value-type lattice.
//!
//! Types live in a [`TypePool`] arena and are referenced by integer
//! [`TypeId`] handles. Mutually recursive struct and function types are
//! expressed as id references into the pool, and resolution mutates pool
//! entries in place (write-through indexing) — no shared mutable aliases.
//!
//! # Design
//!
//! - `TypeId` — handle into the pool; the five basic types have fixed ids
//! - `Type` — the tagged value: basic, struct, array, ref, function,
//!   or an `Unresolved` placeholder awaiting the first pass
//! - Slot sizes: basic/ref = 1, array = 1 + len·elem, struct = Σ fields
//!
//! Equality is structural throughout — a user struct of three FLOAT
//! fields is the same type as the built-in VEC3.

use scriptlang_ast::SourceRange;
use std::fmt;

/// Handle into a [`TypePool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);

impl TypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The five basic kinds. Each occupies one 8-byte slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BasicKind {
    Int,
    Float,
    Bool,
    String,
    Any,
}

impl BasicKind {
    pub fn name(self) -> &'static str {
        match self {
            BasicKind::Int => "INT",
            BasicKind::Float => "FLOAT",
            BasicKind::Bool => "BOOL",
            BasicKind::String => "STRING",
            BasicKind::Any => "ANY",
        }
    }
}

/// One field of a struct type.
#[derive(Debug, Clone)]
pub struct StructField {
    pub name: String,
    pub ty: TypeId,
    /// Declarator range, for field-level diagnostics.
    pub range: SourceRange,
}

/// One parameter of a function signature.
#[derive(Debug, Clone)]
pub struct Param {
    pub ty: TypeId,
    pub name: String,
}

/// A function signature.
#[derive(Debug, Clone)]
pub struct FunctionType {
    /// `None` for a PROC
    pub ret: Option<TypeId>,
    pub params: Vec<Param>,
}

/// Array length: resolved, or still naming a constant.
///
/// Lengths written as constant names stay `Named` until the constant
/// queue has drained; [`TypePool::size_of`] requires `Lit`.
#[derive(Debug, Clone)]
pub enum ArrayLen {
    Lit(u32),
    Named(String),
}

/// A type value.
#[derive(Debug, Clone)]
pub enum Type {
    Basic(BasicKind),
    Struct {
        name: String,
        fields: Vec<StructField>,
    },
    Array {
        elem: TypeId,
        len: ArrayLen,
    },
    Ref(TypeId),
    Function(FunctionType),
    /// Placeholder for a not-yet-resolved type name.
    Unresolved(String),
}

/// Arena of type values.
///
/// The basic types and the error placeholder are interned at construction
/// and shared; everything else is allocated per declaration.
#[derive(Debug, Default)]
pub struct TypePool {
    types: Vec<Type>,
}

impl TypePool {
    pub const INT: TypeId = TypeId(0);
    pub const FLOAT: TypeId = TypeId(1);
    pub const BOOL: TypeId = TypeId(2);
    pub const STRING: TypeId = TypeId(3);
    pub const ANY: TypeId = TypeId(4);
    /// Shared placeholder given to expressions that failed to type; never
    /// survives a successful compile.
    pub const ERROR: TypeId = TypeId(5);

    pub fn new() -> Self {
        let mut pool = Self { types: Vec::new() };
        pool.alloc(Type::Basic(BasicKind::Int));
        pool.alloc(Type::Basic(BasicKind::Float));
        pool.alloc(Type::Basic(BasicKind::Bool));
        pool.alloc(Type::Basic(BasicKind::String));
        pool.alloc(Type::Basic(BasicKind::Any));
        pool.alloc(Type::Unresolved("<error>".to_string()));
        pool
    }

    pub fn basic(kind: BasicKind) -> TypeId {
        match kind {
            BasicKind::Int => Self::INT,
            BasicKind::Float => Self::FLOAT,
            BasicKind::Bool => Self::BOOL,
            BasicKind::String => Self::STRING,
            BasicKind::Any => Self::ANY,
        }
    }

    pub fn alloc(&mut self, ty: Type) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(ty);
        id
    }

    pub fn get(&self, id: TypeId) -> &Type {
        &self.types[id.index()]
    }

    pub fn get_mut(&mut self, id: TypeId) -> &mut Type {
        &mut self.types[id.index()]
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Strip one layer of Ref, if present.
    pub fn deref(&self, id: TypeId) -> TypeId {
        match self.get(id) {
            Type::Ref(elem) => *elem,
            _ => id,
        }
    }

    pub fn is_ref(&self, id: TypeId) -> bool {
        matches!(self.get(id), Type::Ref(_))
    }

    pub fn is_unresolved(&self, id: TypeId) -> bool {
        matches!(self.get(id), Type::Unresolved(_))
    }

    /// Slot size of a type.
    ///
    /// Unresolved types size as 0; they only exist after errors, and the
    /// emitter never runs on an errored compile.
    pub fn size_of(&self, id: TypeId) -> u32 {
        match self.get(id) {
            Type::Basic(_) | Type::Ref(_) => 1,
            Type::Struct { fields, .. } => fields.iter().map(|f| self.size_of(f.ty)).sum(),
            Type::Array { elem, len } => {
                let len = match len {
                    ArrayLen::Lit(n) => *n,
                    ArrayLen::Named(_) => 0,
                };
                1 + len * self.size_of(*elem)
            }
            Type::Function(_) | Type::Unresolved(_) => 0,
        }
    }

    /// Structural equality: same variant, recursively.
    ///
    /// Struct types compare by field layout, so a user struct of three
    /// FLOATs is equal to the built-in VEC3. Recursion carries the set of
    /// pairs already under comparison; revisiting a pair (possible through
    /// Ref fields of mutually recursive structs) counts as equal.
    pub fn equal(&self, a: TypeId, b: TypeId) -> bool {
        self.equal_inner(a, b, &mut Vec::new())
    }

    fn equal_inner(&self, a: TypeId, b: TypeId, assumed: &mut Vec<(TypeId, TypeId)>) -> bool {
        if a == b {
            return true;
        }
        if assumed.contains(&(a, b)) {
            return true;
        }
        assumed.push((a, b));
        let equal = match (self.get(a), self.get(b)) {
            (Type::Basic(ka), Type::Basic(kb)) => ka == kb,
            (
                Type::Array {
                    elem: ea,
                    len: ArrayLen::Lit(la),
                },
                Type::Array {
                    elem: eb,
                    len: ArrayLen::Lit(lb),
                },
            ) => la == lb && self.equal_inner(*ea, *eb, assumed),
            (Type::Ref(ea), Type::Ref(eb)) => self.equal_inner(*ea, *eb, assumed),
            (Type::Struct { fields: fa, .. }, Type::Struct { fields: fb, .. }) => {
                fa.len() == fb.len()
                    && fa
                        .iter()
                        .zip(fb)
                        .all(|(x, y)| self.equal_inner(x.ty, y.ty, assumed))
            }
            (Type::Function(fa), Type::Function(fb)) => {
                let rets_match = match (fa.ret, fb.ret) {
                    (None, None) => true,
                    (Some(ra), Some(rb)) => self.equal_inner(ra, rb, assumed),
                    _ => false,
                };
                rets_match
                    && fa.params.len() == fb.params.len()
                    && fa
                        .params
                        .iter()
                        .zip(&fb.params)
                        .all(|(pa, pb)| self.equal_inner(pa.ty, pb.ty, assumed))
            }
            _ => false,
        };
        assumed.pop();
        equal
    }

    /// Assignability of `src` into `dst`.
    ///
    /// Holds when the two are structurally equal; when `dst` is `ANY` or
    /// `Ref<ANY>` and `src` occupies one slot; or — with `consider_refs` —
    /// when the types match modulo a Ref layer on either side. RETURN
    /// position passes `consider_refs = false`.
    pub fn is_assignable(&self, dst: TypeId, src: TypeId, consider_refs: bool) -> bool {
        if self.equal(dst, src) {
            return true;
        }

        // An ANY or Ref<ANY> destination swallows any one-slot value.
        if self.deref(dst) == Self::ANY && self.is_one_slot_value(src) {
            return true;
        }
        // A Ref<ANY> source aliases into any one-slot destination.
        if matches!(self.get(src), Type::Ref(elem) if *elem == Self::ANY)
            && self.is_one_slot_value(dst)
        {
            return true;
        }

        if consider_refs {
            let a = self.deref(dst);
            let b = self.deref(src);
            if self.equal(a, b) {
                return true;
            }
        }

        false
    }

    /// One slot and a value (not a function signature or a placeholder).
    fn is_one_slot_value(&self, id: TypeId) -> bool {
        !matches!(self.get(id), Type::Function(_) | Type::Unresolved(_)) && self.size_of(id) == 1
    }

    /// Human-readable type name for diagnostics.
    pub fn display(&self, id: TypeId) -> String {
        match self.get(id) {
            Type::Basic(kind) => kind.name().to_string(),
            Type::Struct { name, .. } => name.clone(),
            Type::Array { elem, len } => {
                let len = match len {
                    ArrayLen::Lit(n) => n.to_string(),
                    ArrayLen::Named(name) => name.clone(),
                };
                format!("{}[{}]", self.display(*elem), len)
            }
            Type::Ref(elem) => format!("{}&", self.display(*elem)),
            Type::Function(sig) => {
                let params = sig
                    .params
                    .iter()
                    .map(|p| self.display(p.ty))
                    .collect::<Vec<_>>()
                    .join(", ");
                match sig.ret {
                    Some(ret) => format!("FUNC {} ({params})", self.display(ret)),
                    None => format!("PROC ({params})"),
                }
            }
            Type::Unresolved(name) => format!("<unresolved {name}>"),
        }
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ty#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec3(pool: &mut TypePool) -> TypeId {
        pool.alloc(Type::Struct {
            name: "VEC3".to_string(),
            fields: ["x", "y", "z"]
                .iter()
                .map(|n| StructField {
                    name: n.to_string(),
                    ty: TypePool::FLOAT,
                    range: SourceRange::unknown(),
                })
                .collect(),
        })
    }

    #[test]
    fn test_basic_sizes() {
        let pool = TypePool::new();
        assert_eq!(pool.size_of(TypePool::INT), 1);
        assert_eq!(pool.size_of(TypePool::STRING), 1);
        assert_eq!(pool.size_of(TypePool::ANY), 1);
    }

    #[test]
    fn test_aggregate_sizes() {
        let mut pool = TypePool::new();
        let v3 = vec3(&mut pool);
        assert_eq!(pool.size_of(v3), 3);

        let arr = pool.alloc(Type::Array {
            elem: v3,
            len: ArrayLen::Lit(4),
        });
        assert_eq!(pool.size_of(arr), 1 + 4 * 3);

        let r = pool.alloc(Type::Ref(arr));
        assert_eq!(pool.size_of(r), 1);
    }

    #[test]
    fn test_structural_equality() {
        let mut pool = TypePool::new();
        let a1 = pool.alloc(Type::Array {
            elem: TypePool::INT,
            len: ArrayLen::Lit(3),
        });
        let a2 = pool.alloc(Type::Array {
            elem: TypePool::INT,
            len: ArrayLen::Lit(3),
        });
        let a3 = pool.alloc(Type::Array {
            elem: TypePool::INT,
            len: ArrayLen::Lit(4),
        });
        assert!(pool.equal(a1, a2));
        assert!(!pool.equal(a1, a3));
        assert!(!pool.equal(TypePool::INT, TypePool::FLOAT));
    }

    #[test]
    fn test_structs_compare_by_layout() {
        let mut pool = TypePool::new();
        let v1 = vec3(&mut pool);
        let v2 = vec3(&mut pool);
        assert!(pool.equal(v1, v2));

        let two_floats = pool.alloc(Type::Struct {
            name: "PAIR".to_string(),
            fields: ["a", "b"]
                .iter()
                .map(|n| StructField {
                    name: n.to_string(),
                    ty: TypePool::FLOAT,
                    range: SourceRange::unknown(),
                })
                .collect(),
        });
        assert!(!pool.equal(v1, two_floats));
    }

    #[test]
    fn test_ref_assignability() {
        let mut pool = TypePool::new();
        let r_int = pool.alloc(Type::Ref(TypePool::INT));

        // Ref<INT> := INT and INT := Ref<INT> hold in reference contexts
        assert!(pool.is_assignable(r_int, TypePool::INT, true));
        assert!(pool.is_assignable(TypePool::INT, r_int, true));
        // but not in RETURN position
        assert!(!pool.is_assignable(r_int, TypePool::INT, false));
        assert!(!pool.is_assignable(TypePool::INT, r_int, false));
    }

    #[test]
    fn test_any_assignability() {
        let mut pool = TypePool::new();
        let r_any = pool.alloc(Type::Ref(TypePool::ANY));
        let v3 = vec3(&mut pool);

        assert!(pool.is_assignable(TypePool::ANY, TypePool::INT, false));
        assert!(pool.is_assignable(r_any, TypePool::FLOAT, false));
        // a Ref<ANY> source aliases into any one-slot destination
        assert!(pool.is_assignable(TypePool::INT, r_any, false));
        // but a plain ANY source does not
        assert!(!pool.is_assignable(TypePool::INT, TypePool::ANY, false));
        // multi-slot values never coerce to ANY
        assert!(!pool.is_assignable(TypePool::ANY, v3, true));
    }

    #[test]
    fn test_no_numeric_widening() {
        let pool = TypePool::new();
        assert!(!pool.is_assignable(TypePool::FLOAT, TypePool::INT, true));
        assert!(!pool.is_assignable(TypePool::INT, TypePool::FLOAT, true));
    }

    #[test]
    fn test_function_signature_equality() {
        let mut pool = TypePool::new();
        let f1 = pool.alloc(Type::Function(FunctionType {
            ret: Some(TypePool::INT),
            params: vec![Param {
                ty: TypePool::INT,
                name: "n".to_string(),
            }],
        }));
        let f2 = pool.alloc(Type::Function(FunctionType {
            ret: Some(TypePool::INT),
            params: vec![Param {
                ty: TypePool::INT,
                name: "m".to_string(),
            }],
        }));
        let f3 = pool.alloc(Type::Function(FunctionType {
            ret: None,
            params: vec![],
        }));
        assert!(pool.equal(f1, f2)); // parameter names don't matter
        assert!(!pool.equal(f1, f3));
    }
}
