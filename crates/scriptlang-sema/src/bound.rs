//! The bound tree.
//!
//! Mirrors the AST with every expression carrying a resolved [`TypeId`]
//! and every name-bearing node linked to its [`SymbolId`]. Literals are
//! canonicalised: constant references are inlined as typed literals,
//! negated literal forms collapse, and parentheses vanish.
//!
//! This is the emitter's only view of a function body; nothing downstream
//! looks at the AST again.

use crate::symbol::SymbolId;
use crate::types::TypeId;
use scriptlang_ast::{BinaryOp, SourceRange, UnaryOp};

/// A typed, name-resolved expression.
#[derive(Debug, Clone)]
pub struct BoundExpr {
    pub kind: BoundExprKind,
    pub ty: TypeId,
    pub range: SourceRange,
}

impl BoundExpr {
    pub fn new(kind: BoundExprKind, ty: TypeId, range: SourceRange) -> Self {
        Self { kind, ty, range }
    }
}

/// Bound expression variants.
#[derive(Debug, Clone)]
pub enum BoundExprKind {
    IntLit(i64),
    FloatLit(f32),
    BoolLit(bool),
    StringLit(String),
    /// Reference to a variable symbol
    Var(SymbolId),
    /// Struct member access by field index
    Member {
        base: Box<BoundExpr>,
        field: usize,
    },
    /// Array element access
    Index {
        base: Box<BoundExpr>,
        index: Box<BoundExpr>,
    },
    /// Call of a defined function or native
    Call {
        callee: SymbolId,
        args: Vec<BoundExpr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<BoundExpr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<BoundExpr>,
        right: Box<BoundExpr>,
    },
    /// Vector aggregate; component slot counts sum to 3
    Vector(Vec<BoundExpr>),
    /// Placeholder left behind by a reported error; never emitted
    Error,
}

impl BoundExprKind {
    /// Can this expression designate a storage location?
    pub fn is_lvalue(&self) -> bool {
        match self {
            BoundExprKind::Var(_) => true,
            BoundExprKind::Member { base, .. } => base.kind.is_lvalue(),
            BoundExprKind::Index { base, .. } => base.kind.is_lvalue(),
            // Error nodes pose as lvalues so one mistake doesn't double-report
            BoundExprKind::Error => true,
            _ => false,
        }
    }
}

/// A checked statement.
#[derive(Debug, Clone)]
pub enum BoundStmt {
    /// Local declaration; the symbol already owns its frame slot
    Var {
        symbol: SymbolId,
        init: Option<BoundExpr>,
    },
    /// Simple assignment (compound forms are desugared during binding)
    Assign { lhs: BoundExpr, rhs: BoundExpr },
    /// Bare invocation
    Invoke(BoundExpr),
    If {
        cond: BoundExpr,
        then_body: Vec<BoundStmt>,
        else_body: Option<Vec<BoundStmt>>,
    },
    While {
        cond: BoundExpr,
        body: Vec<BoundStmt>,
    },
    Repeat {
        limit: BoundExpr,
        counter: BoundExpr,
        body: Vec<BoundStmt>,
    },
    Switch {
        value: BoundExpr,
        cases: Vec<BoundCase>,
        default: Option<Vec<BoundStmt>>,
    },
    Break,
    Return(Option<BoundExpr>),
}

/// One SWITCH arm with its folded label value.
#[derive(Debug, Clone)]
pub struct BoundCase {
    pub value: i64,
    pub body: Vec<BoundStmt>,
}

/// A fully checked function body ready for the emitter.
#[derive(Debug, Clone)]
pub struct BoundFunction {
    pub symbol: SymbolId,
    pub body: Vec<BoundStmt>,
}
