//! Untyped syntax tree.
//!
//! The parser produces one [`Unit`] per translation unit. Nodes are plain
//! data with a [`SourceRange`] each; no semantic information lives here —
//! name binding and types are attached later by the sema passes, which
//! produce a separate bound tree.
//!
//! Declarators are composable per the surface grammar: a base type name
//! plus a chain of `Array(length)` and `Ref` wrappers. The resulting
//! semantic type is built outside-in from [`TypeRef::wrappers`].

use crate::span::SourceRange;

/// One parsed translation unit.
#[derive(Debug, Clone, Default)]
pub struct Unit {
    pub decls: Vec<Decl>,
}

// =============================================================================
// Declarations
// =============================================================================

/// Top-level declaration.
#[derive(Debug, Clone)]
pub enum Decl {
    /// `SCRIPT_NAME id`
    ScriptName { name: String, range: SourceRange },
    /// `SCRIPT_HASH int`
    ScriptHash { hash: u32, range: SourceRange },
    /// `USING "path"`
    Using { path: String, range: SourceRange },
    /// `STRUCT id … ENDSTRUCT`
    Struct {
        name: String,
        name_range: SourceRange,
        fields: Vec<VarDecl>,
        range: SourceRange,
    },
    /// `CONST decl`
    Const(VarDecl),
    /// Plain top-level `decl` (a script static)
    Static(VarDecl),
    /// `GLOBAL <block> <owner> … ENDGLOBAL`
    Global {
        block: u32,
        owner: String,
        vars: Vec<VarDecl>,
        range: SourceRange,
    },
    /// `PROC`/`FUNC` in any of their defined/proto/native forms
    Function(FunctionDecl),
}

impl Decl {
    pub fn range(&self) -> SourceRange {
        match self {
            Decl::ScriptName { range, .. }
            | Decl::ScriptHash { range, .. }
            | Decl::Using { range, .. }
            | Decl::Struct { range, .. }
            | Decl::Global { range, .. } => *range,
            Decl::Const(v) | Decl::Static(v) => v.range,
            Decl::Function(f) => f.range,
        }
    }
}

/// How a function is provided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionProvenance {
    /// Has a body in this unit
    Defined,
    /// Engine-provided, invoked through the native import table
    Native,
    /// `PROTO` — signature alias only, never callable
    Prototype,
}

/// `PROC id(params) … ENDPROC` / `FUNC T id(params) … ENDFUNC` and the
/// `PROTO`/`NATIVE` headers that share their signature syntax.
#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub name: String,
    pub name_range: SourceRange,
    /// `None` for a PROC, `Some` for a FUNC
    pub ret: Option<TypeRef>,
    pub params: Vec<VarDecl>,
    /// `None` for NATIVE and PROTO forms
    pub body: Option<Vec<Stmt>>,
    pub provenance: FunctionProvenance,
    pub range: SourceRange,
}

/// A single declarator: type reference, name, optional initializer.
///
/// Used for statics, constants, globals, struct fields, parameters, and
/// local declarations alike; context decides what is legal.
#[derive(Debug, Clone)]
pub struct VarDecl {
    pub ty: TypeRef,
    pub name: String,
    pub name_range: SourceRange,
    pub init: Option<Expr>,
    pub range: SourceRange,
}

/// Reference to a type in source: base name plus declarator wrappers.
///
/// `wrappers` is ordered outermost-first: `INT &x[3]` parses to
/// `[Ref, Array(3)]` over base `INT`.
#[derive(Debug, Clone)]
pub struct TypeRef {
    pub base: String,
    pub wrappers: Vec<TypeWrapper>,
    pub range: SourceRange,
}

/// One declarator wrapper.
#[derive(Debug, Clone)]
pub enum TypeWrapper {
    /// `[length]` — the length expression must fold to a positive INT
    Array(Expr),
    /// `&`
    Ref,
}

// =============================================================================
// Statements
// =============================================================================

/// A statement inside a PROC/FUNC body.
#[derive(Debug, Clone)]
pub enum Stmt {
    /// Local variable declaration
    Var(VarDecl),
    /// `lhs = rhs` or compound `lhs op= rhs`
    Assign {
        lhs: Expr,
        op: Option<BinaryOp>,
        rhs: Expr,
        range: SourceRange,
    },
    /// Bare invocation used as a statement
    Invoke { call: Expr, range: SourceRange },
    /// `IF cond … [ELSE …] ENDIF`
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Option<Vec<Stmt>>,
        range: SourceRange,
    },
    /// `WHILE cond … ENDWHILE`
    While {
        cond: Expr,
        body: Vec<Stmt>,
        range: SourceRange,
    },
    /// `REPEAT limit counter … ENDREPEAT`
    Repeat {
        limit: Expr,
        counter: Expr,
        body: Vec<Stmt>,
        range: SourceRange,
    },
    /// `SWITCH value … ENDSWITCH`
    Switch {
        value: Expr,
        cases: Vec<SwitchCase>,
        default: Option<Vec<Stmt>>,
        range: SourceRange,
    },
    /// `BREAK` (valid inside a SWITCH case)
    Break { range: SourceRange },
    /// `RETURN [expr]`
    Return {
        value: Option<Expr>,
        range: SourceRange,
    },
}

impl Stmt {
    pub fn range(&self) -> SourceRange {
        match self {
            Stmt::Var(v) => v.range,
            Stmt::Assign { range, .. }
            | Stmt::Invoke { range, .. }
            | Stmt::If { range, .. }
            | Stmt::While { range, .. }
            | Stmt::Repeat { range, .. }
            | Stmt::Switch { range, .. }
            | Stmt::Break { range }
            | Stmt::Return { range, .. } => *range,
        }
    }
}

/// One `CASE value` arm of a SWITCH.
#[derive(Debug, Clone)]
pub struct SwitchCase {
    pub value: Expr,
    pub body: Vec<Stmt>,
    pub range: SourceRange,
}

// =============================================================================
// Expressions
// =============================================================================

/// An expression with its source range.
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub range: SourceRange,
}

impl Expr {
    pub fn new(kind: ExprKind, range: SourceRange) -> Self {
        Self { kind, range }
    }
}

/// Expression node variants.
#[derive(Debug, Clone)]
pub enum ExprKind {
    Ident(String),
    IntLit(i64),
    FloatLit(f32),
    BoolLit(bool),
    StringLit(String),
    /// `( inner )` — kept distinct so lvalue checks can see through it
    Paren(Box<Expr>),
    /// `base.field`
    Member {
        base: Box<Expr>,
        field: String,
        field_range: SourceRange,
    },
    /// `base[index]`
    Index { base: Box<Expr>, index: Box<Expr> },
    /// `callee(args…)`
    Invoke { callee: Box<Expr>, args: Vec<Expr> },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `<<x, y, z>>` vector literal
    Vector(Vec<Expr>),
}

/// Prefix operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `NOT`
    Not,
    /// `-`
    Neg,
}

/// Infix operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    And,
    Or,
}

impl BinaryOp {
    /// Mnemonic used in diagnostics.
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "<>",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }
}
