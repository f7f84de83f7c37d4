//! Constant-expression evaluation.
//!
//! A small tree interpreter over INT/FLOAT/BOOL/STRING used to reduce
//! CONST initializers, static/global initializers, and SWITCH case labels
//! to literals. Values model the VM's 8-byte stack cells with integer,
//! float, and boolean views; STRING constants stay symbolic — they become
//! string-pool references at emission, never cell values.

use crate::types::{TypeId, TypePool};
use scriptlang_ast::{BinaryOp, DiagnosticKind, Expr, ExprKind, SourceRange, UnaryOp};

/// A folded constant.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Int(i64),
    Float(f32),
    Bool(bool),
    Str(String),
}

impl ConstValue {
    /// The basic type this value inhabits.
    pub fn type_id(&self) -> TypeId {
        match self {
            ConstValue::Int(_) => TypePool::INT,
            ConstValue::Float(_) => TypePool::FLOAT,
            ConstValue::Bool(_) => TypePool::BOOL,
            ConstValue::Str(_) => TypePool::STRING,
        }
    }

    /// Zero value of a basic type, used to poison failed constants so one
    /// bad initializer doesn't cascade.
    pub fn zero_of(ty: TypeId) -> ConstValue {
        match ty {
            TypePool::FLOAT => ConstValue::Float(0.0),
            TypePool::BOOL => ConstValue::Bool(false),
            TypePool::STRING => ConstValue::Str(String::new()),
            _ => ConstValue::Int(0),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConstValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

/// Evaluation failure, convertible to a diagnostic by the caller.
#[derive(Debug, Clone)]
pub struct EvalError {
    pub kind: DiagnosticKind,
    pub range: SourceRange,
    pub message: String,
}

impl EvalError {
    fn new(kind: DiagnosticKind, range: SourceRange, message: impl Into<String>) -> Self {
        Self {
            kind,
            range,
            message: message.into(),
        }
    }

    fn not_constant(range: SourceRange, what: &str) -> Self {
        Self::new(
            DiagnosticKind::NonConstInConst,
            range,
            format!("{what} is not allowed in a constant expression"),
        )
    }
}

/// Evaluate an expression against an environment of already-folded names.
///
/// `env` resolves an identifier to its folded value; a `None` comes back
/// as `NonConstInConst` (the caller only evaluates once every dependency
/// has folded, so a miss means a non-constant reference).
pub fn eval(
    expr: &Expr,
    env: &dyn Fn(&str) -> Option<ConstValue>,
) -> Result<ConstValue, EvalError> {
    match &expr.kind {
        ExprKind::IntLit(v) => Ok(ConstValue::Int(*v)),
        ExprKind::FloatLit(v) => Ok(ConstValue::Float(*v)),
        ExprKind::BoolLit(v) => Ok(ConstValue::Bool(*v)),
        ExprKind::StringLit(s) => Ok(ConstValue::Str(s.clone())),
        ExprKind::Paren(inner) => eval(inner, env),
        ExprKind::Ident(name) => env(name).ok_or_else(|| {
            EvalError::new(
                DiagnosticKind::NonConstInConst,
                expr.range,
                format!("'{name}' is not a constant"),
            )
        }),
        ExprKind::Unary { op, operand } => {
            let value = eval(operand, env)?;
            eval_unary(*op, value, expr.range)
        }
        ExprKind::Binary { op, left, right } => {
            let lhs = eval(left, env)?;
            let rhs = eval(right, env)?;
            eval_binary(*op, lhs, rhs, expr.range)
        }
        ExprKind::Member { .. } => Err(EvalError::not_constant(expr.range, "member access")),
        ExprKind::Index { .. } => Err(EvalError::not_constant(expr.range, "array indexing")),
        ExprKind::Invoke { .. } => Err(EvalError::not_constant(expr.range, "an invocation")),
        ExprKind::Vector(_) => Err(EvalError::not_constant(expr.range, "a vector literal")),
    }
}

fn eval_unary(op: UnaryOp, value: ConstValue, range: SourceRange) -> Result<ConstValue, EvalError> {
    match (op, value) {
        (UnaryOp::Not, ConstValue::Bool(b)) => Ok(ConstValue::Bool(!b)),
        (UnaryOp::Neg, ConstValue::Int(v)) => Ok(ConstValue::Int(v.wrapping_neg())),
        (UnaryOp::Neg, ConstValue::Float(v)) => Ok(ConstValue::Float(-v)),
        (op, value) => {
            let op_name = match op {
                UnaryOp::Not => "NOT",
                UnaryOp::Neg => "'-'",
            };
            Err(EvalError::new(
                DiagnosticKind::TypeMismatch,
                range,
                format!("unary {op_name} is not defined for {}", describe(&value)),
            ))
        }
    }
}

fn eval_binary(
    op: BinaryOp,
    lhs: ConstValue,
    rhs: ConstValue,
    range: SourceRange,
) -> Result<ConstValue, EvalError> {
    use BinaryOp::*;
    use ConstValue::*;

    let mismatch = |lhs: &ConstValue, rhs: &ConstValue| {
        EvalError::new(
            DiagnosticKind::TypeMismatch,
            range,
            format!(
                "operator {} cannot combine {} and {}",
                op.symbol(),
                describe(lhs),
                describe(rhs)
            ),
        )
    };

    match (op, lhs, rhs) {
        // Integer arithmetic and bitwise; division guards against zero.
        (Add, Int(a), Int(b)) => Ok(Int(a.wrapping_add(b))),
        (Sub, Int(a), Int(b)) => Ok(Int(a.wrapping_sub(b))),
        (Mul, Int(a), Int(b)) => Ok(Int(a.wrapping_mul(b))),
        (Div, Int(_), Int(0)) | (Mod, Int(_), Int(0)) => Err(EvalError::new(
            DiagnosticKind::TypeMismatch,
            range,
            "division by zero in constant expression",
        )),
        (Div, Int(a), Int(b)) => Ok(Int(a.wrapping_div(b))),
        (Mod, Int(a), Int(b)) => Ok(Int(a.wrapping_rem(b))),
        (BitAnd, Int(a), Int(b)) => Ok(Int(a & b)),
        (BitOr, Int(a), Int(b)) => Ok(Int(a | b)),
        (BitXor, Int(a), Int(b)) => Ok(Int(a ^ b)),

        // Float arithmetic
        (Add, Float(a), Float(b)) => Ok(Float(a + b)),
        (Sub, Float(a), Float(b)) => Ok(Float(a - b)),
        (Mul, Float(a), Float(b)) => Ok(Float(a * b)),
        (Div, Float(a), Float(b)) => Ok(Float(a / b)),
        (Mod, Float(a), Float(b)) => Ok(Float(a % b)),

        // Comparison on matching numeric types
        (Eq, Int(a), Int(b)) => Ok(Bool(a == b)),
        (Ne, Int(a), Int(b)) => Ok(Bool(a != b)),
        (Lt, Int(a), Int(b)) => Ok(Bool(a < b)),
        (Le, Int(a), Int(b)) => Ok(Bool(a <= b)),
        (Gt, Int(a), Int(b)) => Ok(Bool(a > b)),
        (Ge, Int(a), Int(b)) => Ok(Bool(a >= b)),
        (Eq, Float(a), Float(b)) => Ok(Bool(a == b)),
        (Ne, Float(a), Float(b)) => Ok(Bool(a != b)),
        (Lt, Float(a), Float(b)) => Ok(Bool(a < b)),
        (Le, Float(a), Float(b)) => Ok(Bool(a <= b)),
        (Gt, Float(a), Float(b)) => Ok(Bool(a > b)),
        (Ge, Float(a), Float(b)) => Ok(Bool(a >= b)),

        // Logical
        (And, Bool(a), Bool(b)) => Ok(Bool(a && b)),
        (Or, Bool(a), Bool(b)) => Ok(Bool(a || b)),

        (_, lhs, rhs) => Err(mismatch(&lhs, &rhs)),
    }
}

fn describe(value: &ConstValue) -> &'static str {
    match value {
        ConstValue::Int(_) => "INT",
        ConstValue::Float(_) => "FLOAT",
        ConstValue::Bool(_) => "BOOL",
        ConstValue::Str(_) => "STRING",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptlang_ast::span::Position;

    fn expr(kind: ExprKind) -> Expr {
        Expr::new(
            kind,
            SourceRange::new(0, Position::new(1, 1), Position::new(1, 2)),
        )
    }

    fn no_env(_: &str) -> Option<ConstValue> {
        None
    }

    fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        expr(ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    #[test]
    fn test_int_arithmetic() {
        let e = binary(
            BinaryOp::Add,
            expr(ExprKind::IntLit(2)),
            binary(
                BinaryOp::Mul,
                expr(ExprKind::IntLit(3)),
                expr(ExprKind::IntLit(4)),
            ),
        );
        assert_eq!(eval(&e, &no_env).unwrap(), ConstValue::Int(14));
    }

    #[test]
    fn test_environment_lookup() {
        let e = binary(
            BinaryOp::Add,
            expr(ExprKind::Ident("Y".to_string())),
            expr(ExprKind::IntLit(1)),
        );
        let env = |name: &str| (name == "Y").then_some(ConstValue::Int(2));
        assert_eq!(eval(&e, &env).unwrap(), ConstValue::Int(3));
    }

    #[test]
    fn test_unknown_name_is_non_const() {
        let e = expr(ExprKind::Ident("missing".to_string()));
        let err = eval(&e, &no_env).unwrap_err();
        assert_eq!(err.kind, DiagnosticKind::NonConstInConst);
    }

    #[test]
    fn test_mixed_types_rejected() {
        let e = binary(
            BinaryOp::Add,
            expr(ExprKind::IntLit(1)),
            expr(ExprKind::FloatLit(1.0)),
        );
        let err = eval(&e, &no_env).unwrap_err();
        assert_eq!(err.kind, DiagnosticKind::TypeMismatch);
    }

    #[test]
    fn test_division_by_zero() {
        let e = binary(
            BinaryOp::Div,
            expr(ExprKind::IntLit(1)),
            expr(ExprKind::IntLit(0)),
        );
        assert!(eval(&e, &no_env).is_err());
    }

    #[test]
    fn test_comparison_and_logic() {
        let cmp = binary(
            BinaryOp::Lt,
            expr(ExprKind::IntLit(1)),
            expr(ExprKind::IntLit(2)),
        );
        assert_eq!(eval(&cmp, &no_env).unwrap(), ConstValue::Bool(true));

        let and = binary(
            BinaryOp::And,
            expr(ExprKind::BoolLit(true)),
            expr(ExprKind::BoolLit(false)),
        );
        assert_eq!(eval(&and, &no_env).unwrap(), ConstValue::Bool(false));
    }

    #[test]
    fn test_unary() {
        let neg = expr(ExprKind::Unary {
            op: UnaryOp::Neg,
            operand: Box::new(expr(ExprKind::FloatLit(2.5))),
        });
        assert_eq!(eval(&neg, &no_env).unwrap(), ConstValue::Float(-2.5));

        let not = expr(ExprKind::Unary {
            op: UnaryOp::Not,
            operand: Box::new(expr(ExprKind::BoolLit(false))),
        });
        assert_eq!(eval(&not, &no_env).unwrap(), ConstValue::Bool(true));
    }

    #[test]
    fn test_strings_stay_symbolic() {
        let e = expr(ExprKind::StringLit("hello".to_string()));
        assert_eq!(
            eval(&e, &no_env).unwrap(),
            ConstValue::Str("hello".to_string())
        );
    }
}
