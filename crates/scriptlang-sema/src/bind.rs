//! Expression typing and binding.
//!
//! A pure fold over the untyped expression tree: every node either becomes
//! a [`BoundExpr`] carrying its resolved type, or reports a diagnostic and
//! collapses to an error placeholder so the walk can continue. Error
//! placeholders propagate silently — one mistake, one report.

use crate::bound::{BoundExpr, BoundExprKind};
use crate::const_eval::ConstValue;
use crate::symbol::{FunctionKind, Symbol, SymbolTable, VarKind};
use crate::types::{Type, TypeId, TypePool};
use scriptlang_ast::{BinaryOp, DiagnosticKind, Diagnostics, Expr, ExprKind, SourceRange, UnaryOp};

/// Expression binder: types one expression tree at a time.
pub struct ExprBinder<'a> {
    pub pool: &'a mut TypePool,
    pub table: &'a mut SymbolTable,
    pub diags: &'a mut Diagnostics,
}

impl<'a> ExprBinder<'a> {
    pub fn new(
        pool: &'a mut TypePool,
        table: &'a mut SymbolTable,
        diags: &'a mut Diagnostics,
    ) -> Self {
        Self { pool, table, diags }
    }

    /// Bind an expression in value position.
    pub fn bind(&mut self, expr: &Expr) -> BoundExpr {
        match &expr.kind {
            ExprKind::IntLit(v) => BoundExpr::new(BoundExprKind::IntLit(*v), TypePool::INT, expr.range),
            ExprKind::FloatLit(v) => {
                BoundExpr::new(BoundExprKind::FloatLit(*v), TypePool::FLOAT, expr.range)
            }
            ExprKind::BoolLit(v) => {
                BoundExpr::new(BoundExprKind::BoolLit(*v), TypePool::BOOL, expr.range)
            }
            ExprKind::StringLit(s) => BoundExpr::new(
                BoundExprKind::StringLit(s.clone()),
                TypePool::STRING,
                expr.range,
            ),
            ExprKind::Paren(inner) => self.bind(inner),
            ExprKind::Ident(name) => self.bind_ident(name, expr.range),
            ExprKind::Member {
                base,
                field,
                field_range,
            } => self.bind_member(base, field, *field_range, expr.range),
            ExprKind::Index { base, index } => self.bind_index(base, index, expr.range),
            ExprKind::Invoke { .. } => self.bind_invoke(expr, false),
            ExprKind::Unary { op, operand } => self.bind_unary(*op, operand, expr.range),
            ExprKind::Binary { op, left, right } => self.bind_binary(*op, left, right, expr.range),
            ExprKind::Vector(parts) => self.bind_vector(parts, expr.range),
        }
    }

    fn bind_ident(&mut self, name: &str, range: SourceRange) -> BoundExpr {
        let Some(id) = self.table.lookup(name) else {
            self.diags.error(
                DiagnosticKind::UndeclaredName,
                range,
                format!("undeclared name '{name}'"),
            );
            return self.error_expr(range);
        };
        match self.table.get(id) {
            Symbol::Variable(var) => {
                // Folded constants canonicalise to their literal.
                if var.kind == VarKind::Constant {
                    if let Some(value) = var.const_value() {
                        return self.literal(value.clone(), range);
                    }
                    return self.error_expr(range);
                }
                BoundExpr::new(BoundExprKind::Var(id), var.ty, range)
            }
            Symbol::Function(_) => {
                self.diags.error(
                    DiagnosticKind::TypeMismatch,
                    range,
                    format!("function '{name}' used as a value"),
                );
                self.error_expr(range)
            }
            Symbol::Type(_) => {
                self.diags.error(
                    DiagnosticKind::TypeMismatch,
                    range,
                    format!("'{name}' is a type, not a value"),
                );
                self.error_expr(range)
            }
        }
    }

    fn bind_member(
        &mut self,
        base: &Expr,
        field: &str,
        field_range: SourceRange,
        range: SourceRange,
    ) -> BoundExpr {
        let base = self.bind(base);
        if base.ty == TypePool::ERROR {
            return self.error_expr(range);
        }
        let struct_ty = self.pool.deref(base.ty);
        let Type::Struct { name, fields } = self.pool.get(struct_ty) else {
            self.diags.error(
                DiagnosticKind::TypeMismatch,
                base.range,
                format!(
                    "member access requires a struct, found {}",
                    self.pool.display(base.ty)
                ),
            );
            return self.error_expr(range);
        };
        let Some(index) = fields
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(field))
        else {
            let name = name.clone();
            self.diags.error(
                DiagnosticKind::UnknownMember,
                field_range,
                format!("'{name}' has no member '{field}'"),
            );
            return self.error_expr(range);
        };
        let field_ty = fields[index].ty;
        BoundExpr::new(
            BoundExprKind::Member {
                base: Box::new(base),
                field: index,
            },
            field_ty,
            range,
        )
    }

    fn bind_index(&mut self, base: &Expr, index: &Expr, range: SourceRange) -> BoundExpr {
        let base = self.bind(base);
        let index = self.bind(index);
        if base.ty == TypePool::ERROR || index.ty == TypePool::ERROR {
            return self.error_expr(range);
        }
        let array_ty = self.pool.deref(base.ty);
        let Type::Array { elem, .. } = self.pool.get(array_ty) else {
            self.diags.error(
                DiagnosticKind::TypeMismatch,
                base.range,
                format!(
                    "indexing requires an array, found {}",
                    self.pool.display(base.ty)
                ),
            );
            return self.error_expr(range);
        };
        let elem = *elem;
        if index.ty != TypePool::INT {
            self.diags.error(
                DiagnosticKind::TypeMismatch,
                index.range,
                format!(
                    "array index must be INT, found {}",
                    self.pool.display(index.ty)
                ),
            );
            return self.error_expr(range);
        }
        BoundExpr::new(
            BoundExprKind::Index {
                base: Box::new(base),
                index: Box::new(index),
            },
            elem,
            range,
        )
    }

    /// Bind an invocation. `allow_proc` is set in statement position,
    /// where a PROC call is legal; in value position the callee must
    /// return something.
    pub fn bind_invoke(&mut self, expr: &Expr, allow_proc: bool) -> BoundExpr {
        let ExprKind::Invoke { callee, args } = &expr.kind else {
            panic!("bind_invoke on a non-invocation");
        };
        let range = expr.range;

        // Peel parentheses around the callee; only named functions are
        // callable (there are no function values).
        let mut callee_expr = callee.as_ref();
        while let ExprKind::Paren(inner) = &callee_expr.kind {
            callee_expr = inner;
        }
        let ExprKind::Ident(name) = &callee_expr.kind else {
            self.diags.error(
                DiagnosticKind::TypeMismatch,
                callee_expr.range,
                "only named functions can be invoked",
            );
            return self.error_expr(range);
        };

        let Some(id) = self.table.lookup(name) else {
            self.diags.error(
                DiagnosticKind::UndeclaredName,
                callee_expr.range,
                format!("undeclared name '{name}'"),
            );
            return self.error_expr(range);
        };
        let Symbol::Function(func) = self.table.get(id) else {
            self.diags.error(
                DiagnosticKind::TypeMismatch,
                callee_expr.range,
                format!("'{name}' is not a function"),
            );
            return self.error_expr(range);
        };
        if func.kind == FunctionKind::Prototype {
            self.diags.error(
                DiagnosticKind::TypeMismatch,
                callee_expr.range,
                format!("prototype '{name}' is not callable"),
            );
            return self.error_expr(range);
        }

        let Type::Function(sig) = self.pool.get(func.ty) else {
            return self.error_expr(range);
        };
        let sig = sig.clone();
        let name = name.clone();

        if args.len() != sig.params.len() {
            self.diags.error(
                DiagnosticKind::ArityMismatch,
                range,
                format!(
                    "'{}' expects {} argument(s), found {}",
                    name,
                    sig.params.len(),
                    args.len()
                ),
            );
        }

        let mut bound_args = Vec::with_capacity(args.len());
        for (position, arg) in args.iter().enumerate() {
            let bound = self.bind(arg);
            if let Some(param) = sig.params.get(position) {
                self.check_argument(param.ty, &bound, position, &name);
            }
            bound_args.push(bound);
        }

        let ret = match sig.ret {
            Some(ret) => ret,
            None if allow_proc => TypePool::ERROR,
            None => {
                self.diags.error(
                    DiagnosticKind::TypeMismatch,
                    range,
                    format!("PROC '{name}' returns no value"),
                );
                return self.error_expr(range);
            }
        };

        BoundExpr::new(
            BoundExprKind::Call {
                callee: id,
                args: bound_args,
            },
            ret,
            range,
        )
    }

    fn check_argument(&mut self, param: TypeId, arg: &BoundExpr, position: usize, name: &str) {
        if arg.ty == TypePool::ERROR {
            return;
        }
        if !self.pool.is_assignable(param, arg.ty, true) {
            self.diags.error(
                DiagnosticKind::TypeMismatch,
                arg.range,
                format!(
                    "argument {} of '{}' expects {}, found {}",
                    position + 1,
                    name,
                    self.pool.display(param),
                    self.pool.display(arg.ty)
                ),
            );
            return;
        }
        // A reference parameter takes the argument's address; the argument
        // must designate storage unless it is already a reference.
        if self.pool.is_ref(param) && !self.pool.is_ref(arg.ty) && !arg.kind.is_lvalue() {
            self.diags.error(
                DiagnosticKind::TypeMismatch,
                arg.range,
                format!(
                    "argument {} of '{}' is passed by reference and must be addressable",
                    position + 1,
                    name
                ),
            );
        }
    }

    fn bind_unary(&mut self, op: UnaryOp, operand: &Expr, range: SourceRange) -> BoundExpr {
        let operand = self.bind(operand);
        if operand.ty == TypePool::ERROR {
            return self.error_expr(range);
        }
        let ty = self.pool.deref(operand.ty);
        let result = match op {
            UnaryOp::Not if ty == TypePool::BOOL => TypePool::BOOL,
            UnaryOp::Neg if ty == TypePool::INT || ty == TypePool::FLOAT => ty,
            _ => {
                self.diags.error(
                    DiagnosticKind::TypeMismatch,
                    range,
                    format!(
                        "unary {} is not defined for {}",
                        match op {
                            UnaryOp::Not => "NOT",
                            UnaryOp::Neg => "'-'",
                        },
                        self.pool.display(operand.ty)
                    ),
                );
                return self.error_expr(range);
            }
        };
        BoundExpr::new(
            BoundExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            result,
            range,
        )
    }

    fn bind_binary(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        range: SourceRange,
    ) -> BoundExpr {
        let left = self.bind(left);
        let right = self.bind(right);
        if left.ty == TypePool::ERROR || right.ty == TypePool::ERROR {
            return self.error_expr(range);
        }

        let lhs = self.pool.deref(left.ty);
        let rhs = self.pool.deref(right.ty);
        let numeric = |ty: TypeId| ty == TypePool::INT || ty == TypePool::FLOAT;

        use BinaryOp::*;
        let result = match op {
            Add | Sub | Mul | Div | Mod if lhs == rhs && numeric(lhs) => Some(lhs),
            BitAnd | BitOr | BitXor if lhs == TypePool::INT && rhs == TypePool::INT => {
                Some(TypePool::INT)
            }
            Eq | Ne | Lt | Le | Gt | Ge if lhs == rhs && numeric(lhs) => Some(TypePool::BOOL),
            And | Or if lhs == TypePool::BOOL && rhs == TypePool::BOOL => Some(TypePool::BOOL),
            _ => None,
        };

        let Some(result) = result else {
            self.diags.error(
                DiagnosticKind::TypeMismatch,
                range,
                format!(
                    "operator {} cannot combine {} and {}",
                    op.symbol(),
                    self.pool.display(left.ty),
                    self.pool.display(right.ty)
                ),
            );
            return self.error_expr(range);
        };

        BoundExpr::new(
            BoundExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            result,
            range,
        )
    }

    /// Vector literal: components fill the three VEC3 slots. A component
    /// that is itself VEC3-typed is destructured, contributing all three.
    fn bind_vector(&mut self, parts: &[Expr], range: SourceRange) -> BoundExpr {
        let vec3 = self.vec3_type();
        let mut bound_parts = Vec::with_capacity(parts.len());
        let mut slots = 0u32;
        let mut failed = false;

        for part in parts {
            let bound = self.bind(part);
            if bound.ty == TypePool::ERROR {
                failed = true;
            } else if self.pool.equal(self.pool.deref(bound.ty), vec3) {
                slots += 3;
            } else if self.pool.is_assignable(TypePool::FLOAT, bound.ty, true) {
                slots += 1;
            } else {
                self.diags.error(
                    DiagnosticKind::TypeMismatch,
                    bound.range,
                    format!(
                        "vector component must be FLOAT or VEC3, found {}",
                        self.pool.display(bound.ty)
                    ),
                );
                failed = true;
            }
            bound_parts.push(bound);
        }

        if failed {
            return self.error_expr(range);
        }
        if slots != 3 {
            self.diags.error(
                DiagnosticKind::TypeMismatch,
                range,
                format!("vector literal fills {slots} slot(s), expected 3"),
            );
            return self.error_expr(range);
        }

        BoundExpr::new(BoundExprKind::Vector(bound_parts), vec3, range)
    }

    /// Turn a folded constant into its literal node.
    fn literal(&mut self, value: ConstValue, range: SourceRange) -> BoundExpr {
        match value {
            ConstValue::Int(v) => BoundExpr::new(BoundExprKind::IntLit(v), TypePool::INT, range),
            ConstValue::Float(v) => {
                BoundExpr::new(BoundExprKind::FloatLit(v), TypePool::FLOAT, range)
            }
            ConstValue::Bool(v) => BoundExpr::new(BoundExprKind::BoolLit(v), TypePool::BOOL, range),
            ConstValue::Str(s) => {
                BoundExpr::new(BoundExprKind::StringLit(s), TypePool::STRING, range)
            }
        }
    }

    /// The built-in VEC3 struct type.
    pub fn vec3_type(&self) -> TypeId {
        match self.table.lookup("VEC3").map(|id| self.table.get(id)) {
            Some(Symbol::Type(ts)) => ts.ty,
            _ => panic!("BUG: builtin VEC3 missing from symbol table"),
        }
    }

    pub fn error_expr(&mut self, range: SourceRange) -> BoundExpr {
        BoundExpr::new(BoundExprKind::Error, TypePool::ERROR, range)
    }
}
