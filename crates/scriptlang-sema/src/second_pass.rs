//! Second pass: function bodies.
//!
//! For every defined function the pass opens a lexical scope, allocates
//! frame slots (parameters from slot 0, a 2-slot ABI gap for the caller
//! frame link and return address, then locals in declaration order),
//! types every expression through the binder, and validates control-flow
//! statements. The output is a [`BoundFunction`] per body — the emitter's
//! input.
//!
//! Scopes open and close in strictly paired positions; no statement check
//! returns early between an `enter_scope` and its `exit_scope`.

use crate::bind::ExprBinder;
use crate::bound::{BoundCase, BoundExpr, BoundFunction, BoundStmt};
use crate::const_eval::{self, ConstValue};
use crate::first_pass::{lookup_const, PendingFunction};
use crate::symbol::{Symbol, SymbolId, SymbolTable, VarKind, VariableSymbol};
use crate::types::{ArrayLen, Type, TypeId, TypePool};
use scriptlang_ast::{
    BinaryOp, Decl, DiagnosticKind, Diagnostics, Expr, ExprKind, SourceRange, Stmt, TypeRef,
    TypeWrapper, Unit, VarDecl,
};
use tracing::debug;

/// Check every pending function of a unit.
pub fn run(
    unit: &Unit,
    pending: &[PendingFunction],
    pool: &mut TypePool,
    table: &mut SymbolTable,
    diags: &mut Diagnostics,
) -> Vec<BoundFunction> {
    let mut functions = Vec::with_capacity(pending.len());
    for item in pending {
        let Decl::Function(decl) = &unit.decls[item.decl_index] else {
            panic!("BUG: pending function index does not point at a function");
        };
        let mut checker = FunctionChecker {
            pool: &mut *pool,
            table: &mut *table,
            diags: &mut *diags,
            ret: None,
            frame_cursor: 0,
            locals_size: 0,
            switch_depth: 0,
        };
        functions.push(checker.check_function(item.symbol, decl));
    }
    functions
}

struct FunctionChecker<'a> {
    pool: &'a mut TypePool,
    table: &'a mut SymbolTable,
    diags: &'a mut Diagnostics,
    /// Declared return type of the enclosing function.
    ret: Option<TypeId>,
    frame_cursor: u32,
    locals_size: u32,
    /// Depth of enclosing SWITCH statements, for BREAK validation.
    switch_depth: u32,
}

impl FunctionChecker<'_> {
    fn binder(&mut self) -> ExprBinder<'_> {
        ExprBinder::new(self.pool, self.table, self.diags)
    }

    fn check_function(
        &mut self,
        symbol: SymbolId,
        decl: &scriptlang_ast::FunctionDecl,
    ) -> BoundFunction {
        let (sig_ty, name) = match self.table.get(symbol) {
            Symbol::Function(f) => (f.ty, f.name.clone()),
            _ => panic!("BUG: pending function symbol is not a function"),
        };
        let Type::Function(sig) = self.pool.get(sig_ty).clone() else {
            panic!("BUG: function symbol without a function type");
        };
        self.ret = sig.ret;

        self.table.enter_scope();

        // Parameters occupy the leading frame slots.
        self.frame_cursor = 0;
        for (param, param_decl) in sig.params.iter().zip(&decl.params) {
            let size = self.pool.size_of(param.ty);
            let slot = self.frame_cursor;
            self.frame_cursor += size;
            let added = self.table.add(Symbol::Variable(VariableSymbol {
                name: param.name.clone(),
                range: param_decl.range,
                ty: param.ty,
                kind: VarKind::Argument,
                slot: Some(slot),
                init: None,
            }));
            if added.is_err() {
                self.diags.error(
                    DiagnosticKind::DuplicateSymbol,
                    param_decl.range,
                    format!("duplicate parameter '{}'", param.name),
                );
            }
        }
        let args_size = self.frame_cursor;

        // Two slots belong to the ABI: caller frame link and return address.
        self.frame_cursor += 2;
        self.locals_size = 0;

        let body = decl.body.as_deref().unwrap_or(&[]);
        let bound_body = self.check_stmts(body);

        self.table.exit_scope();

        if self.ret.is_some() && !block_returns(&bound_body) {
            self.diags.error(
                DiagnosticKind::MissingReturn,
                decl.name_range,
                format!("FUNC '{name}' does not return a value on every path"),
            );
        }

        if let Symbol::Function(f) = self.table.get_mut(symbol) {
            f.args_size = args_size;
            f.locals_size = self.locals_size;
        }
        debug!(function = %name, args = args_size, locals = self.locals_size, "checked function");

        BoundFunction {
            symbol,
            body: bound_body,
        }
    }

    fn check_stmts(&mut self, stmts: &[Stmt]) -> Vec<BoundStmt> {
        stmts.iter().map(|s| self.check_stmt(s)).collect()
    }

    /// A nested block gets its own scope; frame slots are never reused, so
    /// the cursor keeps climbing across sibling blocks.
    fn check_scoped_block(&mut self, stmts: &[Stmt]) -> Vec<BoundStmt> {
        self.table.enter_scope();
        let bound = self.check_stmts(stmts);
        self.table.exit_scope();
        bound
    }

    fn check_stmt(&mut self, stmt: &Stmt) -> BoundStmt {
        match stmt {
            Stmt::Var(decl) => self.check_var(decl),
            Stmt::Assign {
                lhs, op, rhs, range, ..
            } => self.check_assign(lhs, *op, rhs, *range),
            Stmt::Invoke { call, .. } => {
                let bound = self.binder().bind_invoke(call, true);
                BoundStmt::Invoke(bound)
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
                ..
            } => {
                let cond = self.check_condition(cond);
                let then_body = self.check_scoped_block(then_body);
                let else_body = else_body.as_ref().map(|b| self.check_scoped_block(b));
                BoundStmt::If {
                    cond,
                    then_body,
                    else_body,
                }
            }
            Stmt::While { cond, body, .. } => {
                let cond = self.check_condition(cond);
                let body = self.check_scoped_block(body);
                BoundStmt::While { cond, body }
            }
            Stmt::Repeat {
                limit,
                counter,
                body,
                ..
            } => self.check_repeat(limit, counter, body),
            Stmt::Switch {
                value,
                cases,
                default,
                ..
            } => self.check_switch(value, cases, default.as_deref()),
            Stmt::Break { range } => {
                if self.switch_depth == 0 {
                    self.diags.error(
                        DiagnosticKind::Syntax,
                        *range,
                        "BREAK is only valid inside a SWITCH",
                    );
                }
                BoundStmt::Break
            }
            Stmt::Return { value, range } => self.check_return(value.as_ref(), *range),
        }
    }

    fn check_var(&mut self, decl: &VarDecl) -> BoundStmt {
        let ty = self.build_local_type(&decl.ty);
        let is_ref = self.pool.is_ref(ty);

        let init = decl.init.as_ref().map(|e| self.binder().bind(e));

        if let Some(init) = &init {
            if init.ty != TypePool::ERROR && !self.pool.is_assignable(ty, init.ty, true) {
                self.diags.error(
                    DiagnosticKind::TypeMismatch,
                    init.range,
                    format!(
                        "cannot initialize {} from {}",
                        self.pool.display(ty),
                        self.pool.display(init.ty)
                    ),
                );
            }
            // A reference binds to storage, so its initializer must have
            // an address.
            if is_ref && !self.pool.is_ref(init.ty) && !init.kind.is_lvalue() {
                self.diags.error(
                    DiagnosticKind::TypeMismatch,
                    init.range,
                    "a reference must be initialized from an addressable value",
                );
            }
        } else if is_ref {
            self.diags.error(
                DiagnosticKind::TypeMismatch,
                decl.range,
                format!("reference '{}' requires an initializer", decl.name),
            );
        }

        let size = self.pool.size_of(ty);
        let slot = self.frame_cursor;
        self.frame_cursor += size;
        self.locals_size += size;

        let added = self.table.add(Symbol::Variable(VariableSymbol {
            name: decl.name.clone(),
            range: decl.name_range,
            ty,
            kind: VarKind::Local,
            slot: Some(slot),
            init: None,
        }));
        match added {
            Ok(symbol) => BoundStmt::Var { symbol, init },
            Err(existing) => {
                self.diags.error(
                    DiagnosticKind::DuplicateSymbol,
                    decl.name_range,
                    format!("duplicate local '{}'", decl.name),
                );
                BoundStmt::Var {
                    symbol: existing,
                    init,
                }
            }
        }
    }

    fn check_assign(
        &mut self,
        lhs: &Expr,
        op: Option<BinaryOp>,
        rhs: &Expr,
        range: SourceRange,
    ) -> BoundStmt {
        let bound_lhs = self.binder().bind(lhs);

        if !bound_lhs.kind.is_lvalue() {
            self.diags.error(
                DiagnosticKind::TypeMismatch,
                bound_lhs.range,
                "assignment target is not assignable",
            );
        }
        // Writing through an ANY alias would store into storage of
        // unknown shape.
        if matches!(self.pool.get(bound_lhs.ty), Type::Ref(elem) if *elem == TypePool::ANY) {
            self.diags.error(
                DiagnosticKind::TypeMismatch,
                bound_lhs.range,
                "cannot assign through a reference to ANY",
            );
        }

        // Compound assignment desugars to the infix operator, which then
        // carries the operator's own typing rules.
        let bound_rhs = match op {
            Some(op) => {
                let desugared = Expr::new(
                    ExprKind::Binary {
                        op,
                        left: Box::new(lhs.clone()),
                        right: Box::new(rhs.clone()),
                    },
                    range,
                );
                self.binder().bind(&desugared)
            }
            None => self.binder().bind(rhs),
        };

        if bound_lhs.ty != TypePool::ERROR
            && bound_rhs.ty != TypePool::ERROR
            && !self.pool.is_assignable(bound_lhs.ty, bound_rhs.ty, true)
        {
            self.diags.error(
                DiagnosticKind::TypeMismatch,
                range,
                format!(
                    "cannot assign {} to {}",
                    self.pool.display(bound_rhs.ty),
                    self.pool.display(bound_lhs.ty)
                ),
            );
        }

        BoundStmt::Assign {
            lhs: bound_lhs,
            rhs: bound_rhs,
        }
    }

    fn check_condition(&mut self, cond: &Expr) -> BoundExpr {
        let bound = self.binder().bind(cond);
        if bound.ty != TypePool::ERROR && self.pool.deref(bound.ty) != TypePool::BOOL {
            self.diags.error(
                DiagnosticKind::TypeMismatch,
                bound.range,
                format!("condition must be BOOL, found {}", self.pool.display(bound.ty)),
            );
        }
        bound
    }

    fn check_repeat(&mut self, limit: &Expr, counter: &Expr, body: &[Stmt]) -> BoundStmt {
        let limit = self.binder().bind(limit);
        if limit.ty != TypePool::ERROR && self.pool.deref(limit.ty) != TypePool::INT {
            self.diags.error(
                DiagnosticKind::TypeMismatch,
                limit.range,
                format!(
                    "REPEAT limit must be INT, found {}",
                    self.pool.display(limit.ty)
                ),
            );
        }

        let counter = self.binder().bind(counter);
        if counter.ty != TypePool::ERROR && self.pool.deref(counter.ty) != TypePool::INT {
            self.diags.error(
                DiagnosticKind::TypeMismatch,
                counter.range,
                format!(
                    "REPEAT counter must be INT, found {}",
                    self.pool.display(counter.ty)
                ),
            );
        }
        if !counter.kind.is_lvalue() {
            self.diags.error(
                DiagnosticKind::TypeMismatch,
                counter.range,
                "REPEAT counter must be assignable",
            );
        }

        let body = self.check_scoped_block(body);
        BoundStmt::Repeat {
            limit,
            counter,
            body,
        }
    }

    fn check_switch(
        &mut self,
        value: &Expr,
        cases: &[scriptlang_ast::SwitchCase],
        default: Option<&[Stmt]>,
    ) -> BoundStmt {
        let value = self.binder().bind(value);
        if value.ty != TypePool::ERROR && self.pool.deref(value.ty) != TypePool::INT {
            self.diags.error(
                DiagnosticKind::TypeMismatch,
                value.range,
                format!(
                    "SWITCH value must be INT, found {}",
                    self.pool.display(value.ty)
                ),
            );
        }

        self.switch_depth += 1;
        let mut bound_cases: Vec<BoundCase> = Vec::with_capacity(cases.len());
        let mut seen: Vec<i64> = Vec::new();
        for case in cases {
            // Case labels are INT literals or constant-folded INT
            // expressions.
            let label = {
                let table: &SymbolTable = self.table;
                const_eval::eval(&case.value, &|name| lookup_const(table, name))
            };
            let label = match label {
                Ok(ConstValue::Int(v)) => v,
                Ok(other) => {
                    self.diags.error(
                        DiagnosticKind::TypeMismatch,
                        case.value.range,
                        format!(
                            "CASE value must be INT, found {}",
                            self.pool.display(other.type_id())
                        ),
                    );
                    0
                }
                Err(err) => {
                    self.diags.error(err.kind, err.range, err.message);
                    0
                }
            };
            if seen.contains(&label) {
                self.diags.error(
                    DiagnosticKind::DuplicateCase,
                    case.value.range,
                    format!("duplicate CASE value {label}"),
                );
            } else {
                seen.push(label);
            }

            let body = self.check_scoped_block(&case.body);
            bound_cases.push(BoundCase { value: label, body });
        }
        let default = default.map(|b| self.check_scoped_block(b));
        self.switch_depth -= 1;

        BoundStmt::Switch {
            value,
            cases: bound_cases,
            default,
        }
    }

    fn check_return(&mut self, value: Option<&Expr>, range: SourceRange) -> BoundStmt {
        match (self.ret, value) {
            (Some(ret), Some(value)) => {
                let bound = self.binder().bind(value);
                // RETURN position does not unwrap references.
                if bound.ty != TypePool::ERROR && !self.pool.is_assignable(ret, bound.ty, false) {
                    self.diags.error(
                        DiagnosticKind::TypeMismatch,
                        bound.range,
                        format!(
                            "cannot return {} from a FUNC returning {}",
                            self.pool.display(bound.ty),
                            self.pool.display(ret)
                        ),
                    );
                }
                BoundStmt::Return(Some(bound))
            }
            (Some(_), None) => {
                self.diags.error(
                    DiagnosticKind::TypeMismatch,
                    range,
                    "RETURN requires a value in a FUNC",
                );
                BoundStmt::Return(None)
            }
            (None, Some(value)) => {
                let bound = self.binder().bind(value);
                self.diags.error(
                    DiagnosticKind::TypeMismatch,
                    range,
                    "a PROC cannot return a value",
                );
                BoundStmt::Return(Some(bound))
            }
            (None, None) => BoundStmt::Return(None),
        }
    }

    /// Resolve a local declarator eagerly — every top-level type is known
    /// by the time the second pass runs.
    fn build_local_type(&mut self, tr: &TypeRef) -> TypeId {
        let base = match self.table.lookup(&tr.base) {
            Some(id) => match self.table.get(id) {
                Symbol::Type(ts) => ts.ty,
                _ => {
                    self.diags.error(
                        DiagnosticKind::TypeMismatch,
                        tr.range,
                        format!("'{}' is not a type", tr.base),
                    );
                    return TypePool::ERROR;
                }
            },
            None => {
                self.diags.error(
                    DiagnosticKind::UndeclaredName,
                    tr.range,
                    format!("undeclared type '{}'", tr.base),
                );
                return TypePool::ERROR;
            }
        };

        let mut ty = base;
        for wrapper in tr.wrappers.iter().rev() {
            ty = match wrapper {
                TypeWrapper::Array(len_expr) => {
                    let len = self.local_array_len(len_expr);
                    self.pool.alloc(Type::Array {
                        elem: ty,
                        len: ArrayLen::Lit(len),
                    })
                }
                TypeWrapper::Ref => {
                    if self.pool.is_ref(ty) {
                        self.diags.error(
                            DiagnosticKind::TypeMismatch,
                            tr.range,
                            "reference to a reference is not a type",
                        );
                        ty
                    } else {
                        self.pool.alloc(Type::Ref(ty))
                    }
                }
            };
        }
        ty
    }

    fn local_array_len(&mut self, expr: &Expr) -> u32 {
        let value = {
            let table: &SymbolTable = self.table;
            const_eval::eval(expr, &|name| lookup_const(table, name))
        };
        match value {
            Ok(ConstValue::Int(v)) if v >= 1 => v as u32,
            Ok(_) | Err(_) => {
                self.diags.error(
                    DiagnosticKind::TypeMismatch,
                    expr.range,
                    "array length must be a positive constant INT",
                );
                1
            }
        }
    }
}

/// Does a statement list return on every path?
///
/// Conservative: loops never count, a SWITCH counts only when the default
/// and every case return.
fn block_returns(stmts: &[BoundStmt]) -> bool {
    stmts.iter().any(stmt_returns)
}

fn stmt_returns(stmt: &BoundStmt) -> bool {
    match stmt {
        BoundStmt::Return(_) => true,
        BoundStmt::If {
            then_body,
            else_body: Some(else_body),
            ..
        } => block_returns(then_body) && block_returns(else_body),
        BoundStmt::Switch {
            cases,
            default: Some(default),
            ..
        } => block_returns(default) && cases.iter().all(|c| block_returns(&c.body)),
        _ => false,
    }
}
