//! First pass: top-level registration and resolution.
//!
//! Walks the top-level declarations of a unit and
//!
//! 1. registers every global name with a type that may still contain
//!    [`Type::Unresolved`] placeholders (addition order never matters, so
//!    mutually recursive structs and functions need no forward
//!    declarations),
//! 2. resolves every type reference in place, detecting struct cycles,
//! 3. drains the CONST work queue to fixed point, reducing each constant
//!    to a literal,
//! 4. resolves array lengths written as constant names,
//! 5. lays out statics and global blocks and folds their initializers
//!    into image cells.
//!
//! Every failure is a diagnostic plus a placeholder; the pass always runs
//! to completion.

use crate::const_eval::{self, ConstValue};
use crate::symbol::{
    FunctionKind, FunctionSymbol, Symbol, SymbolId, SymbolTable, TypeSymbol, VarKind,
    VariableSymbol,
};
use crate::types::{ArrayLen, FunctionType, Param, StructField, Type, TypeId, TypePool};
use scriptlang_ast::{
    Decl, DiagnosticKind, Diagnostics, Expr, ExprKind, FunctionProvenance, SourceRange, TypeRef,
    TypeWrapper, Unit, VarDecl,
};
use std::collections::{HashSet, VecDeque};
use tracing::debug;

/// Script-level facts gathered by the first pass.
#[derive(Debug, Clone, Default)]
pub struct ScriptInfo {
    pub name: String,
    pub hash: u32,
    /// Index of the global block this script owns, if any.
    pub globals_block: Option<u32>,
    pub statics_size: u32,
    /// Size of the owned global block.
    pub globals_size: u32,
}

/// A defined function awaiting the second pass.
#[derive(Debug, Clone, Copy)]
pub struct PendingFunction {
    pub symbol: SymbolId,
    /// Index of the `Decl::Function` in the unit.
    pub decl_index: usize,
}

/// Everything the first pass produces besides table/pool mutations.
#[derive(Debug, Default)]
pub struct FirstPassResult {
    pub script: ScriptInfo,
    pub functions: Vec<PendingFunction>,
    /// Statics in declaration (slot) order.
    pub statics: Vec<SymbolId>,
    /// Variables of the owned global block in offset order.
    pub owned_globals: Vec<SymbolId>,
}

/// 64-bit FNV-1a over the case-folded native name; the compiler-side key
/// into the native import table and the native database.
pub fn native_hash(name: &str) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET_BASIS;
    for byte in name.to_ascii_lowercase().bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// One queued CONST initializer.
struct ConstWork {
    symbol: SymbolId,
    init: Expr,
    last_unresolved: usize,
}

/// One static or global awaiting layout and initializer folding.
struct ImageWork {
    symbol: SymbolId,
    init: Option<Expr>,
    /// Global block index; `None` for statics.
    block: Option<u32>,
}

pub struct FirstPass<'a> {
    pool: &'a mut TypePool,
    table: &'a mut SymbolTable,
    diags: &'a mut Diagnostics,
    consts: VecDeque<ConstWork>,
    statics: Vec<ImageWork>,
    globals: Vec<ImageWork>,
    result: FirstPassResult,
}

/// Run the first pass over one unit. The table already holds built-ins
/// and any symbols imported through USING.
///
/// `statics_base` is the first static slot this unit may use; a
/// multi-unit compile hands each unit the cumulative size of the units
/// before it so slots never collide.
pub fn run(
    unit: &Unit,
    pool: &mut TypePool,
    table: &mut SymbolTable,
    diags: &mut Diagnostics,
    statics_base: u32,
) -> FirstPassResult {
    let mut pass = FirstPass {
        pool,
        table,
        diags,
        consts: VecDeque::new(),
        statics: Vec::new(),
        globals: Vec::new(),
        result: FirstPassResult::default(),
    };
    pass.scan_directives(unit);
    pass.register(unit);
    pass.resolve_types();
    pass.check_const_types();
    pass.fold_constants();
    pass.resolve_array_lengths();
    pass.layout_statics(statics_base);
    pass.layout_globals(unit);
    debug!(
        script = %pass.result.script.name,
        statics = pass.result.script.statics_size,
        "first pass complete"
    );
    pass.result
}

impl FirstPass<'_> {
    // =========================================================================
    // Directives
    // =========================================================================

    fn scan_directives(&mut self, unit: &Unit) {
        for decl in &unit.decls {
            match decl {
                Decl::ScriptName { name, range } => {
                    if !self.result.script.name.is_empty() {
                        self.diags.warning(
                            DiagnosticKind::DuplicateSymbol,
                            *range,
                            "SCRIPT_NAME already set; keeping the first",
                        );
                        continue;
                    }
                    self.result.script.name = name.clone();
                }
                Decl::ScriptHash { hash, .. } => {
                    self.result.script.hash = *hash;
                }
                _ => {}
            }
        }
    }

    // =========================================================================
    // Registration
    // =========================================================================

    fn register(&mut self, unit: &Unit) {
        for (index, decl) in unit.decls.iter().enumerate() {
            match decl {
                Decl::ScriptName { .. } | Decl::ScriptHash { .. } | Decl::Using { .. } => {}
                Decl::Struct {
                    name,
                    name_range,
                    fields,
                    ..
                } => self.register_struct(name, *name_range, fields),
                Decl::Const(decl) => self.register_const(decl),
                Decl::Static(decl) => self.register_static(decl),
                Decl::Global { block, vars, .. } => {
                    for var in vars {
                        self.register_global(*block, var);
                    }
                }
                Decl::Function(func) => self.register_function(func, index),
            }
        }
    }

    fn register_struct(&mut self, name: &str, name_range: SourceRange, fields: &[VarDecl]) {
        let mut built = Vec::with_capacity(fields.len());
        for field in fields {
            let ty = self.build_type(&field.ty);
            // Struct fields may not be references.
            let ty = if self.pool.is_ref(ty) {
                self.diags.error(
                    DiagnosticKind::TypeMismatch,
                    field.range,
                    format!("struct field '{}' may not be a reference", field.name),
                );
                self.pool.deref(ty)
            } else {
                ty
            };
            if built
                .iter()
                .any(|f: &StructField| f.name.eq_ignore_ascii_case(&field.name))
            {
                self.diags.error(
                    DiagnosticKind::DuplicateSymbol,
                    field.range,
                    format!("duplicate field '{}'", field.name),
                );
                continue;
            }
            built.push(StructField {
                name: field.name.clone(),
                ty,
                range: field.range,
            });
        }

        let ty = self.pool.alloc(Type::Struct {
            name: name.to_string(),
            fields: built,
        });
        self.add_symbol(Symbol::Type(TypeSymbol {
            name: name.to_string(),
            range: name_range,
            ty,
        }));
    }

    fn register_const(&mut self, decl: &VarDecl) {
        let ty = self.build_type(&decl.ty);
        let symbol = self.add_symbol(Symbol::Variable(VariableSymbol {
            name: decl.name.clone(),
            range: decl.name_range,
            ty,
            kind: VarKind::Constant,
            slot: None,
            init: None,
        }));
        if let (Some(symbol), Some(init)) = (symbol, decl.init.clone()) {
            self.consts.push_back(ConstWork {
                symbol,
                init,
                last_unresolved: usize::MAX,
            });
        }
    }

    fn register_static(&mut self, decl: &VarDecl) {
        let ty = self.build_type(&decl.ty);
        if let Some(symbol) = self.add_symbol(Symbol::Variable(VariableSymbol {
            name: decl.name.clone(),
            range: decl.name_range,
            ty,
            kind: VarKind::Static,
            slot: None,
            init: None,
        })) {
            self.statics.push(ImageWork {
                symbol,
                init: decl.init.clone(),
                block: None,
            });
        }
    }

    fn register_global(&mut self, block: u32, decl: &VarDecl) {
        let ty = self.build_type(&decl.ty);
        if let Some(symbol) = self.add_symbol(Symbol::Variable(VariableSymbol {
            name: decl.name.clone(),
            range: decl.name_range,
            ty,
            kind: VarKind::Global,
            slot: None,
            init: None,
        })) {
            self.globals.push(ImageWork {
                symbol,
                init: decl.init.clone(),
                block: Some(block),
            });
        }
    }

    fn register_function(&mut self, func: &scriptlang_ast::FunctionDecl, decl_index: usize) {
        let params = func
            .params
            .iter()
            .map(|p| Param {
                ty: self.build_type(&p.ty),
                name: p.name.clone(),
            })
            .collect();
        let ret = func.ret.as_ref().map(|tr| self.build_type(tr));
        let ty = self.pool.alloc(Type::Function(FunctionType { ret, params }));

        let kind = match func.provenance {
            FunctionProvenance::Defined => FunctionKind::Defined,
            FunctionProvenance::Native => FunctionKind::Native(native_hash(&func.name)),
            FunctionProvenance::Prototype => FunctionKind::Prototype,
        };

        let symbol = self.add_symbol(Symbol::Function(FunctionSymbol {
            name: func.name.clone(),
            range: func.name_range,
            ty,
            kind,
            args_size: 0,
            locals_size: 0,
        }));

        if let (Some(symbol), FunctionKind::Defined) = (symbol, kind) {
            if func.body.is_some() {
                self.result.functions.push(PendingFunction { symbol, decl_index });
            }
        }
    }

    fn add_symbol(&mut self, symbol: Symbol) -> Option<SymbolId> {
        let name = symbol.name().to_string();
        let range = symbol.range();
        match self.table.add(symbol) {
            Ok(id) => Some(id),
            Err(existing) => {
                let first = self.table.get(existing).range();
                let note = if first.is_unknown() {
                    " (built-in)".to_string()
                } else {
                    format!(" (first declared at line {})", first.begin.line)
                };
                self.diags.error(
                    DiagnosticKind::DuplicateSymbol,
                    range,
                    format!("duplicate symbol '{name}'{note}"),
                );
                None
            }
        }
    }

    /// Build a semantic type from a declarator, outside-in.
    ///
    /// Unknown base names become `Unresolved` placeholders; the resolve
    /// step substitutes them once every declaration is registered.
    fn build_type(&mut self, tr: &TypeRef) -> TypeId {
        let base = match self.table.lookup(&tr.base) {
            Some(id) => match self.table.get(id) {
                Symbol::Type(ts) => ts.ty,
                _ => self.pool.alloc(Type::Unresolved(tr.base.clone())),
            },
            None => self.pool.alloc(Type::Unresolved(tr.base.clone())),
        };

        let mut ty = base;
        for wrapper in tr.wrappers.iter().rev() {
            ty = match wrapper {
                TypeWrapper::Array(len_expr) => {
                    let len = self.array_len(len_expr);
                    self.pool.alloc(Type::Array { elem: ty, len })
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

    /// An array length is an INT literal or the name of an INT constant.
    fn array_len(&mut self, expr: &Expr) -> ArrayLen {
        let mut inner = expr;
        while let ExprKind::Paren(e) = &inner.kind {
            inner = e;
        }
        match &inner.kind {
            ExprKind::IntLit(v) if *v >= 1 => ArrayLen::Lit(*v as u32),
            ExprKind::IntLit(_) => {
                self.diags.error(
                    DiagnosticKind::TypeMismatch,
                    expr.range,
                    "array length must be at least 1",
                );
                ArrayLen::Lit(1)
            }
            ExprKind::Ident(name) => ArrayLen::Named(name.clone()),
            _ => {
                self.diags.error(
                    DiagnosticKind::TypeMismatch,
                    expr.range,
                    "array length must be an integer literal or a constant name",
                );
                ArrayLen::Lit(1)
            }
        }
    }

    // =========================================================================
    // Type resolution
    // =========================================================================

    /// Substitute every reachable `Unresolved` placeholder in place.
    ///
    /// One sweep suffices: a lookup returns the target's fully constructed
    /// type id, and placeholders *inside* that type are fixed when its own
    /// symbol is visited.
    fn resolve_types(&mut self) {
        let ids: Vec<SymbolId> = self.table.iter().map(|(id, _)| id).collect();
        for id in ids {
            match self.table.get(id).clone() {
                Symbol::Type(ts) => self.resolve_struct(ts.ty),
                Symbol::Variable(var) => {
                    let ty = self.resolve_deep(var.ty, var.range);
                    if let Symbol::Variable(v) = self.table.get_mut(id) {
                        v.ty = ty;
                    }
                }
                Symbol::Function(func) => self.resolve_function(func.ty, func.range),
            }
        }
    }

    /// Resolve the slots owned by this declaration's own type nodes.
    ///
    /// Stops at user-defined struct types: those are resolved when their
    /// own symbol is visited.
    fn resolve_deep(&mut self, id: TypeId, range: SourceRange) -> TypeId {
        match self.pool.get(id).clone() {
            Type::Unresolved(name) => self.resolve_name(&name, range).unwrap_or(id),
            Type::Array { elem, .. } => {
                let new_elem = self.resolve_deep(elem, range);
                if let Type::Array { elem, .. } = self.pool.get_mut(id) {
                    *elem = new_elem;
                }
                id
            }
            Type::Ref(elem) => {
                let new_elem = self.resolve_deep(elem, range);
                if self.pool.is_ref(new_elem) {
                    self.diags.error(
                        DiagnosticKind::TypeMismatch,
                        range,
                        "reference to a reference is not a type",
                    );
                } else if let Type::Ref(elem) = self.pool.get_mut(id) {
                    *elem = new_elem;
                }
                id
            }
            _ => id,
        }
    }

    fn resolve_name(&mut self, name: &str, range: SourceRange) -> Option<TypeId> {
        match self.table.lookup(name) {
            Some(id) => match self.table.get(id) {
                Symbol::Type(ts) => Some(ts.ty),
                _ => {
                    self.diags.error(
                        DiagnosticKind::TypeMismatch,
                        range,
                        format!("'{name}' is not a type"),
                    );
                    None
                }
            },
            None => {
                self.diags.error(
                    DiagnosticKind::UndeclaredName,
                    range,
                    format!("undeclared type '{name}'"),
                );
                None
            }
        }
    }

    /// Resolve a struct's field slots, rejecting cycles.
    ///
    /// A field whose resolved type would reach back to the originating
    /// struct through non-reference fields is left at its previous
    /// (unresolved) shape — the substitution is only committed after the
    /// cycle check, so no physical cycle ever enters the pool.
    fn resolve_struct(&mut self, struct_id: TypeId) {
        let Type::Struct { fields, .. } = self.pool.get(struct_id).clone() else {
            return;
        };
        for (index, field) in fields.iter().enumerate() {
            match self.resolve_field_slot(field.ty, field.range, struct_id) {
                Ok(resolved) => {
                    if let Type::Struct { fields, .. } = self.pool.get_mut(struct_id) {
                        fields[index].ty = resolved;
                    }
                }
                Err(()) => {
                    self.diags.error(
                        DiagnosticKind::CircularType,
                        field.range,
                        format!(
                            "circular type: field '{}' contains the enclosing struct",
                            field.name
                        ),
                    );
                }
            }
        }
    }

    /// Resolve one field slot, refusing to commit a substitution that
    /// closes a containment cycle. Reference fields break the containment
    /// chain, so resolution below a Ref needs no cycle check.
    fn resolve_field_slot(
        &mut self,
        id: TypeId,
        range: SourceRange,
        target: TypeId,
    ) -> Result<TypeId, ()> {
        match self.pool.get(id).clone() {
            Type::Unresolved(name) => match self.resolve_name(&name, range) {
                Some(resolved) => {
                    if self.reaches_struct(resolved, target) {
                        Err(())
                    } else {
                        Ok(resolved)
                    }
                }
                None => Ok(id),
            },
            Type::Array { elem, .. } => {
                let new_elem = self.resolve_field_slot(elem, range, target)?;
                if let Type::Array { elem, .. } = self.pool.get_mut(id) {
                    *elem = new_elem;
                }
                Ok(id)
            }
            Type::Ref(_) => Ok(self.resolve_deep(id, range)),
            _ => Ok(id),
        }
    }

    /// DFS across non-reference containment edges.
    fn reaches_struct(&self, from: TypeId, target: TypeId) -> bool {
        fn walk(pool: &TypePool, from: TypeId, target: TypeId, seen: &mut HashSet<TypeId>) -> bool {
            if from == target {
                return true;
            }
            if !seen.insert(from) {
                return false;
            }
            match pool.get(from) {
                Type::Struct { fields, .. } => fields
                    .iter()
                    .any(|f| !pool.is_ref(f.ty) && walk(pool, f.ty, target, seen)),
                Type::Array { elem, .. } => walk(pool, *elem, target, seen),
                _ => false,
            }
        }
        walk(self.pool, from, target, &mut HashSet::new())
    }

    fn resolve_function(&mut self, func_ty: TypeId, range: SourceRange) {
        let Type::Function(sig) = self.pool.get(func_ty).clone() else {
            return;
        };
        let new_params: Vec<TypeId> = sig
            .params
            .iter()
            .map(|p| self.resolve_deep(p.ty, range))
            .collect();
        let new_ret = sig.ret.map(|r| self.resolve_deep(r, range));
        if let Type::Function(sig) = self.pool.get_mut(func_ty) {
            for (param, ty) in sig.params.iter_mut().zip(new_params) {
                param.ty = ty;
            }
            sig.ret = new_ret;
        }
    }

    // =========================================================================
    // Constant folding
    // =========================================================================

    /// Only basic types may be CONST.
    fn check_const_types(&mut self) {
        let ids: Vec<SymbolId> = self.table.iter().map(|(id, _)| id).collect();
        for id in ids {
            let Symbol::Variable(var) = self.table.get(id) else {
                continue;
            };
            if var.kind != VarKind::Constant {
                continue;
            }
            if !matches!(self.pool.get(var.ty), Type::Basic(_)) {
                let (range, name, ty) = (var.range, var.name.clone(), var.ty);
                self.diags.error(
                    DiagnosticKind::TypeMismatch,
                    range,
                    format!(
                        "CONST '{}' must have a basic type, found {}",
                        name,
                        self.pool.display(ty)
                    ),
                );
                self.poison(id);
            }
        }
    }

    /// Drain the work queue to fixed point.
    ///
    /// Each item either collapses to a literal or its unresolved count
    /// diverges monotonically; a visit that fails to shrink the count is a
    /// circular constant. Termination is bounded by |CONST| × depth.
    fn fold_constants(&mut self) {
        while let Some(work) = self.consts.pop_front() {
            let unresolved = match self.count_unresolved(&work.init) {
                Ok(count) => count,
                Err(err) => {
                    self.diags.error(err.kind, err.range, err.message);
                    self.poison(work.symbol);
                    continue;
                }
            };

            if unresolved == 0 {
                self.fold_one(work.symbol, &work.init);
            } else if unresolved < work.last_unresolved {
                self.consts.push_back(ConstWork {
                    symbol: work.symbol,
                    init: work.init,
                    last_unresolved: unresolved,
                });
            } else {
                let (range, name) = {
                    let sym = self.table.get(work.symbol);
                    (sym.range(), sym.name().to_string())
                };
                self.diags.error(
                    DiagnosticKind::CircularConstant,
                    range,
                    format!("circular constant '{name}'"),
                );
                self.poison(work.symbol);
            }
        }
    }

    /// Count identifier references whose constant is still unfolded.
    ///
    /// References to anything that can never fold (statics, functions,
    /// types) fail immediately instead of spinning in the queue.
    fn count_unresolved(&self, expr: &Expr) -> Result<usize, const_eval::EvalError> {
        use scriptlang_ast::ExprKind::*;
        match &expr.kind {
            Ident(name) => match self.table.lookup(name).map(|id| self.table.get(id)) {
                Some(Symbol::Variable(var)) if var.kind == VarKind::Constant => {
                    Ok(usize::from(var.init.is_none()))
                }
                Some(_) => Err(const_eval::EvalError {
                    kind: DiagnosticKind::NonConstInConst,
                    range: expr.range,
                    message: format!("'{name}' is not a constant"),
                }),
                None => Err(const_eval::EvalError {
                    kind: DiagnosticKind::UndeclaredName,
                    range: expr.range,
                    message: format!("undeclared name '{name}'"),
                }),
            },
            Paren(inner) => self.count_unresolved(inner),
            Unary { operand, .. } => self.count_unresolved(operand),
            Binary { left, right, .. } => {
                Ok(self.count_unresolved(left)? + self.count_unresolved(right)?)
            }
            _ => Ok(0),
        }
    }

    fn fold_one(&mut self, symbol: SymbolId, init: &Expr) {
        let value = {
            let table: &SymbolTable = self.table;
            const_eval::eval(init, &|name| lookup_const(table, name))
        };
        match value {
            Ok(value) => {
                let declared = match self.table.get(symbol) {
                    Symbol::Variable(var) => var.ty,
                    _ => return,
                };
                if value.type_id() != declared {
                    let range = self.table.get(symbol).range();
                    self.diags.error(
                        DiagnosticKind::TypeMismatch,
                        range,
                        format!(
                            "initializer type {} does not match CONST type {}",
                            self.pool.display(value.type_id()),
                            self.pool.display(declared)
                        ),
                    );
                    self.poison(symbol);
                    return;
                }
                if let Symbol::Variable(var) = self.table.get_mut(symbol) {
                    var.init = Some(vec![value]);
                }
            }
            Err(err) => {
                self.diags.error(err.kind, err.range, err.message);
                self.poison(symbol);
            }
        }
    }

    /// Give a failed constant its zero value so dependents fold instead of
    /// reporting the same failure again.
    fn poison(&mut self, symbol: SymbolId) {
        if let Symbol::Variable(var) = self.table.get_mut(symbol) {
            let zero = ConstValue::zero_of(var.ty);
            var.init = Some(vec![zero]);
        }
    }

    // =========================================================================
    // Array lengths
    // =========================================================================

    fn resolve_array_lengths(&mut self) {
        let ids: Vec<SymbolId> = self.table.iter().map(|(id, _)| id).collect();
        for id in ids {
            match self.table.get(id).clone() {
                Symbol::Type(ts) => {
                    if let Type::Struct { fields, .. } = self.pool.get(ts.ty).clone() {
                        for field in &fields {
                            self.fix_array_len(field.ty, field.range);
                        }
                    }
                }
                Symbol::Variable(var) => self.fix_array_len(var.ty, var.range),
                Symbol::Function(func) => {
                    if let Type::Function(sig) = self.pool.get(func.ty).clone() {
                        for param in &sig.params {
                            self.fix_array_len(param.ty, func.range);
                        }
                        if let Some(ret) = sig.ret {
                            self.fix_array_len(ret, func.range);
                        }
                    }
                }
            }
        }
    }

    fn fix_array_len(&mut self, id: TypeId, range: SourceRange) {
        match self.pool.get(id).clone() {
            Type::Array { elem, len } => {
                if let ArrayLen::Named(name) = len {
                    let resolved = match self.table.lookup(&name).map(|s| self.table.get(s)) {
                        Some(Symbol::Variable(var)) if var.kind == VarKind::Constant => {
                            var.const_value().and_then(ConstValue::as_int)
                        }
                        _ => None,
                    };
                    let lit = match resolved {
                        Some(v) if v >= 1 => v as u32,
                        _ => {
                            self.diags.error(
                                DiagnosticKind::TypeMismatch,
                                range,
                                format!("array length '{name}' must name a positive INT constant"),
                            );
                            1
                        }
                    };
                    if let Type::Array { len, .. } = self.pool.get_mut(id) {
                        *len = ArrayLen::Lit(lit);
                    }
                }
                self.fix_array_len(elem, range);
            }
            Type::Ref(elem) => self.fix_array_len(elem, range),
            _ => {}
        }
    }

    // =========================================================================
    // Layout and image folding
    // =========================================================================

    fn layout_statics(&mut self, statics_base: u32) {
        let mut cursor = statics_base;
        let statics = std::mem::take(&mut self.statics);
        for work in &statics {
            let (ty, range) = match self.table.get(work.symbol) {
                Symbol::Variable(var) => (var.ty, var.range),
                _ => continue,
            };
            // Statics may not be references; they outlive every frame.
            if self.pool.is_ref(ty) {
                self.diags.error(
                    DiagnosticKind::TypeMismatch,
                    range,
                    "a static may not be a reference",
                );
            }
            if let Symbol::Variable(var) = self.table.get_mut(work.symbol) {
                var.slot = Some(cursor);
            }
            cursor += self.pool.size_of(ty);

            if let Some(init) = &work.init {
                if let Some(cells) = self.fold_image_init(init, ty, range) {
                    if let Symbol::Variable(var) = self.table.get_mut(work.symbol) {
                        var.init = Some(cells);
                    }
                }
            }
            self.result.statics.push(work.symbol);
        }
        self.result.script.statics_size = cursor - statics_base;
    }

    fn layout_globals(&mut self, unit: &Unit) {
        // Which block does this script own? Matched by owner name.
        let script_name = self.result.script.name.clone();
        let mut owned: Option<u32> = None;
        for decl in &unit.decls {
            if let Decl::Global { block, owner, range, .. } = decl {
                if owner.eq_ignore_ascii_case(&script_name) {
                    if owned.is_some() && owned != Some(*block) {
                        self.diags.warning(
                            DiagnosticKind::DuplicateSymbol,
                            *range,
                            "script already owns a global block; keeping the first",
                        );
                    } else {
                        owned = Some(*block);
                    }
                }
            }
        }
        self.result.script.globals_block = owned;

        // Per-block offset cursors; addresses pack block and offset.
        let mut cursors: std::collections::HashMap<u32, u32> = std::collections::HashMap::new();
        let globals = std::mem::take(&mut self.globals);
        for work in &globals {
            let block = work.block.unwrap_or(0);
            let (ty, range) = match self.table.get(work.symbol) {
                Symbol::Variable(var) => (var.ty, var.range),
                _ => continue,
            };

            // Globals may not be references (or functions).
            if matches!(self.pool.get(ty), Type::Ref(_) | Type::Function(_)) {
                self.diags.error(
                    DiagnosticKind::InvalidGlobalType,
                    range,
                    format!("global may not have type {}", self.pool.display(ty)),
                );
            }

            let offset = cursors.entry(block).or_insert(0);
            let address = (block << 18) | *offset;
            if let Symbol::Variable(var) = self.table.get_mut(work.symbol) {
                var.slot = Some(address);
            }
            *offset += self.pool.size_of(ty);

            if Some(block) == owned {
                if let Some(init) = &work.init {
                    if let Some(cells) = self.fold_image_init(init, ty, range) {
                        if let Symbol::Variable(var) = self.table.get_mut(work.symbol) {
                            var.init = Some(cells);
                        }
                    }
                }
                self.result.owned_globals.push(work.symbol);
            } else if work.init.is_some() {
                self.diags.error(
                    DiagnosticKind::InvalidStaticInitializer,
                    range,
                    "only globals of the owned block may carry initializers",
                );
            }
        }
        self.result.script.globals_size = owned
            .and_then(|block| cursors.get(&block).copied())
            .unwrap_or(0);
    }

    /// Fold a static/global initializer into image cells.
    ///
    /// Scalars produce one cell; vector literals produce three FLOAT
    /// cells. STRING storage may not be initialized — the pool offset is
    /// only meaningful inside code.
    fn fold_image_init(
        &mut self,
        init: &Expr,
        ty: TypeId,
        range: SourceRange,
    ) -> Option<Vec<ConstValue>> {
        if ty == TypePool::STRING {
            self.diags.error(
                DiagnosticKind::InvalidStaticInitializer,
                range,
                "STRING statics and globals may not carry initializers",
            );
            return None;
        }

        if let ExprKind::Vector(parts) = &init.kind {
            let vec3 = self.vec3_type();
            if !self.pool.equal(ty, vec3) {
                self.diags.error(
                    DiagnosticKind::InvalidStaticInitializer,
                    range,
                    format!(
                        "vector initializer requires VEC3 storage, found {}",
                        self.pool.display(ty)
                    ),
                );
                return None;
            }
            if parts.len() != 3 {
                self.diags.error(
                    DiagnosticKind::InvalidStaticInitializer,
                    init.range,
                    "a constant vector initializer takes exactly 3 components",
                );
                return None;
            }
            let mut cells = Vec::with_capacity(3);
            for part in parts {
                let value = {
                    let table: &SymbolTable = self.table;
                    const_eval::eval(part, &|name| lookup_const(table, name))
                };
                match value {
                    Ok(ConstValue::Float(v)) => cells.push(ConstValue::Float(v)),
                    Ok(other) => {
                        self.diags.error(
                            DiagnosticKind::InvalidStaticInitializer,
                            part.range,
                            format!(
                                "vector component must be a FLOAT constant, found {}",
                                self.pool.display(other.type_id())
                            ),
                        );
                        return None;
                    }
                    Err(err) => {
                        self.diags
                            .error(DiagnosticKind::InvalidStaticInitializer, err.range, err.message);
                        return None;
                    }
                }
            }
            return Some(cells);
        }

        let value = {
            let table: &SymbolTable = self.table;
            const_eval::eval(init, &|name| lookup_const(table, name))
        };
        match value {
            Ok(value) if value.type_id() == ty => Some(vec![value]),
            Ok(value) => {
                self.diags.error(
                    DiagnosticKind::InvalidStaticInitializer,
                    init.range,
                    format!(
                        "initializer type {} does not match storage type {}",
                        self.pool.display(value.type_id()),
                        self.pool.display(ty)
                    ),
                );
                None
            }
            Err(err) => {
                self.diags
                    .error(DiagnosticKind::InvalidStaticInitializer, err.range, err.message);
                None
            }
        }
    }

    fn vec3_type(&self) -> TypeId {
        match self.table.lookup("VEC3").map(|id| self.table.get(id)) {
            Some(Symbol::Type(ts)) => ts.ty,
            _ => panic!("BUG: builtin VEC3 missing from symbol table"),
        }
    }
}

/// Environment closure body for the constant evaluator.
pub(crate) fn lookup_const(table: &SymbolTable, name: &str) -> Option<ConstValue> {
    match table.lookup(name).map(|id| table.get(id)) {
        Some(Symbol::Variable(var)) if var.kind == VarKind::Constant => {
            var.const_value().cloned()
        }
        _ => None,
    }
}
