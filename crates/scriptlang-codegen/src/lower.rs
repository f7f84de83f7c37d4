//! Lowering of bound functions into the instruction stream.
//!
//! Addressing discipline:
//!
//! - Scalar variables use the direct `LOCAL`/`STATIC`/`GLOBAL` load and
//!   store forms at the narrowest operand width.
//! - Member and element places compute an address (base address,
//!   `IOFFSET`/`ARRAY`) and go through `LOAD`/`STORE`.
//! - A reference variable holds an address; reading or writing the place
//!   behind it loads the slot value first.
//! - Aggregates move slot by slot; the address chain of a non-variable
//!   place is recomputed per slot.
//!
//! Branch shapes: conditions lower through [`FunctionLowerer::branch_if_false`],
//! which fuses integer comparisons into the `IEQ_JZ` family when they
//! directly gate the branch; logical AND/OR short-circuit with `JZ` over
//! a duplicated operand.

use crate::emitter::{Emitter, Label};
use scriptlang_ast::{BinaryOp, UnaryOp};
use scriptlang_sema::{
    BoundCase, BoundExpr, BoundExprKind, BoundFunction, BoundStmt, FunctionKind, Symbol, SymbolId,
    SymbolTable, Type, TypeId, TypePool, VarKind,
};
use scriptlang_vm::Opcode;
use std::collections::HashMap;
use tracing::debug;

/// Storage class of a directly addressable variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Storage {
    Frame,
    Static,
    Global,
}

pub struct FunctionLowerer<'a> {
    pool: &'a TypePool,
    table: &'a SymbolTable,
    emitter: &'a mut Emitter,
    /// Entry labels of every emitted function, keyed by case-folded
    /// name. Cross-unit calls go through an imported clone of the callee
    /// symbol, so names — unique at the root scope — are the link.
    call_targets: &'a HashMap<String, Label>,
    /// LEAVE argument-slot operand of the enclosing function.
    args_size: u8,
    /// Return slot count of the enclosing function.
    return_slots: u8,
    /// Innermost-last stack of SWITCH exit labels for BREAK.
    switch_exits: Vec<Label>,
}

impl<'a> FunctionLowerer<'a> {
    pub fn new(
        pool: &'a TypePool,
        table: &'a SymbolTable,
        emitter: &'a mut Emitter,
        call_targets: &'a HashMap<String, Label>,
    ) -> Self {
        Self {
            pool,
            table,
            emitter,
            call_targets,
            args_size: 0,
            return_slots: 0,
            switch_exits: Vec::new(),
        }
    }

    /// Emit one function: prologue, body, epilogue.
    ///
    /// `display_name` lands in the ENTER operand — the script name for
    /// the entry function, the function's own name otherwise.
    pub fn lower_function(&mut self, function: &BoundFunction, label: Label, display_name: &str) {
        let Symbol::Function(sym) = self.table.get(function.symbol) else {
            panic!("BUG: bound function symbol is not a function");
        };
        let Type::Function(sig) = self.pool.get(sym.ty) else {
            panic!("BUG: function symbol without signature");
        };
        self.args_size = sym.args_size as u8;
        self.return_slots = sig.ret.map(|t| self.pool.size_of(t) as u8).unwrap_or(0);

        self.emitter
            .bind_label(label)
            .expect("BUG: function label bound twice");

        let frame = sym.args_size + 2 + sym.locals_size;
        self.emitter
            .enter(self.args_size, frame as u16, display_name);
        debug!(function = %sym.name, frame, "emitting function");

        self.lower_block(&function.body);

        // The body's own RETURNs inline their epilogue; close the
        // fall-through path.
        if !matches!(function.body.last(), Some(BoundStmt::Return(_))) {
            self.emitter.leave(self.args_size, 0);
        }
    }

    fn lower_block(&mut self, body: &[BoundStmt]) {
        for stmt in body {
            self.lower_stmt(stmt);
        }
    }

    fn lower_stmt(&mut self, stmt: &BoundStmt) {
        match stmt {
            BoundStmt::Var { symbol, init } => self.lower_var_init(*symbol, init.as_ref()),
            BoundStmt::Assign { lhs, rhs } => self.lower_assign(lhs, rhs),
            BoundStmt::Invoke(call) => {
                self.rvalue(call);
                // A call used as a statement discards its results.
                let drops = match &call.kind {
                    BoundExprKind::Call { callee, .. } => self.callee_return_slots(*callee),
                    _ => 0,
                };
                for _ in 0..drops {
                    self.emitter.op(Opcode::Drop);
                }
            }
            BoundStmt::If {
                cond,
                then_body,
                else_body,
            } => self.lower_if(cond, then_body, else_body.as_deref()),
            BoundStmt::While { cond, body } => self.lower_while(cond, body),
            BoundStmt::Repeat {
                limit,
                counter,
                body,
            } => self.lower_repeat(limit, counter, body),
            BoundStmt::Switch {
                value,
                cases,
                default,
            } => self.lower_switch(value, cases, default.as_deref()),
            BoundStmt::Break => {
                let exit = *self
                    .switch_exits
                    .last()
                    .expect("BUG: BREAK survived checking outside a SWITCH");
                self.emitter.branch(Opcode::J, exit);
            }
            BoundStmt::Return(value) => {
                match value {
                    Some(value) => {
                        self.rvalue(value);
                        self.emitter.leave(self.args_size, self.return_slots);
                    }
                    None => self.emitter.leave(self.args_size, 0),
                };
            }
        }
    }

    fn lower_var_init(&mut self, symbol: SymbolId, init: Option<&BoundExpr>) {
        let Some(init) = init else { return };
        let Symbol::Variable(var) = self.table.get(symbol) else {
            panic!("BUG: local symbol is not a variable");
        };
        let (ty, slot) = (var.ty, var.slot.unwrap_or(0));

        // A reference local captures an address once at initialization.
        if self.pool.is_ref(ty) {
            if self.pool.is_ref(init.ty) {
                self.load_direct_slot(Storage::Frame, slot);
            } else {
                self.push_addr(init);
            }
            self.store_direct_slot(Storage::Frame, slot);
            return;
        }

        let lhs = BoundExpr::new(BoundExprKind::Var(symbol), ty, init.range);
        self.lower_assign(&lhs, init);
    }

    fn lower_assign(&mut self, lhs: &BoundExpr, rhs: &BoundExpr) {
        let target_ty = self.pool.deref(lhs.ty);
        let size = self.pool.size_of(target_ty);

        match &rhs.kind {
            // Value-producing aggregates (vector literals, calls) push
            // all their slots at once; stores run in reverse so the top
            // of stack lands in the last slot.
            BoundExprKind::Vector(_) | BoundExprKind::Call { .. } => {
                self.rvalue(rhs);
                for slot in (0..size).rev() {
                    self.store_place_slot(lhs, slot);
                }
            }
            _ if size <= 1 => {
                self.rvalue(rhs);
                self.store_place_slot(lhs, 0);
            }
            // Place-to-place aggregate copy, slot by slot.
            _ => {
                for slot in 0..size {
                    self.load_place_slot(rhs, slot);
                    self.store_place_slot(lhs, slot);
                }
            }
        }
    }

    fn lower_if(&mut self, cond: &BoundExpr, then_body: &[BoundStmt], else_body: Option<&[BoundStmt]>) {
        match else_body {
            None => {
                let endif = self.emitter.new_label();
                self.branch_if_false(cond, endif);
                self.lower_block(then_body);
                self.bind(endif);
            }
            Some(else_body) => {
                let else_label = self.emitter.new_label();
                let endif = self.emitter.new_label();
                self.branch_if_false(cond, else_label);
                self.lower_block(then_body);
                self.emitter.branch(Opcode::J, endif);
                self.bind(else_label);
                self.lower_block(else_body);
                self.bind(endif);
            }
        }
    }

    fn lower_while(&mut self, cond: &BoundExpr, body: &[BoundStmt]) {
        let head = self.emitter.new_label();
        let exit = self.emitter.new_label();
        self.bind(head);
        self.branch_if_false(cond, exit);
        self.lower_block(body);
        self.emitter.branch(Opcode::J, head);
        self.bind(exit);
    }

    /// `REPEAT limit counter` is counting-up sugar:
    /// `counter = 0; while counter < limit { body; counter += 1 }`.
    fn lower_repeat(&mut self, limit: &BoundExpr, counter: &BoundExpr, body: &[BoundStmt]) {
        let head = self.emitter.new_label();
        let exit = self.emitter.new_label();

        self.emitter.push_int(0);
        self.store_place_slot(counter, 0);

        self.bind(head);
        self.rvalue(counter);
        self.rvalue(limit);
        self.emitter.branch(Opcode::IltJz, exit);

        self.lower_block(body);

        self.rvalue(counter);
        self.emitter.push_int(1);
        self.emitter.op(Opcode::Iadd);
        self.store_place_slot(counter, 0);
        self.emitter.branch(Opcode::J, head);

        self.bind(exit);
    }

    fn lower_switch(&mut self, value: &BoundExpr, cases: &[BoundCase], default: Option<&[BoundStmt]>) {
        let end = self.emitter.new_label();
        let default_label = default.map(|_| self.emitter.new_label());

        self.rvalue(value);
        let entries: Vec<(u32, Label)> = cases
            .iter()
            .map(|case| ((case.value as i32) as u32, self.emitter.new_label()))
            .collect();
        self.emitter.switch(&entries);
        self.emitter.branch(Opcode::J, default_label.unwrap_or(end));

        self.switch_exits.push(end);
        for (case, (_, label)) in cases.iter().zip(&entries) {
            self.bind(*label);
            self.lower_block(&case.body);
            // Fall-through to the next case is the language semantic;
            // BREAK jumps to `end`.
        }
        if let (Some(label), Some(body)) = (default_label, default) {
            self.bind(label);
            self.lower_block(body);
        }
        self.switch_exits.pop();

        self.bind(end);
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    /// Push the logical value of an expression. Reference-typed places
    /// are dereferenced; the result occupies `size_of(deref(ty))` slots.
    fn rvalue(&mut self, expr: &BoundExpr) {
        match &expr.kind {
            BoundExprKind::IntLit(v) => self.emitter.push_int(*v),
            BoundExprKind::FloatLit(v) => self.emitter.push_float(*v),
            BoundExprKind::BoolLit(v) => self.emitter.push_int(i64::from(*v)),
            BoundExprKind::StringLit(s) => self.emitter.push_string(s),
            BoundExprKind::Var(_) | BoundExprKind::Member { .. } | BoundExprKind::Index { .. } => {
                let size = self.pool.size_of(self.pool.deref(expr.ty));
                for slot in 0..size.max(1) {
                    self.load_place_slot(expr, slot);
                }
            }
            BoundExprKind::Call { .. } => self.lower_call(expr),
            BoundExprKind::Unary { op, operand } => {
                self.rvalue(operand);
                let opcode = match op {
                    UnaryOp::Not => Opcode::Inot,
                    UnaryOp::Neg if self.pool.deref(operand.ty) == TypePool::FLOAT => Opcode::Fneg,
                    UnaryOp::Neg => Opcode::Ineg,
                };
                self.emitter.op(opcode);
            }
            BoundExprKind::Binary { op, left, right } => self.lower_binary(*op, left, right),
            BoundExprKind::Vector(parts) => {
                for part in parts {
                    self.rvalue(part);
                }
            }
            BoundExprKind::Error => panic!("BUG: error expression reached the emitter"),
        }
    }

    fn lower_binary(&mut self, op: BinaryOp, left: &BoundExpr, right: &BoundExpr) {
        use BinaryOp::*;

        // Short-circuit forms keep the left value on the stack as the
        // result when it decides the outcome.
        match op {
            And => {
                let join = self.emitter.new_label();
                self.rvalue(left);
                self.emitter.op(Opcode::Dup);
                self.emitter.branch(Opcode::Jz, join);
                self.emitter.op(Opcode::Drop);
                self.rvalue(right);
                self.bind(join);
                return;
            }
            Or => {
                let join = self.emitter.new_label();
                self.rvalue(left);
                self.emitter.op(Opcode::Dup);
                self.emitter.op(Opcode::Inot);
                self.emitter.branch(Opcode::Jz, join);
                self.emitter.op(Opcode::Drop);
                self.rvalue(right);
                self.bind(join);
                return;
            }
            _ => {}
        }

        self.rvalue(left);
        self.rvalue(right);
        let float = self.pool.deref(left.ty) == TypePool::FLOAT;
        let opcode = match (op, float) {
            (Add, false) => Opcode::Iadd,
            (Sub, false) => Opcode::Isub,
            (Mul, false) => Opcode::Imul,
            (Div, false) => Opcode::Idiv,
            (Mod, false) => Opcode::Imod,
            (Add, true) => Opcode::Fadd,
            (Sub, true) => Opcode::Fsub,
            (Mul, true) => Opcode::Fmul,
            (Div, true) => Opcode::Fdiv,
            (Mod, true) => Opcode::Fmod,
            (BitAnd, _) => Opcode::Iand,
            (BitOr, _) => Opcode::Ior,
            (BitXor, _) => Opcode::Ixor,
            (Eq, false) => Opcode::Ieq,
            (Ne, false) => Opcode::Ine,
            (Gt, false) => Opcode::Igt,
            (Ge, false) => Opcode::Ige,
            (Lt, false) => Opcode::Ilt,
            (Le, false) => Opcode::Ile,
            (Eq, true) => Opcode::Feq,
            (Ne, true) => Opcode::Fne,
            (Gt, true) => Opcode::Fgt,
            (Ge, true) => Opcode::Fge,
            (Lt, true) => Opcode::Flt,
            (Le, true) => Opcode::Fle,
            (And | Or, _) => unreachable!("short-circuit forms handled above"),
        };
        self.emitter.op(opcode);
    }

    fn lower_call(&mut self, expr: &BoundExpr) {
        let BoundExprKind::Call { callee, args } = &expr.kind else {
            panic!("BUG: lower_call on a non-call");
        };
        let Symbol::Function(func) = self.table.get(*callee) else {
            panic!("BUG: call target is not a function");
        };
        let Type::Function(sig) = self.pool.get(func.ty) else {
            panic!("BUG: function symbol without signature");
        };

        let mut arg_slots = 0u8;
        for (param, arg) in sig.params.iter().zip(args) {
            arg_slots += self.pool.size_of(param.ty) as u8;
            if self.pool.is_ref(param.ty) && !self.pool.is_ref(arg.ty) {
                // Pass-by-reference takes the argument's address.
                self.push_addr(arg);
            } else if self.pool.is_ref(param.ty) {
                // A reference argument forwards the stored address.
                self.raw_ref_value(arg);
            } else {
                self.rvalue(arg);
            }
        }

        match func.kind {
            FunctionKind::Native(hash) => {
                let returns = sig.ret.map(|t| self.pool.size_of(t) as u8).unwrap_or(0);
                self.emitter.native(arg_slots, returns, hash);
            }
            FunctionKind::Defined => {
                let key = func.name.to_ascii_lowercase();
                let label = *self
                    .call_targets
                    .get(&key)
                    .expect("BUG: call target was never emitted");
                self.emitter.call(label);
            }
            FunctionKind::Prototype => panic!("BUG: prototype call survived checking"),
        }
    }

    /// Return-slot count of a callee, for statement-position drops.
    fn callee_return_slots(&self, callee: SymbolId) -> u32 {
        let Symbol::Function(func) = self.table.get(callee) else {
            return 0;
        };
        match self.pool.get(func.ty) {
            Type::Function(sig) => sig.ret.map(|t| self.pool.size_of(t)).unwrap_or(0),
            _ => 0,
        }
    }

    /// Push the raw stored address of a reference variable.
    fn raw_ref_value(&mut self, expr: &BoundExpr) {
        match &expr.kind {
            BoundExprKind::Var(symbol) => {
                let (storage, slot) = self.storage_of(*symbol);
                self.load_direct_slot(storage, slot);
            }
            _ => {
                // A reference-typed member/element place: its cell holds
                // the address.
                self.load_place_slot(expr, 0);
            }
        }
    }

    // =========================================================================
    // Conditions
    // =========================================================================

    /// Branch to `target` when the condition is false, fusing integer
    /// comparisons that directly gate the branch.
    fn branch_if_false(&mut self, cond: &BoundExpr, target: Label) {
        if let BoundExprKind::Binary { op, left, right } = &cond.kind {
            if self.pool.deref(left.ty) == TypePool::INT {
                let fused = match op {
                    BinaryOp::Eq => Some(Opcode::IeqJz),
                    BinaryOp::Ne => Some(Opcode::IneJz),
                    BinaryOp::Gt => Some(Opcode::IgtJz),
                    BinaryOp::Ge => Some(Opcode::IgeJz),
                    BinaryOp::Lt => Some(Opcode::IltJz),
                    BinaryOp::Le => Some(Opcode::IleJz),
                    _ => None,
                };
                if let Some(fused) = fused {
                    self.rvalue(left);
                    self.rvalue(right);
                    self.emitter.branch(fused, target);
                    return;
                }
            }
        }
        self.rvalue(cond);
        self.emitter.branch(Opcode::Jz, target);
    }

    // =========================================================================
    // Places
    // =========================================================================

    /// Push the address of slot 0 of a place.
    fn push_addr(&mut self, place: &BoundExpr) {
        match &place.kind {
            BoundExprKind::Var(symbol) => {
                let (storage, slot) = self.storage_of(*symbol);
                if self.pool.is_ref(self.var_type(*symbol)) {
                    // The variable holds the address already.
                    self.load_direct_slot(storage, slot);
                } else {
                    self.addr_direct_slot(storage, slot);
                }
            }
            BoundExprKind::Member { base, field } => {
                self.push_addr(base);
                let offset = self.field_offset(base.ty, *field);
                self.emit_ioffset(offset);
            }
            BoundExprKind::Index { base, index } => {
                self.rvalue(index);
                self.push_addr(base);
                let elem_size = match self.pool.get(self.pool.deref(base.ty)) {
                    Type::Array { elem, .. } => self.pool.size_of(*elem),
                    _ => panic!("BUG: index into a non-array survived checking"),
                };
                if elem_size <= u8::MAX as u32 {
                    self.emitter.op_u8(Opcode::ArrayU8, elem_size as u8);
                } else {
                    self.emitter.op_u16(Opcode::ArrayU16, elem_size as u16);
                }
            }
            _ => panic!("BUG: address of a non-place expression"),
        }
    }

    /// Load one slot of a place onto the stack.
    fn load_place_slot(&mut self, place: &BoundExpr, slot: u32) {
        if let BoundExprKind::Var(symbol) = &place.kind {
            if !self.pool.is_ref(self.var_type(*symbol)) {
                let (storage, base) = self.storage_of(*symbol);
                self.load_direct_slot(storage, base + slot);
                return;
            }
        }
        self.push_addr(place);
        if slot > 0 {
            self.emit_ioffset(slot);
        }
        self.emitter.op(Opcode::Load);
    }

    /// Store the top of stack into one slot of a place.
    fn store_place_slot(&mut self, place: &BoundExpr, slot: u32) {
        if let BoundExprKind::Var(symbol) = &place.kind {
            if !self.pool.is_ref(self.var_type(*symbol)) {
                let (storage, base) = self.storage_of(*symbol);
                self.store_direct_slot(storage, base + slot);
                return;
            }
        }
        self.push_addr(place);
        if slot > 0 {
            self.emit_ioffset(slot);
        }
        self.emitter.op(Opcode::Store);
    }

    fn emit_ioffset(&mut self, offset: u32) {
        if offset == 0 {
            return;
        }
        if offset <= u8::MAX as u32 {
            self.emitter.op_u8(Opcode::IoffsetU8, offset as u8);
        } else {
            self.emitter.op_s16(Opcode::IoffsetS16, offset as i16);
        }
    }

    /// Cumulative slot offset of a struct field.
    fn field_offset(&self, base_ty: TypeId, field: usize) -> u32 {
        let Type::Struct { fields, .. } = self.pool.get(self.pool.deref(base_ty)) else {
            panic!("BUG: member access into a non-struct survived checking");
        };
        fields[..field].iter().map(|f| self.pool.size_of(f.ty)).sum()
    }

    fn var_type(&self, symbol: SymbolId) -> TypeId {
        match self.table.get(symbol) {
            Symbol::Variable(var) => var.ty,
            _ => panic!("BUG: place symbol is not a variable"),
        }
    }

    fn storage_of(&self, symbol: SymbolId) -> (Storage, u32) {
        let Symbol::Variable(var) = self.table.get(symbol) else {
            panic!("BUG: place symbol is not a variable");
        };
        let slot = var.slot.expect("BUG: unlaid-out variable reached the emitter");
        let storage = match var.kind {
            VarKind::Local | VarKind::Argument => Storage::Frame,
            VarKind::Static => Storage::Static,
            VarKind::Global => Storage::Global,
            VarKind::Constant => panic!("BUG: constant survived binding as a place"),
        };
        (storage, slot)
    }

    fn addr_direct_slot(&mut self, storage: Storage, slot: u32) {
        match storage {
            Storage::Frame if slot <= u8::MAX as u32 => {
                self.emitter.op_u8(Opcode::LocalU8, slot as u8)
            }
            Storage::Frame => self.emitter.op_u16(Opcode::LocalU16, slot as u16),
            Storage::Static if slot <= u8::MAX as u32 => {
                self.emitter.op_u8(Opcode::StaticU8, slot as u8)
            }
            Storage::Static => self.emitter.op_u16(Opcode::StaticU16, slot as u16),
            Storage::Global if slot <= u16::MAX as u32 => {
                self.emitter.op_u16(Opcode::GlobalU16, slot as u16)
            }
            Storage::Global => self.emitter.op_u24(Opcode::GlobalU24, slot),
        }
    }

    fn load_direct_slot(&mut self, storage: Storage, slot: u32) {
        match storage {
            Storage::Frame if slot <= u8::MAX as u32 => {
                self.emitter.op_u8(Opcode::LocalU8Load, slot as u8)
            }
            Storage::Frame => self.emitter.op_u16(Opcode::LocalU16Load, slot as u16),
            Storage::Static if slot <= u8::MAX as u32 => {
                self.emitter.op_u8(Opcode::StaticU8Load, slot as u8)
            }
            Storage::Static => self.emitter.op_u16(Opcode::StaticU16Load, slot as u16),
            Storage::Global if slot <= u16::MAX as u32 => {
                self.emitter.op_u16(Opcode::GlobalU16Load, slot as u16)
            }
            Storage::Global => self.emitter.op_u24(Opcode::GlobalU24Load, slot),
        }
    }

    fn store_direct_slot(&mut self, storage: Storage, slot: u32) {
        match storage {
            Storage::Frame if slot <= u8::MAX as u32 => {
                self.emitter.op_u8(Opcode::LocalU8Store, slot as u8)
            }
            Storage::Frame => self.emitter.op_u16(Opcode::LocalU16Store, slot as u16),
            Storage::Static if slot <= u8::MAX as u32 => {
                self.emitter.op_u8(Opcode::StaticU8Store, slot as u8)
            }
            Storage::Static => self.emitter.op_u16(Opcode::StaticU16Store, slot as u16),
            Storage::Global if slot <= u16::MAX as u32 => {
                self.emitter.op_u16(Opcode::GlobalU16Store, slot as u16)
            }
            Storage::Global => self.emitter.op_u24(Opcode::GlobalU24Store, slot),
        }
    }

    fn bind(&mut self, label: Label) {
        self.emitter
            .bind_label(label)
            .expect("BUG: lowering bound a label twice");
    }
}
