// codegen.rs — Lowered-tree to backend instruction emission
//
// Every resolved function with a body (or a raw emit routine) is declared
// up front so call sites can reference functions defined later, then each
// body is walked and emitted against a `backend::Emitter`. Aggregate-typed
// expressions (structs, spans) evaluate to slot addresses; scalars load
// through those addresses. Assembly-level inliners take over their call
// sites via `backend::ArgSplice`.
//
// Preconditions: resolution, folding, noop elimination and register
//   lowering have run; every emitted body carries frame sizing.
// Postconditions: the returned program contains code for every declared
//   function, verified by the emitter's read-before-write check.
// Failure modes: E0600 for unresolved call targets, E0601 for lowering
//   violations, E0501 for inliner misuse.
// Side effects: none outside the returned program.

use std::collections::HashMap;

use crate::ast::{
    AssignOp, BinaryOp, Intrinsic, NodeId, StatementKind, SyntaxTree, VarTarget,
};
use crate::backend::{
    ArgSplice, CompiledProgram, Emitter, FuncIndex, InstanceLayout, NativeImpl, ProgramBuilder,
    Value,
};
use crate::diag::{codes, Diagnostic};
use crate::func::{FunctionId, FunctionTable};
use crate::inline::{AsmInlineData, Inliner};
use crate::lexer::Span;
use crate::regalloc::Reg;
use crate::types::{ConstValue, Type, TypeTable};

/// Emit the whole session into a compiled program. Returns the program and
/// the mapping from function-table ids to backend entry points.
pub fn run(
    tree: &SyntaxTree,
    types: &TypeTable,
    funcs: &FunctionTable,
    layout: InstanceLayout,
    natives: &[NativeImpl],
    unit_span: Span,
) -> Result<(CompiledProgram, HashMap<FunctionId, FuncIndex>), Diagnostic> {
    let mut builder = ProgramBuilder::new();
    for n in natives {
        builder.add_native(*n);
    }

    // declare first so mutual references resolve
    let mut indices = HashMap::new();
    for fid in funcs.ids() {
        let f = funcs.get(fid);
        if !f.is_resolved() {
            continue;
        }
        if f.body.is_some() || f.emit.is_some() {
            indices.insert(fid, builder.declare(&f.qualified));
        }
    }

    for fid in funcs.ids() {
        let Some(&idx) = indices.get(&fid) else {
            continue;
        };
        let f = funcs.get(fid);
        let arg_types: Vec<Type> = f.args.iter().map(|a| a.ty).collect();
        let (num_regs, num_locals) = match &f.body {
            Some(b) => (b.num_regs, b.local_slots),
            None => (0, 0),
        };
        let mut em = Emitter::new(&f.qualified, f.ret, arg_types, num_regs, num_locals);
        if let Some(routine) = &f.emit {
            routine(&mut em)?;
        } else if let Some(body) = &f.body {
            let mut fx = FnEmit {
                em: &mut em,
                tree,
                types,
                funcs,
                indices: &indices,
            };
            fx.emit_stmt(body.root)?;
        }
        let code = em.finish(f.span)?;
        builder.define(idx, code);
    }

    builder.set_layout(layout);
    let program = builder.finish(unit_span)?;
    Ok((program, indices))
}

fn is_aggregate(ty: Type) -> bool {
    matches!(ty, Type::Struct(_) | Type::Span(_))
}

struct FnEmit<'a> {
    em: &'a mut Emitter,
    tree: &'a SyntaxTree,
    types: &'a TypeTable,
    funcs: &'a FunctionTable,
    indices: &'a HashMap<FunctionId, FuncIndex>,
}

impl FnEmit<'_> {
    fn reg_of(&self, id: NodeId) -> Result<Reg, Diagnostic> {
        self.tree.node(id).reg.ok_or_else(|| {
            Diagnostic::error(
                codes::E0601,
                self.tree.span(id),
                "expression reached codegen without a register",
            )
        })
    }

    fn emit_stmt(&mut self, id: NodeId) -> Result<(), Diagnostic> {
        match self.tree.node(id).kind.clone() {
            StatementKind::Block(stmts) => {
                for s in stmts {
                    self.emit_stmt(s)?;
                }
            }
            StatementKind::VarDecl { init, target, .. } => {
                let Some(VarTarget::Local { slot }) = target else {
                    return Err(Diagnostic::error(
                        codes::E0601,
                        self.tree.span(id),
                        "local variable has no slot",
                    ));
                };
                if let Some(init) = init {
                    let v = self.emit_expr(init)?;
                    self.em.store_local(slot, v);
                }
            }
            StatementKind::If {
                cond,
                then_body,
                else_body,
            } => {
                let c = self.emit_expr(cond)?;
                let to_else = self.em.jz(c);
                self.emit_stmt(then_body)?;
                match else_body {
                    Some(e) => {
                        let to_end = self.em.jmp();
                        self.em.patch_here(to_else);
                        self.emit_stmt(e)?;
                        self.em.patch_here(to_end);
                    }
                    None => self.em.patch_here(to_else),
                }
            }
            StatementKind::Loop { cond, body } => {
                let top = self.em.pos();
                let c = self.emit_expr(cond)?;
                let exit = self.em.jz(c);
                self.emit_stmt(body)?;
                self.em.jmp_to(top);
                self.em.patch_here(exit);
            }
            StatementKind::Return { value } => match value {
                Some(v) => {
                    let r = self.emit_expr(v)?;
                    self.em.ret(Some(r));
                }
                None => self.em.ret(None),
            },
            StatementKind::Assignment { op, target, value } => {
                self.emit_assignment(op, target, value)?;
            }
            // void calls in statement position have no result register
            StatementKind::Call(call) => {
                self.emit_call(id, call.resolved, call.object, &call.args)?;
            }
            StatementKind::IntrinsicCall { op, object, args } => {
                self.emit_intrinsic(id, op, object, &args)?;
            }
            StatementKind::Noop => {}
            _ => {
                self.emit_expr(id)?;
            }
        }
        Ok(())
    }

    fn emit_expr(&mut self, id: NodeId) -> Result<Reg, Diagnostic> {
        let ty = self.tree.ty(id);
        match self.tree.node(id).kind.clone() {
            StatementKind::Immediate(cv) => {
                let dst = self.reg_of(id)?;
                self.em.imm(dst, const_value(cv));
                Ok(dst)
            }
            StatementKind::SymbolRef { target, path } => {
                let dst = self.reg_of(id)?;
                match target {
                    Some(VarTarget::Arg { index }) => self.em.load_arg(dst, index),
                    Some(VarTarget::Local { slot }) => self.em.load_local(dst, slot),
                    Some(VarTarget::Global { offset }) => {
                        if is_aggregate(ty) {
                            self.em.addr_global(dst, offset);
                        } else {
                            let a = self.em.alloc_scratch();
                            self.em.addr_global(a, offset);
                            self.em.load_mem(dst, a);
                        }
                    }
                    Some(VarTarget::Member { offset }) => {
                        let base = self.em.alloc_scratch();
                        self.em.load_arg(base, 0);
                        if is_aggregate(ty) {
                            self.em.addr_offset(dst, base, offset);
                        } else {
                            let a = self.em.alloc_scratch();
                            self.em.addr_offset(a, base, offset);
                            self.em.load_mem(dst, a);
                        }
                    }
                    None => {
                        return Err(Diagnostic::error(
                            codes::E0600,
                            self.tree.span(id),
                            format!("`{path}` reached codegen unresolved"),
                        ))
                    }
                }
                Ok(dst)
            }
            StatementKind::Binary { op, lhs, rhs } => {
                if op.is_logical() {
                    return self.emit_logical(id, op, lhs, rhs);
                }
                let dst = self.reg_of(id)?;
                let l = self.emit_expr(lhs)?;
                let r = self.emit_expr(rhs)?;
                self.em.binary(dst, op, l, r);
                Ok(dst)
            }
            StatementKind::Unary { op, operand } => {
                let dst = self.reg_of(id)?;
                let s = self.emit_expr(operand)?;
                self.em.unary(dst, op, s);
                Ok(dst)
            }
            StatementKind::Ternary {
                cond,
                if_true,
                if_false,
            } => {
                let dst = self.reg_of(id)?;
                let c = self.emit_expr(cond)?;
                let to_else = self.em.jz(c);
                let t = self.emit_expr(if_true)?;
                self.em.mov(dst, t);
                let to_end = self.em.jmp();
                self.em.patch_here(to_else);
                let f = self.emit_expr(if_false)?;
                self.em.mov(dst, f);
                self.em.patch_here(to_end);
                Ok(dst)
            }
            StatementKind::Cast { operand, .. } => {
                let dst = self.reg_of(id)?;
                let s = self.emit_expr(operand)?;
                self.em.cast(dst, s, ty);
                Ok(dst)
            }
            StatementKind::Member { base, offset, name } => {
                let dst = self.reg_of(id)?;
                let off = offset.ok_or_else(|| {
                    Diagnostic::error(
                        codes::E0600,
                        self.tree.span(id),
                        format!("member `{name}` reached codegen unresolved"),
                    )
                })?;
                let b = self.emit_expr(base)?;
                if is_aggregate(ty) {
                    self.em.addr_offset(dst, b, off);
                } else {
                    let a = self.em.alloc_scratch();
                    self.em.addr_offset(a, b, off);
                    self.em.load_mem(dst, a);
                }
                Ok(dst)
            }
            StatementKind::MemoryRef { base, offset } => {
                let dst = self.reg_of(id)?;
                let b = match base {
                    Some(b) => self.emit_expr(b)?,
                    None => {
                        let s = self.em.alloc_scratch();
                        self.em.load_arg(s, 0);
                        s
                    }
                };
                if is_aggregate(ty) {
                    self.em.addr_offset(dst, b, offset);
                } else {
                    let a = self.em.alloc_scratch();
                    self.em.addr_offset(a, b, offset);
                    self.em.load_mem(dst, a);
                }
                Ok(dst)
            }
            StatementKind::Subscript { base, index } => {
                let dst = self.reg_of(id)?;
                let bty = self.tree.ty(base);
                let b = self.emit_expr(base)?;
                let i = self.emit_expr(index)?;
                match bty {
                    Type::Block => self.em.block_get(dst, b, i),
                    Type::Span(sid) => {
                        let (elem, _) = self.types.span_info(sid);
                        let scale = self.types.size_of(elem);
                        if is_aggregate(elem) {
                            self.em.addr_index(dst, b, i, scale);
                        } else {
                            let a = self.em.alloc_scratch();
                            self.em.addr_index(a, b, i, scale);
                            self.em.load_mem(dst, a);
                        }
                    }
                    _ => {
                        return Err(Diagnostic::error(
                            codes::E0601,
                            self.tree.span(id),
                            "subscript base is not indexable",
                        ))
                    }
                }
                Ok(dst)
            }
            StatementKind::Call(call) => {
                let dst = self.emit_call(id, call.resolved, call.object, &call.args)?;
                dst.ok_or_else(|| {
                    // void calls in expression position were rejected by the
                    // resolver; reaching this is a compiler bug
                    Diagnostic::error(
                        codes::E0601,
                        self.tree.span(id),
                        "void call used as a value",
                    )
                })
            }
            StatementKind::IntrinsicCall { op, object, args } => {
                self.emit_intrinsic(id, op, object, &args)
            }
            other => Err(Diagnostic::error(
                codes::E0601,
                self.tree.span(id),
                format!("statement used as a value: {other:?}"),
            )),
        }
    }

    /// Short-circuit lowering for `&&` and `||`; the result register holds
    /// 0 or 1.
    fn emit_logical(
        &mut self,
        id: NodeId,
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
    ) -> Result<Reg, Diagnostic> {
        let dst = self.reg_of(id)?;
        match op {
            BinaryOp::And => {
                let l = self.emit_expr(lhs)?;
                let fail_l = self.em.jz(l);
                let r = self.emit_expr(rhs)?;
                let fail_r = self.em.jz(r);
                self.em.imm(dst, Value::Int(1));
                let end = self.em.jmp();
                self.em.patch_here(fail_l);
                self.em.patch_here(fail_r);
                self.em.imm(dst, Value::Int(0));
                self.em.patch_here(end);
            }
            BinaryOp::Or => {
                let l = self.emit_expr(lhs)?;
                let try_rhs = self.em.jz(l);
                self.em.imm(dst, Value::Int(1));
                let end_l = self.em.jmp();
                self.em.patch_here(try_rhs);
                let r = self.emit_expr(rhs)?;
                let fail = self.em.jz(r);
                self.em.imm(dst, Value::Int(1));
                let end_r = self.em.jmp();
                self.em.patch_here(fail);
                self.em.imm(dst, Value::Int(0));
                self.em.patch_here(end_l);
                self.em.patch_here(end_r);
            }
            _ => unreachable!("not a logical operator"),
        }
        Ok(dst)
    }

    fn emit_call(
        &mut self,
        id: NodeId,
        resolved: Option<FunctionId>,
        object: Option<NodeId>,
        args: &[NodeId],
    ) -> Result<Option<Reg>, Diagnostic> {
        let span = self.tree.span(id);
        let fid = resolved.ok_or_else(|| {
            Diagnostic::error(codes::E0600, span, "call reached codegen unresolved")
        })?;
        let f = self.funcs.get(fid);
        if !f.is_resolved() {
            return Err(Diagnostic::error(
                codes::E0600,
                span,
                format!("`{}` has no implementation", f.qualified),
            ));
        }

        let mut regs = Vec::with_capacity(args.len() + 1);
        if let Some(obj) = object {
            regs.push(self.emit_expr(obj)?);
        }
        for &a in args {
            regs.push(self.emit_expr(a)?);
        }
        let dst = self.tree.node(id).reg;

        match &f.inliner {
            Some(Inliner::Assembly(g)) => {
                let g = g.clone();
                let data = AsmInlineData {
                    splice: ArgSplice::new(self.em, dst, regs),
                    func_indices: self.indices,
                    location: span,
                };
                g(data)?;
                return Ok(dst);
            }
            Some(Inliner::HighLevel(_)) => {
                return Err(Diagnostic::error(
                    codes::E0501,
                    span,
                    format!(
                        "high-level inliner for `{}` survived to codegen",
                        f.qualified
                    ),
                ));
            }
            None => {}
        }

        if let Some(nid) = f.native {
            let d = match dst {
                Some(d) => d,
                None => self.em.alloc_scratch(),
            };
            self.em.call_native(d, nid, &regs);
            return Ok(Some(d));
        }

        let idx = self.indices.get(&fid).copied().ok_or_else(|| {
            Diagnostic::error(
                codes::E0600,
                span,
                format!("`{}` was never declared to the backend", f.qualified),
            )
        })?;
        self.em.call(dst, idx, &regs);
        Ok(dst)
    }

    fn emit_intrinsic(
        &mut self,
        id: NodeId,
        op: Intrinsic,
        object: NodeId,
        args: &[NodeId],
    ) -> Result<Reg, Diagnostic> {
        match op {
            Intrinsic::BlockSize => {
                let dst = self.reg_of(id)?;
                let b = self.emit_expr(object)?;
                self.em.block_len(dst, b);
                Ok(dst)
            }
            Intrinsic::BlockSub => {
                let dst = self.reg_of(id)?;
                let b = self.emit_expr(object)?;
                let s = self.emit_expr(args[0])?;
                let l = self.emit_expr(args[1])?;
                self.em.block_sub(dst, b, s, l);
                Ok(dst)
            }
            Intrinsic::ReferBlockTo => {
                let ed = self.emit_address(object)?;
                let target = self.emit_address(args[0])?;
                self.em.refer_block(ed, target);
                // void intrinsic; the returned register is never read
                match self.tree.node(id).reg {
                    Some(r) => Ok(r),
                    None => Ok(self.emit_dummy()),
                }
            }
        }
    }

    fn emit_dummy(&mut self) -> Reg {
        let r = self.em.alloc_scratch();
        self.em.imm(r, Value::Int(0));
        r
    }

    /// Emit the slot address of an lvalue or aggregate expression.
    fn emit_address(&mut self, id: NodeId) -> Result<Reg, Diagnostic> {
        let span = self.tree.span(id);
        match self.tree.node(id).kind.clone() {
            StatementKind::SymbolRef { target, .. } => match target {
                Some(VarTarget::Global { offset }) => {
                    let r = self.reg_or_scratch(id);
                    self.em.addr_global(r, offset);
                    Ok(r)
                }
                Some(VarTarget::Member { offset }) => {
                    let base = self.em.alloc_scratch();
                    self.em.load_arg(base, 0);
                    let r = self.reg_or_scratch(id);
                    self.em.addr_offset(r, base, offset);
                    Ok(r)
                }
                Some(VarTarget::Arg { index }) if is_aggregate(self.tree.ty(id)) => {
                    let r = self.reg_or_scratch(id);
                    self.em.load_arg(r, index);
                    Ok(r)
                }
                _ => Err(Diagnostic::error(
                    codes::E0601,
                    span,
                    "expression has no memory address",
                )),
            },
            StatementKind::Member { base, offset, .. } => {
                let off = offset.ok_or_else(|| {
                    Diagnostic::error(codes::E0600, span, "member reached codegen unresolved")
                })?;
                let b = self.emit_expr(base)?;
                let r = self.reg_or_scratch(id);
                self.em.addr_offset(r, b, off);
                Ok(r)
            }
            StatementKind::MemoryRef { base, offset } => {
                let b = match base {
                    Some(b) => self.emit_expr(b)?,
                    None => {
                        let s = self.em.alloc_scratch();
                        self.em.load_arg(s, 0);
                        s
                    }
                };
                let r = self.reg_or_scratch(id);
                self.em.addr_offset(r, b, offset);
                Ok(r)
            }
            StatementKind::Subscript { base, index } if matches!(self.tree.ty(base), Type::Span(_)) =>
            {
                let Type::Span(sid) = self.tree.ty(base) else {
                    unreachable!()
                };
                let (elem, _) = self.types.span_info(sid);
                let scale = self.types.size_of(elem);
                let b = self.emit_expr(base)?;
                let i = self.emit_expr(index)?;
                let r = self.reg_or_scratch(id);
                self.em.addr_index(r, b, i, scale);
                Ok(r)
            }
            _ if is_aggregate(self.tree.ty(id)) => self.emit_expr(id),
            _ => Err(Diagnostic::error(
                codes::E0601,
                span,
                "expression has no memory address",
            )),
        }
    }

    fn reg_or_scratch(&mut self, id: NodeId) -> Reg {
        match self.tree.node(id).reg {
            Some(r) => r,
            None => self.em.alloc_scratch(),
        }
    }

    fn emit_assignment(
        &mut self,
        op: AssignOp,
        target: NodeId,
        value: NodeId,
    ) -> Result<(), Diagnostic> {
        let src = match op {
            AssignOp::Set => self.emit_expr(value)?,
            _ => {
                let cur = self.emit_expr(target)?;
                let v = self.emit_expr(value)?;
                let tmp = self.em.alloc_scratch();
                self.em.binary(tmp, compound_op(op), cur, v);
                tmp
            }
        };
        self.emit_store(target, src)
    }

    fn emit_store(&mut self, target: NodeId, src: Reg) -> Result<(), Diagnostic> {
        let span = self.tree.span(target);
        match self.tree.node(target).kind.clone() {
            StatementKind::SymbolRef { target: vt, .. } => match vt {
                Some(VarTarget::Local { slot }) => {
                    self.em.store_local(slot, src);
                    Ok(())
                }
                Some(VarTarget::Global { .. }) | Some(VarTarget::Member { .. }) => {
                    let a = self.emit_address(target)?;
                    self.em.store_mem(a, src);
                    Ok(())
                }
                _ => Err(Diagnostic::error(
                    codes::E0601,
                    span,
                    "assignment target has no storage",
                )),
            },
            StatementKind::Member { .. } | StatementKind::MemoryRef { .. } => {
                let a = self.emit_address(target)?;
                self.em.store_mem(a, src);
                Ok(())
            }
            StatementKind::Subscript { base, index } => {
                let bty = self.tree.ty(base);
                match bty {
                    Type::Block => {
                        let b = self.emit_expr(base)?;
                        let i = self.emit_expr(index)?;
                        self.em.block_set(b, i, src);
                        Ok(())
                    }
                    Type::Span(_) => {
                        let a = self.emit_address(target)?;
                        self.em.store_mem(a, src);
                        Ok(())
                    }
                    _ => Err(Diagnostic::error(
                        codes::E0601,
                        span,
                        "assignment target is not indexable",
                    )),
                }
            }
            _ => Err(Diagnostic::error(
                codes::E0601,
                span,
                "expression is not assignable",
            )),
        }
    }
}

fn compound_op(op: AssignOp) -> BinaryOp {
    match op {
        AssignOp::Add => BinaryOp::Add,
        AssignOp::Sub => BinaryOp::Sub,
        AssignOp::Mul => BinaryOp::Mul,
        AssignOp::Div => BinaryOp::Div,
        AssignOp::Set => unreachable!("plain assignment has no operator"),
    }
}

fn const_value(cv: ConstValue) -> Value {
    match cv {
        ConstValue::Int(v) => Value::Int(v),
        ConstValue::Float(v) => Value::Float(v),
        ConstValue::Double(v) => Value::Double(v),
    }
}
