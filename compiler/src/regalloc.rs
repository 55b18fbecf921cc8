// regalloc.rs — Virtual register lowering
//
// Assigns a virtual register to every value-producing expression node in a
// function body. Registers come from a free list; a node's operands die
// before the node claims its own register, so register lifetimes follow the
// expression tree shape and never overlap across statements. Assignment is
// the exception: the store re-evaluates the target's operands after the
// value is computed, so the value subtree draws from fresh registers only.
//
// Preconditions: the tree is fully resolved (no `Type::Dynamic` nodes
//   reachable from the root).
// Postconditions: every expression node with a non-void type carries
//   `Some(reg)`; the returned count is the frame's register file size.
// Failure modes: a reachable unresolved node fails verification (compiler
//   bug surfaced as a codegen diagnostic, not a panic).
// Side effects: mutates `reg` fields in the tree.

use crate::ast::{NodeId, StatementKind, SyntaxTree};
use crate::diag::{codes, Diagnostic};
use crate::types::Type;

/// A virtual register index within one function frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reg(pub u16);

/// Free-list register allocator for one function body.
#[derive(Debug, Default)]
pub struct RegAllocator {
    free: Vec<u16>,
    next: u16,
    live: usize,
}

impl RegAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self) -> Reg {
        self.live += 1;
        match self.free.pop() {
            Some(r) => Reg(r),
            None => {
                let r = self.next;
                self.next += 1;
                Reg(r)
            }
        }
    }

    pub fn release(&mut self, r: Reg) {
        self.live -= 1;
        self.free.push(r.0);
    }

    /// Take every free register out of circulation until `unpark`.
    fn park(&mut self) -> Vec<u16> {
        std::mem::take(&mut self.free)
    }

    fn unpark(&mut self, regs: Vec<u16>) {
        self.free.extend(regs);
    }

    /// Total number of registers the frame needs.
    pub fn high_water(&self) -> u16 {
        self.next
    }

    pub fn live_count(&self) -> usize {
        self.live
    }
}

/// True for nodes whose evaluation produces a value that later instructions
/// read. Aggregate-typed expressions count: they evaluate to an address.
fn produces_value(kind: &StatementKind, ty: Type) -> bool {
    if ty == Type::Void {
        return false;
    }
    matches!(
        kind,
        StatementKind::Immediate(_)
            | StatementKind::SymbolRef { .. }
            | StatementKind::Binary { .. }
            | StatementKind::Unary { .. }
            | StatementKind::Ternary { .. }
            | StatementKind::Cast { .. }
            | StatementKind::Call(_)
            | StatementKind::IntrinsicCall { .. }
            | StatementKind::Subscript { .. }
            | StatementKind::Member { .. }
            | StatementKind::MemoryRef { .. }
    )
}

/// Lower one function body, assigning registers to expression results.
/// Returns the register file size for the frame.
pub fn allocate(tree: &mut SyntaxTree, root: NodeId) -> Result<u16, Diagnostic> {
    let mut alloc = RegAllocator::new();
    assign(tree, &mut alloc, root);
    verify(tree, root)?;
    debug_assert_eq!(alloc.live_count(), 0);
    Ok(alloc.high_water())
}

fn assign(tree: &mut SyntaxTree, alloc: &mut RegAllocator, id: NodeId) {
    // Stores re-evaluate the target's base and index after the value is in
    // its register, so nothing in the value subtree may reuse a register
    // the target subtree touched.
    let assignment = match &tree.node(id).kind {
        StatementKind::Assignment { target, value, .. } => Some((*target, *value)),
        _ => None,
    };
    if let Some((target, value)) = assignment {
        assign(tree, alloc, target);
        let parked = alloc.park();
        assign(tree, alloc, value);
        alloc.unpark(parked);
        for c in [target, value] {
            if let Some(r) = tree.node(c).reg {
                alloc.release(r);
            }
        }
        tree.node_mut(id).reg = None;
        return;
    }

    let children = tree.children(id);
    for &c in &children {
        assign(tree, alloc, c);
    }
    // operands die at their consumer; the result may reuse an operand's
    // register since every instruction reads before it writes
    for &c in &children {
        if let Some(r) = tree.node(c).reg {
            alloc.release(r);
        }
    }
    let node = tree.node(id);
    let reg = if produces_value(&node.kind, node.ty) {
        Some(alloc.alloc())
    } else {
        None
    };
    tree.node_mut(id).reg = reg;
}

/// Check the lowering obligations the backend emitter relies on: every
/// reachable node typed, every value-producing node annotated.
fn verify(tree: &SyntaxTree, root: NodeId) -> Result<(), Diagnostic> {
    let node = tree.node(root);
    if node.ty == Type::Dynamic {
        return Err(Diagnostic::error(
            codes::E0601,
            node.span,
            "register lowering reached an untyped node",
        ));
    }
    if produces_value(&node.kind, node.ty) && node.reg.is_none() {
        return Err(Diagnostic::error(
            codes::E0601,
            node.span,
            "expression has no register after lowering",
        ));
    }
    for c in tree.children(root) {
        verify(tree, c)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AssignOp, BinaryOp};
    use crate::lexer::Span;
    use crate::types::ConstValue;

    fn sp() -> Span {
        Span { start: 0, end: 0 }
    }

    fn imm(tree: &mut SyntaxTree, v: i64) -> NodeId {
        let id = tree.alloc(StatementKind::Immediate(ConstValue::Int(v)), sp());
        tree.set_ty(id, Type::Int);
        id
    }

    #[test]
    fn operands_die_at_consumer() {
        let mut tree = SyntaxTree::new();
        let a = imm(&mut tree, 1);
        let b = imm(&mut tree, 2);
        let add = tree.alloc(
            StatementKind::Binary {
                op: BinaryOp::Add,
                lhs: a,
                rhs: b,
            },
            sp(),
        );
        tree.set_ty(add, Type::Int);
        let ret = tree.alloc(StatementKind::Return { value: Some(add) }, sp());
        tree.set_ty(ret, Type::Void);
        let root = tree.alloc(StatementKind::Block(vec![ret]), sp());
        tree.set_ty(root, Type::Void);

        let regs = allocate(&mut tree, root).unwrap();
        // two operands live at once, result reuses a freed register
        assert_eq!(regs, 2);
        assert!(tree.node(add).reg.is_some());
        assert!(tree.node(ret).reg.is_none());
    }

    #[test]
    fn assignment_value_register_disjoint_from_target() {
        let mut tree = SyntaxTree::new();
        let base = imm(&mut tree, 0);
        let index = imm(&mut tree, 1);
        let sub = tree.alloc(StatementKind::Subscript { base, index }, sp());
        tree.set_ty(sub, Type::Float);
        let value = imm(&mut tree, 2);
        let store = tree.alloc(
            StatementKind::Assignment {
                op: AssignOp::Set,
                target: sub,
                value,
            },
            sp(),
        );
        tree.set_ty(store, Type::Void);
        let root = tree.alloc(StatementKind::Block(vec![store]), sp());
        tree.set_ty(root, Type::Void);

        allocate(&mut tree, root).unwrap();
        // the store re-reads base and index after the value is computed
        let v = tree.node(value).reg.unwrap();
        for id in [base, index, sub] {
            assert_ne!(tree.node(id).reg.unwrap(), v);
        }
    }

    #[test]
    fn statements_release_expression_results() {
        let mut tree = SyntaxTree::new();
        let mut stmts = Vec::new();
        for i in 0..4 {
            let v = imm(&mut tree, i);
            let ret = tree.alloc(StatementKind::Return { value: Some(v) }, sp());
            tree.set_ty(ret, Type::Void);
            stmts.push(ret);
        }
        let root = tree.alloc(StatementKind::Block(stmts), sp());
        tree.set_ty(root, Type::Void);

        // sequential statements reuse the same register
        let regs = allocate(&mut tree, root).unwrap();
        assert_eq!(regs, 1);
    }

    #[test]
    fn untyped_node_fails_verification() {
        let mut tree = SyntaxTree::new();
        let bad = tree.alloc(StatementKind::Immediate(ConstValue::Int(0)), sp());
        // ty left Dynamic
        let root = tree.alloc(StatementKind::Block(vec![bad]), sp());
        tree.set_ty(root, Type::Void);
        let err = allocate(&mut tree, root).unwrap_err();
        assert_eq!(err.code, Some(codes::E0601));
    }
}
