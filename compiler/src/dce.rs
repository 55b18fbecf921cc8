// dce.rs — Noop elimination pass
//
// After folding, statement positions can hold expressions with no side
// effects (a folded immediate, a bare symbol read). This pass marks them as
// noops and then drops noops from every statement block, so register
// lowering and codegen never see dead statement roots.
//
// Preconditions: the tree is resolved and folded.
// Postconditions: no block contains a noop or a side-effect-free statement.
// Failure modes: none.
// Side effects: tree mutation only.

use crate::ast::{NodeId, StatementKind, SyntaxTree};

/// True when evaluating the node cannot be observed: no calls, no stores.
fn is_pure(tree: &SyntaxTree, id: NodeId) -> bool {
    match &tree.node(id).kind {
        StatementKind::Immediate(_)
        | StatementKind::SymbolRef { .. }
        | StatementKind::Noop => true,
        StatementKind::Binary { .. }
        | StatementKind::Unary { .. }
        | StatementKind::Ternary { .. }
        | StatementKind::Cast { .. }
        | StatementKind::Subscript { .. }
        | StatementKind::Member { .. }
        | StatementKind::MemoryRef { .. } => {
            tree.children(id).iter().all(|&c| is_pure(tree, c))
        }
        _ => false,
    }
}

/// Eliminate dead statements under `root`. Returns the number removed.
pub fn run(tree: &mut SyntaxTree, root: NodeId) -> usize {
    let mut removed = 0;
    visit(tree, root, &mut removed);
    removed
}

fn visit(tree: &mut SyntaxTree, id: NodeId, removed: &mut usize) {
    for child in tree.children(id) {
        visit(tree, child, removed);
    }
    if let StatementKind::Block(stmts) = &tree.node(id).kind {
        let before = stmts.len();
        let kept: Vec<NodeId> = stmts
            .iter()
            .copied()
            .filter(|&s| !is_pure(tree, s))
            .collect();
        *removed += before - kept.len();
        tree.node_mut(id).kind = StatementKind::Block(kept);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AssignOp, BinaryOp, Path};
    use crate::lexer::Span;
    use crate::types::ConstValue;

    fn sp() -> Span {
        Span { start: 0, end: 0 }
    }

    #[test]
    fn drops_folded_immediates_from_blocks() {
        let mut tree = SyntaxTree::new();
        let dead = tree.alloc(StatementKind::Immediate(ConstValue::Int(42)), sp());
        let target = tree.alloc(
            StatementKind::SymbolRef {
                path: Path::ident("x"),
                target: None,
            },
            sp(),
        );
        let value = tree.alloc(StatementKind::Immediate(ConstValue::Int(1)), sp());
        let live = tree.alloc(
            StatementKind::Assignment {
                op: AssignOp::Set,
                target,
                value,
            },
            sp(),
        );
        let block = tree.alloc(StatementKind::Block(vec![dead, live]), sp());

        assert_eq!(run(&mut tree, block), 1);
        assert_eq!(tree.node(block).kind, StatementKind::Block(vec![live]));
    }

    #[test]
    fn pure_arithmetic_statement_is_dead() {
        let mut tree = SyntaxTree::new();
        let a = tree.alloc(StatementKind::Immediate(ConstValue::Int(1)), sp());
        let b = tree.alloc(
            StatementKind::SymbolRef {
                path: Path::ident("y"),
                target: None,
            },
            sp(),
        );
        let add = tree.alloc(
            StatementKind::Binary {
                op: BinaryOp::Add,
                lhs: a,
                rhs: b,
            },
            sp(),
        );
        let block = tree.alloc(StatementKind::Block(vec![add]), sp());
        assert_eq!(run(&mut tree, block), 1);
        assert_eq!(tree.node(block).kind, StatementKind::Block(vec![]));
    }

    #[test]
    fn calls_are_kept() {
        let mut tree = SyntaxTree::new();
        let call = tree.alloc(
            StatementKind::Call(crate::ast::CallData {
                callee: crate::ast::Callee::Path(Path::ident("f")),
                object: None,
                args: vec![],
                template_args: vec![],
                resolved: None,
            }),
            sp(),
        );
        let block = tree.alloc(StatementKind::Block(vec![call]), sp());
        assert_eq!(run(&mut tree, block), 0);
        assert_eq!(tree.node(block).kind, StatementKind::Block(vec![call]));
    }

    #[test]
    fn nested_blocks_cleaned() {
        let mut tree = SyntaxTree::new();
        let dead = tree.alloc(StatementKind::Immediate(ConstValue::Int(0)), sp());
        let inner = tree.alloc(StatementKind::Block(vec![dead]), sp());
        let outer = tree.alloc(StatementKind::Block(vec![inner]), sp());
        run(&mut tree, outer);
        assert_eq!(tree.node(inner).kind, StatementKind::Block(vec![]));
    }
}
