// fold.rs — Constant folding pass
//
// Folds constant subexpressions in place after resolution. Arithmetic goes
// through `eval`, the same helpers the backend machine uses, so folding
// never changes observable results. Nodes are rewritten in place (the node
// id stays valid) so function roots and parent links survive the pass.
// Running the pass twice yields no further rewrites.
//
// Preconditions: the tree is resolved; binary operands share a type.
// Postconditions: no expression whose operands are all immediates remains
//   unfolded, except int division by zero which the runtime defines.
// Failure modes: none.
// Side effects: tree mutation only.

use crate::ast::{NodeId, StatementKind, SyntaxTree};
use crate::eval;
use crate::types::ConstValue;

/// Fold one function body. Returns the number of nodes rewritten.
pub fn run(tree: &mut SyntaxTree, root: NodeId) -> usize {
    fold_node(tree, root)
}

fn immediate(tree: &SyntaxTree, id: NodeId) -> Option<ConstValue> {
    match &tree.node(id).kind {
        StatementKind::Immediate(cv) => Some(*cv),
        _ => None,
    }
}

fn fold_node(tree: &mut SyntaxTree, id: NodeId) -> usize {
    let mut count = 0;
    for child in tree.children(id) {
        count += fold_node(tree, child);
    }
    match tree.node(id).kind.clone() {
        StatementKind::Binary { op, lhs, rhs } => {
            let (Some(a), Some(b)) = (immediate(tree, lhs), immediate(tree, rhs)) else {
                return count;
            };
            if let Some(v) = eval::binary(op, a, b) {
                let ty = v.type_of();
                tree.node_mut(id).kind = StatementKind::Immediate(v);
                tree.set_ty(id, ty);
                count += 1;
            }
        }
        StatementKind::Unary { op, operand } => {
            let Some(a) = immediate(tree, operand) else {
                return count;
            };
            if let Some(v) = eval::unary(op, a) {
                let ty = v.type_of();
                tree.node_mut(id).kind = StatementKind::Immediate(v);
                tree.set_ty(id, ty);
                count += 1;
            }
        }
        StatementKind::Cast { operand, .. } => {
            let Some(a) = immediate(tree, operand) else {
                return count;
            };
            let to = tree.ty(id);
            if let Some(v) = eval::cast(a, to) {
                tree.node_mut(id).kind = StatementKind::Immediate(v);
                count += 1;
            }
        }
        StatementKind::Ternary {
            cond,
            if_true,
            if_false,
        } => {
            let Some(c) = immediate(tree, cond) else {
                return count;
            };
            let taken = if c.as_i64() != 0 { if_true } else { if_false };
            let kind = tree.node(taken).kind.clone();
            let ty = tree.ty(taken);
            tree.node_mut(id).kind = kind;
            tree.set_ty(id, ty);
            tree.reparent_children(id);
            count += 1;
        }
        _ => {}
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, TypeName, UnaryOp};
    use crate::lexer::Span;
    use crate::types::Type;

    fn sp() -> Span {
        Span { start: 0, end: 0 }
    }

    fn imm(tree: &mut SyntaxTree, v: i64) -> NodeId {
        let id = tree.alloc(StatementKind::Immediate(ConstValue::Int(v)), sp());
        tree.set_ty(id, Type::Int);
        id
    }

    #[test]
    fn folds_nested_arithmetic() {
        let mut tree = SyntaxTree::new();
        let a = imm(&mut tree, 2);
        let b = imm(&mut tree, 3);
        let mul = tree.alloc(
            StatementKind::Binary {
                op: BinaryOp::Mul,
                lhs: a,
                rhs: b,
            },
            sp(),
        );
        tree.set_ty(mul, Type::Int);
        let c = imm(&mut tree, 4);
        let add = tree.alloc(
            StatementKind::Binary {
                op: BinaryOp::Add,
                lhs: mul,
                rhs: c,
            },
            sp(),
        );
        tree.set_ty(add, Type::Int);

        assert_eq!(run(&mut tree, add), 2);
        assert_eq!(
            tree.node(add).kind,
            StatementKind::Immediate(ConstValue::Int(10))
        );
    }

    #[test]
    fn idempotent() {
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
        assert_eq!(run(&mut tree, add), 1);
        assert_eq!(run(&mut tree, add), 0);
    }

    #[test]
    fn int_div_by_zero_survives_to_runtime() {
        let mut tree = SyntaxTree::new();
        let a = imm(&mut tree, 7);
        let b = imm(&mut tree, 0);
        let div = tree.alloc(
            StatementKind::Binary {
                op: BinaryOp::Div,
                lhs: a,
                rhs: b,
            },
            sp(),
        );
        tree.set_ty(div, Type::Int);
        assert_eq!(run(&mut tree, div), 0);
        assert!(matches!(tree.node(div).kind, StatementKind::Binary { .. }));
    }

    #[test]
    fn const_ternary_selects_branch() {
        let mut tree = SyntaxTree::new();
        let cond = imm(&mut tree, 1);
        let t = imm(&mut tree, 10);
        let f = imm(&mut tree, 20);
        let tern = tree.alloc(
            StatementKind::Ternary {
                cond,
                if_true: t,
                if_false: f,
            },
            sp(),
        );
        tree.set_ty(tern, Type::Int);
        run(&mut tree, tern);
        assert_eq!(
            tree.node(tern).kind,
            StatementKind::Immediate(ConstValue::Int(10))
        );
    }

    #[test]
    fn cast_of_immediate_folds() {
        let mut tree = SyntaxTree::new();
        let v = imm(&mut tree, 3);
        let cast = tree.alloc(
            StatementKind::Cast {
                target: TypeName::Float,
                operand: v,
            },
            sp(),
        );
        tree.set_ty(cast, Type::Float);
        run(&mut tree, cast);
        assert_eq!(
            tree.node(cast).kind,
            StatementKind::Immediate(ConstValue::Float(3.0))
        );
    }

    #[test]
    fn negation_folds() {
        let mut tree = SyntaxTree::new();
        let v = imm(&mut tree, 5);
        let neg = tree.alloc(
            StatementKind::Unary {
                op: UnaryOp::Neg,
                operand: v,
            },
            sp(),
        );
        tree.set_ty(neg, Type::Int);
        run(&mut tree, neg);
        assert_eq!(
            tree.node(neg).kind,
            StatementKind::Immediate(ConstValue::Int(-5))
        );
    }
}
