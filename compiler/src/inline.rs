// inline.rs — Inliner framework
//
// A function may carry an inliner instead of (or in addition to) a body.
// High-level inliners run during resolution: they are handed the call site
// as tree context and return a replacement fragment, which then flows
// through the remaining passes like hand-written code. Assembly-level
// inliners run during code generation: they receive the already-evaluated
// argument registers and rewrite the call through `backend::ArgSplice`,
// the only path that converts function handles into callable arguments.
//
// Preconditions: high-level inliners run on call sites whose arguments are
//   parsed but not necessarily typed; assembly inliners run after lowering.
// Postconditions: inlining is behavior-preserving; it only removes call
//   overhead.
// Failure modes: inliner errors are E05xx diagnostics carrying the call
//   site's span.
// Side effects: tree mutation (high-level) or instruction emission
//   (assembly).

use std::collections::HashMap;
use std::sync::Arc;

use crate::ast::{CallData, Callee, NodeId, StatementKind, SyntaxTree};
use crate::backend::{ArgSplice, FuncIndex};
use crate::diag::{codes, Diagnostic};
use crate::func::FunctionId;
use crate::lexer::Span;
use crate::scope::TemplateArg;
use crate::types::{Type, TypeTable};

// ── High-level inlining ──────────────────────────────────────────────────

/// Call-site context handed to a high-level inliner.
pub struct InlineData<'a> {
    pub tree: &'a mut SyntaxTree,
    pub types: &'a TypeTable,
    /// The object expression for member calls.
    pub object: Option<NodeId>,
    pub args: Vec<NodeId>,
    /// Template arguments active at the call site.
    pub template_args: Vec<TemplateArg>,
    pub location: Span,
}

pub type HighLevelFn =
    Arc<dyn Fn(&mut InlineData<'_>) -> Result<NodeId, Diagnostic> + Send + Sync>;

// ── Assembly-level inlining ──────────────────────────────────────────────

/// Call-site context handed to an assembly-level inliner. Consumed by the
/// inliner: the splice is the call site.
pub struct AsmInlineData<'e> {
    pub splice: ArgSplice<'e>,
    /// Mapping from compile-table ids to backend entry points, valid for
    /// the program being emitted.
    pub func_indices: &'e HashMap<FunctionId, FuncIndex>,
    pub location: Span,
}

impl AsmInlineData<'_> {
    /// Resolve a function-table id to its backend index.
    pub fn func_index(&self, f: FunctionId) -> Result<FuncIndex, Diagnostic> {
        self.func_indices.get(&f).copied().ok_or_else(|| {
            Diagnostic::error(
                codes::E0600,
                self.location,
                "call target was never emitted by the backend",
            )
        })
    }
}

pub type AsmFn = Arc<dyn Fn(AsmInlineData<'_>) -> Result<(), Diagnostic> + Send + Sync>;

/// The two inliner kinds.
#[derive(Clone)]
pub enum Inliner {
    HighLevel(HighLevelFn),
    Assembly(AsmFn),
}

impl std::fmt::Debug for Inliner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Inliner::HighLevel(_) => write!(f, "Inliner::HighLevel"),
            Inliner::Assembly(_) => write!(f, "Inliner::Assembly"),
        }
    }
}

// ── Fragment-building helpers ────────────────────────────────────────────

/// Build a typed memory reference at `offset` slots from `base` (`None`
/// means the implicit object argument of the enclosing member function).
pub fn member_ref(
    tree: &mut SyntaxTree,
    base: Option<NodeId>,
    offset: usize,
    ty: Type,
    span: Span,
) -> NodeId {
    let id = tree.alloc(StatementKind::MemoryRef { base, offset }, span);
    tree.set_ty(id, ty);
    id
}

/// Build a call to an already-resolved function against a member object at
/// `obj_offset` slots inside the call site's object, forwarding the call
/// site's arguments unchanged. The returned node is re-resolved by the
/// caller's pass, which types it and inserts argument casts.
pub fn forward_call(
    d: &mut InlineData<'_>,
    inner: FunctionId,
    obj_offset: usize,
    obj_ty: Type,
) -> NodeId {
    let object = member_ref(d.tree, d.object, obj_offset, obj_ty, d.location);
    d.tree.alloc(
        StatementKind::Call(CallData {
            callee: Callee::Member(String::new()),
            object: Some(object),
            args: d.args.clone(),
            template_args: Vec::new(),
            resolved: Some(inner),
        }),
        d.location,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConstValue;

    fn sp() -> Span {
        Span { start: 0, end: 0 }
    }

    #[test]
    fn forward_call_wraps_object_in_memory_ref() {
        let mut tree = SyntaxTree::new();
        let types = TypeTable::new();
        let obj = tree.alloc(
            StatementKind::SymbolRef {
                path: crate::ast::Path::ident("n"),
                target: None,
            },
            sp(),
        );
        let arg = tree.alloc(StatementKind::Immediate(ConstValue::Int(1)), sp());

        let mut d = InlineData {
            tree: &mut tree,
            types: &types,
            object: Some(obj),
            args: vec![arg],
            template_args: Vec::new(),
            location: sp(),
        };
        let call = forward_call(&mut d, FunctionId(7), 2, Type::Int);

        let StatementKind::Call(c) = &tree.node(call).kind else {
            panic!("expected call");
        };
        assert_eq!(c.resolved, Some(FunctionId(7)));
        assert_eq!(c.args, vec![arg]);
        let StatementKind::MemoryRef { base, offset } = tree.node(c.object.unwrap()).kind else {
            panic!("expected memory ref");
        };
        assert_eq!(base, Some(obj));
        assert_eq!(offset, 2);
    }

    #[test]
    fn missing_func_index_is_codegen_error() {
        let map = HashMap::new();
        let mut em = crate::backend::Emitter::new("f", Type::Void, vec![], 0, 0);
        let d = AsmInlineData {
            splice: ArgSplice::new(&mut em, None, vec![]),
            func_indices: &map,
            location: sp(),
        };
        let err = d.func_index(FunctionId(0)).unwrap_err();
        assert_eq!(err.code, Some(codes::E0600));
    }
}
