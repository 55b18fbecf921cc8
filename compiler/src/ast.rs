// ast.rs — Arena-allocated syntax tree for SNEX compilation units
//
// Every node lives in one `SyntaxTree` arena owned by the compilation
// session; nodes reference children by `NodeId` and carry an index-based
// parent link for walk-up queries. The node kind is a closed sum type —
// passes dispatch by pattern matching, never by downcasting.
//
// Preconditions: nodes are created by the parser or by inliners.
// Postconditions: every node has a valid span; after the resolution pass
//   every reachable node has a resolved type (`Type::Dynamic` is legal only
//   before that pass completes).
// Failure modes: none (data-only module; structural helpers panic on
//   malformed ids, which indicates a compiler bug, not a user error).
// Side effects: none.

use std::fmt;

use crate::func::FunctionId;
use crate::lexer::Span;
use crate::types::{ConstValue, Type};

// ── Identifiers and paths ────────────────────────────────────────────────

/// Index of a node in the session's syntax tree arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A possibly-namespaced identifier (`wrap::fix`, `Math.sin` is parsed as a
/// member access and folded into a path by the resolver).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Path(pub Vec<String>);

impl Path {
    pub fn ident(name: impl Into<String>) -> Self {
        Path(vec![name.into()])
    }

    pub fn is_ident(&self) -> bool {
        self.0.len() == 1
    }

    pub fn last(&self) -> &str {
        self.0.last().map(|s| s.as_str()).unwrap_or("")
    }

    pub fn child(&self, name: impl Into<String>) -> Path {
        let mut parts = self.0.clone();
        parts.push(name.into());
        Path(parts)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("::"))
    }
}

// ── Syntactic type names ─────────────────────────────────────────────────

/// A compile-time constant argument as written: a literal or a name that
/// must resolve to a template parameter or global constant.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstArg {
    Literal(i64),
    Name(String),
}

/// A template argument as written in source.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateArgSyntax {
    Type(TypeName),
    Const(ConstArg),
}

/// A type as written in source, before resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeName {
    Void,
    Int,
    Float,
    Double,
    Block,
    Event,
    Span(Box<TypeName>, ConstArg),
    Named(Path, Vec<TemplateArgSyntax>),
}

// ── Operators ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    /// Comparisons and logical operators produce `int`.
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
}

// ── Resolved variable targets ────────────────────────────────────────────

/// Where a resolved variable reference lives at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarTarget {
    /// Function argument by position. For member functions index 0 is the
    /// implicit object address.
    Arg { index: u16 },
    /// Function-local stack slot.
    Local { slot: u16 },
    /// Slot offset into instance memory.
    Global { offset: usize },
    /// Slot offset relative to the implicit object argument of a member
    /// function.
    Member { offset: usize },
}

// ── Intrinsics ───────────────────────────────────────────────────────────

/// Library operations lowered directly to backend instructions instead of
/// calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intrinsic {
    /// `block.size()`
    BlockSize,
    /// `block.sub(start, len)`
    BlockSub,
    /// `ExternalData.referBlockTo(target, index)`
    ReferBlockTo,
}

// ── Call data ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Callee {
    /// Free (possibly namespaced) function.
    Path(Path),
    /// Member function on the `object` expression.
    Member(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallData {
    pub callee: Callee,
    pub object: Option<NodeId>,
    pub args: Vec<NodeId>,
    pub template_args: Vec<TemplateArgSyntax>,
    /// Set by the resolver once the call is bound to a concrete function.
    pub resolved: Option<FunctionId>,
}

// ── Node kinds ───────────────────────────────────────────────────────────

/// The closed set of syntax tree node variants.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    /// A compile-time immediate value.
    Immediate(ConstValue),
    /// A named reference; `target` is filled in by the resolver.
    SymbolRef {
        path: Path,
        target: Option<VarTarget>,
    },
    Binary {
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
    },
    Unary {
        op: UnaryOp,
        operand: NodeId,
    },
    Ternary {
        cond: NodeId,
        if_true: NodeId,
        if_false: NodeId,
    },
    Cast {
        target: TypeName,
        operand: NodeId,
    },
    Assignment {
        op: AssignOp,
        target: NodeId,
        value: NodeId,
    },
    Call(CallData),
    IntrinsicCall {
        op: Intrinsic,
        object: NodeId,
        args: Vec<NodeId>,
    },
    Return {
        value: Option<NodeId>,
    },
    If {
        cond: NodeId,
        then_body: NodeId,
        else_body: Option<NodeId>,
    },
    Loop {
        cond: NodeId,
        body: NodeId,
    },
    Subscript {
        base: NodeId,
        index: NodeId,
    },
    Member {
        base: NodeId,
        name: String,
        /// Slot offset of the member within its struct, set by the resolver.
        offset: Option<usize>,
    },
    /// A raw offset from a base object address. Synthesized by inliners;
    /// `base == None` means the implicit object argument of the enclosing
    /// member function.
    MemoryRef {
        base: Option<NodeId>,
        offset: usize,
    },
    Block(Vec<NodeId>),
    VarDecl {
        name: String,
        declared: TypeName,
        init: Option<NodeId>,
        target: Option<VarTarget>,
    },
    Noop,
}

// ── Node and tree ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: StatementKind,
    pub span: Span,
    pub ty: Type,
    pub parent: Option<NodeId>,
    /// Virtual register holding this expression's result, assigned by the
    /// register lowering pass.
    pub reg: Option<crate::regalloc::Reg>,
}

/// The arena holding every node of a compilation unit.
#[derive(Debug, Default)]
pub struct SyntaxTree {
    nodes: Vec<Node>,
}

impl SyntaxTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn alloc(&mut self, kind: StatementKind, span: Span) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            span,
            ty: Type::Dynamic,
            parent: None,
            reg: None,
        });
        self.reparent_children(id);
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn ty(&self, id: NodeId) -> Type {
        self.nodes[id.index()].ty
    }

    pub fn set_ty(&mut self, id: NodeId, ty: Type) {
        self.nodes[id.index()].ty = ty;
    }

    pub fn span(&self, id: NodeId) -> Span {
        self.nodes[id.index()].span
    }

    /// Direct children of a node, in evaluation order.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        match &self.node(id).kind {
            StatementKind::Immediate(_)
            | StatementKind::SymbolRef { .. }
            | StatementKind::Noop => Vec::new(),
            StatementKind::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            StatementKind::Unary { operand, .. } => vec![*operand],
            StatementKind::Ternary {
                cond,
                if_true,
                if_false,
            } => vec![*cond, *if_true, *if_false],
            StatementKind::Cast { operand, .. } => vec![*operand],
            StatementKind::Assignment { target, value, .. } => vec![*target, *value],
            StatementKind::Call(call) => {
                let mut out = Vec::new();
                if let Some(obj) = call.object {
                    out.push(obj);
                }
                out.extend(call.args.iter().copied());
                out
            }
            StatementKind::IntrinsicCall { object, args, .. } => {
                let mut out = vec![*object];
                out.extend(args.iter().copied());
                out
            }
            StatementKind::Return { value } => value.iter().copied().collect(),
            StatementKind::If {
                cond,
                then_body,
                else_body,
            } => {
                let mut out = vec![*cond, *then_body];
                out.extend(else_body.iter().copied());
                out
            }
            StatementKind::Loop { cond, body } => vec![*cond, *body],
            StatementKind::Subscript { base, index } => vec![*base, *index],
            StatementKind::Member { base, .. } => vec![*base],
            StatementKind::MemoryRef { base, .. } => base.iter().copied().collect(),
            StatementKind::Block(stmts) => stmts.clone(),
            StatementKind::VarDecl { init, .. } => init.iter().copied().collect(),
        }
    }

    /// Point every child's parent link at `id`.
    pub fn reparent_children(&mut self, id: NodeId) {
        for child in self.children(id) {
            self.nodes[child.index()].parent = Some(id);
        }
    }

    /// Replace `old`'s place in its parent with `new`.
    ///
    /// This is the substitution primitive used by constant folding and by
    /// high-level inliners. Returns false when `old` has no parent.
    pub fn replace_in_parent(&mut self, old: NodeId, new: NodeId) -> bool {
        let Some(parent) = self.node(old).parent else {
            return false;
        };
        let kind = &mut self.nodes[parent.index()].kind;
        replace_child(kind, old, new);
        self.nodes[new.index()].parent = Some(parent);
        true
    }

    /// Deep-copy a subtree, returning the new root. Parent links inside the
    /// copy are rebuilt; the new root starts detached.
    pub fn clone_subtree(&mut self, id: NodeId) -> NodeId {
        let children = self.children(id);
        let mut mapping = Vec::with_capacity(children.len());
        for child in children {
            mapping.push(self.clone_subtree(child));
        }
        let mut node = self.node(id).clone();
        let mut next = mapping.into_iter();
        remap_children(&mut node.kind, &mut next);
        node.parent = None;
        let new_id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        self.reparent_children(new_id);
        new_id
    }

    /// Walk up the parent chain from `id`, returning the first node for
    /// which `pred` holds.
    pub fn find_parent(&self, id: NodeId, pred: impl Fn(&Node) -> bool) -> Option<NodeId> {
        let mut cursor = self.node(id).parent;
        while let Some(p) = cursor {
            if pred(self.node(p)) {
                return Some(p);
            }
            cursor = self.node(p).parent;
        }
        None
    }
}

/// Swap one child id for another inside a node kind.
fn replace_child(kind: &mut StatementKind, old: NodeId, new: NodeId) {
    let swap = |slot: &mut NodeId| {
        if *slot == old {
            *slot = new;
        }
    };
    match kind {
        StatementKind::Immediate(_) | StatementKind::SymbolRef { .. } | StatementKind::Noop => {}
        StatementKind::Binary { lhs, rhs, .. } => {
            swap(lhs);
            swap(rhs);
        }
        StatementKind::Unary { operand, .. } => swap(operand),
        StatementKind::Ternary {
            cond,
            if_true,
            if_false,
        } => {
            swap(cond);
            swap(if_true);
            swap(if_false);
        }
        StatementKind::Cast { operand, .. } => swap(operand),
        StatementKind::Assignment { target, value, .. } => {
            swap(target);
            swap(value);
        }
        StatementKind::Call(call) => {
            if let Some(obj) = &mut call.object {
                swap(obj);
            }
            for a in &mut call.args {
                swap(a);
            }
        }
        StatementKind::IntrinsicCall { object, args, .. } => {
            swap(object);
            for a in args {
                swap(a);
            }
        }
        StatementKind::Return { value } => {
            if let Some(v) = value {
                swap(v);
            }
        }
        StatementKind::If {
            cond,
            then_body,
            else_body,
        } => {
            swap(cond);
            swap(then_body);
            if let Some(e) = else_body {
                swap(e);
            }
        }
        StatementKind::Loop { cond, body } => {
            swap(cond);
            swap(body);
        }
        StatementKind::Subscript { base, index } => {
            swap(base);
            swap(index);
        }
        StatementKind::Member { base, .. } => swap(base),
        StatementKind::MemoryRef { base, .. } => {
            if let Some(b) = base {
                swap(b);
            }
        }
        StatementKind::Block(stmts) => {
            for s in stmts {
                swap(s);
            }
        }
        StatementKind::VarDecl { init, .. } => {
            if let Some(i) = init {
                swap(i);
            }
        }
    }
}

/// Rewrite every child slot with the next id from `next`, in the same order
/// `children()` enumerates them.
fn remap_children(kind: &mut StatementKind, next: &mut impl Iterator<Item = NodeId>) {
    let mut take = |slot: &mut NodeId| {
        *slot = next.next().expect("clone_subtree: child count mismatch");
    };
    match kind {
        StatementKind::Immediate(_) | StatementKind::SymbolRef { .. } | StatementKind::Noop => {}
        StatementKind::Binary { lhs, rhs, .. } => {
            take(lhs);
            take(rhs);
        }
        StatementKind::Unary { operand, .. } => take(operand),
        StatementKind::Ternary {
            cond,
            if_true,
            if_false,
        } => {
            take(cond);
            take(if_true);
            take(if_false);
        }
        StatementKind::Cast { operand, .. } => take(operand),
        StatementKind::Assignment { target, value, .. } => {
            take(target);
            take(value);
        }
        StatementKind::Call(call) => {
            if let Some(obj) = &mut call.object {
                take(obj);
            }
            for a in &mut call.args {
                take(a);
            }
        }
        StatementKind::IntrinsicCall { object, args, .. } => {
            take(object);
            for a in args {
                take(a);
            }
        }
        StatementKind::Return { value } => {
            if let Some(v) = value {
                take(v);
            }
        }
        StatementKind::If {
            cond,
            then_body,
            else_body,
        } => {
            take(cond);
            take(then_body);
            if let Some(e) = else_body {
                take(e);
            }
        }
        StatementKind::Loop { cond, body } => {
            take(cond);
            take(body);
        }
        StatementKind::Subscript { base, index } => {
            take(base);
            take(index);
        }
        StatementKind::Member { base, .. } => take(base),
        StatementKind::MemoryRef { base, .. } => {
            if let Some(b) = base {
                take(b);
            }
        }
        StatementKind::Block(stmts) => {
            for s in stmts {
                take(s);
            }
        }
        StatementKind::VarDecl { init, .. } => {
            if let Some(i) = init {
                take(i);
            }
        }
    }
}

// ── Top-level items ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ParamDef {
    pub name: String,
    pub ty: TypeName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateParamKind {
    Type,
    Int,
}

#[derive(Debug, Clone)]
pub struct TemplateParamDef {
    pub name: String,
    pub kind: TemplateParamKind,
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    pub ret: TypeName,
    pub params: Vec<ParamDef>,
    pub template_params: Vec<TemplateParamDef>,
    pub body: NodeId,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct MemberVarDef {
    pub name: String,
    pub ty: TypeName,
    pub init: Option<NodeId>,
    /// True for brace-fill initializers (`span<float, 19> data = { 182.0f };`).
    pub braced: bool,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct StructDef {
    pub name: String,
    pub vars: Vec<MemberVarDef>,
    pub funcs: Vec<FunctionDef>,
    /// True when the body contains a `DECLARE_NODE(Name);` marker.
    pub is_node: bool,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct TemplateStructDef {
    pub params: Vec<TemplateParamDef>,
    pub def: StructDef,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum GlobalInit {
    None,
    Expr(NodeId),
    /// `= { a, b, ... }`
    Braced(Vec<NodeId>),
}

#[derive(Debug, Clone)]
pub struct GlobalDef {
    pub name: String,
    pub ty: TypeName,
    pub init: GlobalInit,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum Item {
    Global(GlobalDef),
    Struct(StructDef),
    Function(FunctionDef),
    TemplateStruct(TemplateStructDef),
}

/// Parser output: the arena plus the top-level item list referencing it.
#[derive(Debug)]
pub struct ParsedUnit {
    pub tree: SyntaxTree,
    pub items: Vec<Item>,
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sp() -> Span {
        Span { start: 0, end: 0 }
    }

    #[test]
    fn alloc_sets_parent_links() {
        let mut tree = SyntaxTree::new();
        let a = tree.alloc(StatementKind::Immediate(ConstValue::Int(1)), sp());
        let b = tree.alloc(StatementKind::Immediate(ConstValue::Int(2)), sp());
        let add = tree.alloc(
            StatementKind::Binary {
                op: BinaryOp::Add,
                lhs: a,
                rhs: b,
            },
            sp(),
        );
        assert_eq!(tree.node(a).parent, Some(add));
        assert_eq!(tree.node(b).parent, Some(add));
        assert_eq!(tree.node(add).parent, None);
    }

    #[test]
    fn replace_in_parent_swaps_child() {
        let mut tree = SyntaxTree::new();
        let a = tree.alloc(StatementKind::Immediate(ConstValue::Int(1)), sp());
        let b = tree.alloc(StatementKind::Immediate(ConstValue::Int(2)), sp());
        let add = tree.alloc(
            StatementKind::Binary {
                op: BinaryOp::Add,
                lhs: a,
                rhs: b,
            },
            sp(),
        );
        let folded = tree.alloc(StatementKind::Immediate(ConstValue::Int(3)), sp());
        assert!(tree.replace_in_parent(a, folded));
        assert_eq!(tree.children(add), vec![folded, b]);
        assert_eq!(tree.node(folded).parent, Some(add));
    }

    #[test]
    fn replace_root_returns_false() {
        let mut tree = SyntaxTree::new();
        let a = tree.alloc(StatementKind::Noop, sp());
        let b = tree.alloc(StatementKind::Noop, sp());
        assert!(!tree.replace_in_parent(a, b));
    }

    #[test]
    fn clone_subtree_is_deep() {
        let mut tree = SyntaxTree::new();
        let a = tree.alloc(StatementKind::Immediate(ConstValue::Int(1)), sp());
        let b = tree.alloc(StatementKind::Immediate(ConstValue::Int(2)), sp());
        let add = tree.alloc(
            StatementKind::Binary {
                op: BinaryOp::Add,
                lhs: a,
                rhs: b,
            },
            sp(),
        );
        let copy = tree.clone_subtree(add);
        assert_ne!(copy, add);
        let copy_children = tree.children(copy);
        assert_eq!(copy_children.len(), 2);
        assert_ne!(copy_children[0], a);
        // mutating the copy leaves the original intact
        let replacement = tree.alloc(StatementKind::Immediate(ConstValue::Int(9)), sp());
        tree.replace_in_parent(copy_children[0], replacement);
        assert_eq!(tree.children(add), vec![a, b]);
    }

    #[test]
    fn find_parent_walks_up() {
        let mut tree = SyntaxTree::new();
        let inner = tree.alloc(StatementKind::Immediate(ConstValue::Int(1)), sp());
        let ret = tree.alloc(StatementKind::Return { value: Some(inner) }, sp());
        let block = tree.alloc(StatementKind::Block(vec![ret]), sp());
        let found = tree.find_parent(inner, |n| matches!(n.kind, StatementKind::Block(_)));
        assert_eq!(found, Some(block));
    }
}
