// func.rs — Function table
//
// Central registry of every callable entity in a compilation session: user
// functions, struct member functions (including compiler-synthesized ones),
// template member functions and their cached instances, native library
// functions and raw-emitted backend routines.
//
// Preconditions: ids are only meaningful within the owning session.
// Postconditions: a function is resolved iff it has a concrete signature and
//   exactly one implementation source (body, native, inliner or raw emit).
// Failure modes: overload selection reports no-match / ambiguity; the caller
//   turns those into diagnostics with call-site spans.
// Side effects: none outside the table itself.

use std::collections::HashMap;

use crate::ast::{FunctionDef, NodeId, TemplateParamDef};
use crate::backend::{EmitFn, NativeId};
use crate::inline::Inliner;
use crate::lexer::Span;
use crate::types::{can_implicitly_convert, StructId, Type};

/// Index of a function in the session's function table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub u32);

/// One declared argument of a function.
#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub name: String,
    pub ty: Type,
}

/// A resolved function body: the tree root plus frame sizing filled in by
/// the lowering passes.
#[derive(Debug, Clone)]
pub struct FunctionBody {
    pub root: NodeId,
    pub local_slots: u16,
    pub num_regs: u16,
}

/// Everything the compiler knows about one callable.
pub struct FunctionData {
    /// Fully qualified display name (e.g. `wrap::fix<2, Gain>::process`).
    pub qualified: String,
    pub name: String,
    pub ret: Type,
    /// For member functions, index 0 is the implicit object argument.
    pub args: Vec<Arg>,
    pub template_params: Vec<TemplateParamDef>,
    /// Unsubstituted definition, kept for template member functions so
    /// instances can be cloned from it.
    pub generic: Option<FunctionDef>,
    pub body: Option<FunctionBody>,
    pub native: Option<NativeId>,
    pub inliner: Option<Inliner>,
    /// Routine whose instructions are produced directly against the backend
    /// emitter instead of being lowered from a tree.
    pub emit: Option<EmitFn>,
    pub object_type: Option<StructId>,
    pub span: Span,
}

impl FunctionData {
    pub fn new(qualified: impl Into<String>, name: impl Into<String>, span: Span) -> Self {
        Self {
            qualified: qualified.into(),
            name: name.into(),
            ret: Type::Dynamic,
            args: Vec::new(),
            template_params: Vec::new(),
            generic: None,
            body: None,
            native: None,
            inliner: None,
            emit: None,
            object_type: None,
            span,
        }
    }

    pub fn is_template(&self) -> bool {
        !self.template_params.is_empty()
    }

    /// A function is resolved iff its signature is concrete and it has an
    /// implementation. Unresolved functions must fail compilation, never
    /// silently no-op.
    pub fn is_resolved(&self) -> bool {
        !self.is_template()
            && self.ret.is_resolved()
            && self.args.iter().all(|a| a.ty.is_resolved())
            && (self.body.is_some()
                || self.native.is_some()
                || self.inliner.is_some()
                || self.emit.is_some())
    }

    /// Declared arguments excluding the implicit object argument.
    pub fn explicit_args(&self) -> &[Arg] {
        if self.object_type.is_some() && !self.args.is_empty() {
            &self.args[1..]
        } else {
            &self.args
        }
    }
}

impl std::fmt::Debug for FunctionData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionData")
            .field("qualified", &self.qualified)
            .field("ret", &self.ret)
            .field("args", &self.args)
            .field("has_body", &self.body.is_some())
            .field("has_native", &self.native.is_some())
            .field("has_inliner", &self.inliner.is_some())
            .field("has_emit", &self.emit.is_some())
            .finish()
    }
}

// ── Overload selection ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverloadError {
    NoMatch,
    Ambiguous,
}

/// Conversion cost of one argument list against a signature: 0 per exact
/// match, 1 per widening conversion, no match otherwise.
fn conversion_cost(params: &[Arg], args: &[Type]) -> Option<u32> {
    if params.len() != args.len() {
        return None;
    }
    let mut cost = 0;
    for (p, a) in params.iter().zip(args) {
        if p.ty == *a {
            continue;
        }
        if can_implicitly_convert(*a, p.ty) {
            cost += 1;
        } else {
            return None;
        }
    }
    Some(cost)
}

// ── Function table ───────────────────────────────────────────────────────

/// Session-owned table of all functions, plus the template-instance cache
/// for member function templates keyed by their integer argument lists.
#[derive(Debug, Default)]
pub struct FunctionTable {
    funcs: Vec<FunctionData>,
    instance_cache: HashMap<(FunctionId, Vec<i64>), FunctionId>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, data: FunctionData) -> FunctionId {
        let id = FunctionId(self.funcs.len() as u32);
        self.funcs.push(data);
        id
    }

    pub fn get(&self, id: FunctionId) -> &FunctionData {
        &self.funcs[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: FunctionId) -> &mut FunctionData {
        &mut self.funcs[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = FunctionId> {
        (0..self.funcs.len() as u32).map(FunctionId)
    }

    /// Select the best overload for the given explicit argument types.
    /// Exact matches beat widening matches; an unresolvable tie is an
    /// ambiguity error.
    pub fn pick_overload(
        &self,
        candidates: &[FunctionId],
        args: &[Type],
    ) -> Result<FunctionId, OverloadError> {
        let mut best: Option<(u32, FunctionId)> = None;
        let mut tied = false;
        for &id in candidates {
            let f = self.get(id);
            if f.is_template() {
                continue;
            }
            let Some(cost) = conversion_cost(f.explicit_args(), args) else {
                continue;
            };
            match best {
                Some((c, _)) if cost > c => {}
                Some((c, _)) if cost == c => tied = true,
                _ => {
                    best = Some((cost, id));
                    tied = false;
                }
            }
        }
        match best {
            Some((_, id)) if !tied => Ok(id),
            Some(_) => Err(OverloadError::Ambiguous),
            None => Err(OverloadError::NoMatch),
        }
    }

    pub fn cached_instance(&self, base: FunctionId, key: &[i64]) -> Option<FunctionId> {
        self.instance_cache.get(&(base, key.to_vec())).copied()
    }

    pub fn cache_instance(&mut self, base: FunctionId, key: Vec<i64>, instance: FunctionId) {
        self.instance_cache.insert((base, key), instance);
    }
}
