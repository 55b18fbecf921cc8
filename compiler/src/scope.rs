// scope.rs — Lexical scopes, namespaced symbols and the template store
//
// Symbol lookup walks a chain of nested scopes (block → function → class →
// global); namespaced entities (`wrap::fix`, `Math::sin`) live in a flat
// path map keyed by the joined path. Template entries are stored once and
// instantiated on demand; instances are cached by their full ordered
// argument list, and an in-flight stack catches self-instantiation cycles
// before they recurse.
//
// Preconditions: none.
// Postconditions: shadowing is strictly lexical — an inner definition hides
//   outer symbols of the same name.
// Failure modes: lookups return Option; cycle entry returns an error the
//   resolver turns into E0301.
// Side effects: none outside the owned tables.

use std::collections::{HashMap, HashSet};

use crate::ast::{TemplateParamDef, TemplateStructDef, VarTarget};
use crate::func::FunctionId;
use crate::types::{ConstValue, StructId, Type};

// ── Symbols ──────────────────────────────────────────────────────────────

/// What a name resolves to.
#[derive(Debug, Clone)]
pub enum SymbolEntry {
    Var(VarTarget, Type),
    /// A compile-time constant (template int parameter, global constant).
    Const(ConstValue),
    /// An overload set.
    Functions(Vec<FunctionId>),
    Template(TemplateId),
    TypeSym(Type),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Global,
    Class(StructId),
    Function,
    Block,
}

#[derive(Debug)]
struct Scope {
    kind: ScopeKind,
    symbols: HashMap<String, SymbolEntry>,
}

/// The active scope chain during resolution of one function body.
#[derive(Debug, Default)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
    next_local: u16,
    max_locals: u16,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: ScopeKind) {
        self.scopes.push(Scope {
            kind,
            symbols: HashMap::new(),
        });
    }

    pub fn pop(&mut self) {
        self.scopes.pop();
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Define a symbol in the innermost scope, shadowing outer entries.
    pub fn define(&mut self, name: impl Into<String>, entry: SymbolEntry) {
        if let Some(s) = self.scopes.last_mut() {
            s.symbols.insert(name.into(), entry);
        }
    }

    /// Look a name up, innermost scope first.
    pub fn lookup(&self, name: &str) -> Option<&SymbolEntry> {
        self.scopes
            .iter()
            .rev()
            .find_map(|s| s.symbols.get(name))
    }

    /// The class whose member function body is being resolved, if any.
    pub fn current_class(&self) -> Option<StructId> {
        self.scopes.iter().rev().find_map(|s| match s.kind {
            ScopeKind::Class(id) => Some(id),
            _ => None,
        })
    }

    /// Claim the next local slot for the current function frame.
    pub fn alloc_local(&mut self) -> u16 {
        let slot = self.next_local;
        self.next_local += 1;
        self.max_locals = self.max_locals.max(self.next_local);
        slot
    }

    /// Start a fresh frame; returns nothing, read `max_locals` after the
    /// body is done.
    pub fn reset_locals(&mut self) {
        self.next_local = 0;
        self.max_locals = 0;
    }

    pub fn max_locals(&self) -> u16 {
        self.max_locals
    }
}

// ── Global path map ──────────────────────────────────────────────────────

/// Flat map of fully qualified names (`Math::sin`, `wrap::fix`) plus the
/// set of known namespace prefixes, so `Math.sin(x)` can be folded into a
/// path call.
#[derive(Debug, Default)]
pub struct GlobalSymbols {
    map: HashMap<String, SymbolEntry>,
    namespaces: HashSet<String>,
}

impl GlobalSymbols {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, path: &str, entry: SymbolEntry) {
        self.register_prefixes(path);
        self.map.insert(path.to_string(), entry);
    }

    /// Add a function to the overload set at `path`.
    pub fn add_function(&mut self, path: &str, id: FunctionId) {
        self.register_prefixes(path);
        match self.map.get_mut(path) {
            Some(SymbolEntry::Functions(set)) => set.push(id),
            _ => {
                self.map
                    .insert(path.to_string(), SymbolEntry::Functions(vec![id]));
            }
        }
    }

    pub fn lookup(&self, path: &str) -> Option<&SymbolEntry> {
        self.map.get(path)
    }

    pub fn is_namespace(&self, name: &str) -> bool {
        self.namespaces.contains(name)
    }

    fn register_prefixes(&mut self, path: &str) {
        let parts: Vec<&str> = path.split("::").collect();
        for i in 1..parts.len() {
            self.namespaces.insert(parts[..i].join("::"));
        }
    }
}

// ── Templates ────────────────────────────────────────────────────────────

/// Index of a registered template entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TemplateId(pub u32);

/// A concrete template argument. Instances are keyed by the full ordered
/// argument list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TemplateArg {
    Type(Type),
    Const(i64),
}

/// Library templates whose instantiation is performed by the wrap library
/// instead of cloning a user definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinTemplate {
    WrapFix,
    WrapFrame,
    WrapFixBlock,
    WrapMod,
    WrapEvent,
    WrapData,
    DataEmbeddedTable,
}

#[derive(Debug, Clone)]
pub enum TemplateKind {
    User(TemplateStructDef),
    Builtin(BuiltinTemplate),
}

#[derive(Debug, Clone)]
pub struct TemplateEntry {
    /// Qualified name as registered (`wrap::fix`).
    pub name: String,
    pub params: Vec<TemplateParamDef>,
    pub kind: TemplateKind,
}

/// Session-owned template registry, instance cache and cycle guard.
#[derive(Debug, Default)]
pub struct TemplateStore {
    entries: Vec<TemplateEntry>,
    cache: HashMap<(TemplateId, Vec<TemplateArg>), StructId>,
    in_flight: Vec<(TemplateId, Vec<TemplateArg>)>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, entry: TemplateEntry) -> TemplateId {
        let id = TemplateId(self.entries.len() as u32);
        self.entries.push(entry);
        id
    }

    pub fn get(&self, id: TemplateId) -> &TemplateEntry {
        &self.entries[id.0 as usize]
    }

    pub fn cached(&self, id: TemplateId, args: &[TemplateArg]) -> Option<StructId> {
        self.cache.get(&(id, args.to_vec())).copied()
    }

    pub fn insert_cache(&mut self, id: TemplateId, args: Vec<TemplateArg>, sid: StructId) {
        self.cache.insert((id, args), sid);
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Mark an instantiation as in progress. `Err` means this exact
    /// instantiation is already on the stack — a cycle.
    pub fn enter(&mut self, id: TemplateId, args: &[TemplateArg]) -> Result<(), ()> {
        let key = (id, args.to_vec());
        if self.in_flight.contains(&key) {
            return Err(());
        }
        self.in_flight.push(key);
        Ok(())
    }

    pub fn exit(&mut self, id: TemplateId, args: &[TemplateArg]) {
        let key = (id, args.to_vec());
        if let Some(p) = self.in_flight.iter().rposition(|k| *k == key) {
            self.in_flight.remove(p);
        }
    }

    /// The chain of instantiations currently in progress, for cycle
    /// diagnostics.
    pub fn in_flight_names(&self) -> Vec<String> {
        self.in_flight
            .iter()
            .map(|(id, _)| self.get(*id).name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::VarTarget;

    #[test]
    fn inner_scope_shadows_outer() {
        let mut s = ScopeStack::new();
        s.push(ScopeKind::Function);
        s.define("x", SymbolEntry::Var(VarTarget::Local { slot: 0 }, Type::Int));
        s.push(ScopeKind::Block);
        s.define("x", SymbolEntry::Var(VarTarget::Local { slot: 1 }, Type::Float));

        match s.lookup("x") {
            Some(SymbolEntry::Var(VarTarget::Local { slot: 1 }, Type::Float)) => {}
            other => panic!("wrong entry: {other:?}"),
        }
        s.pop();
        match s.lookup("x") {
            Some(SymbolEntry::Var(VarTarget::Local { slot: 0 }, Type::Int)) => {}
            other => panic!("wrong entry: {other:?}"),
        }
    }

    #[test]
    fn local_slots_and_high_water() {
        let mut s = ScopeStack::new();
        s.reset_locals();
        assert_eq!(s.alloc_local(), 0);
        assert_eq!(s.alloc_local(), 1);
        assert_eq!(s.max_locals(), 2);
        s.reset_locals();
        assert_eq!(s.alloc_local(), 0);
    }

    #[test]
    fn namespace_prefixes_registered() {
        let mut g = GlobalSymbols::new();
        g.add_function("Math::sin", FunctionId(0));
        g.define("data::embedded::table", SymbolEntry::Template(TemplateId(0)));
        assert!(g.is_namespace("Math"));
        assert!(g.is_namespace("data"));
        assert!(g.is_namespace("data::embedded"));
        assert!(!g.is_namespace("sin"));
    }

    #[test]
    fn overload_sets_accumulate() {
        let mut g = GlobalSymbols::new();
        g.add_function("Math::abs", FunctionId(1));
        g.add_function("Math::abs", FunctionId(2));
        match g.lookup("Math::abs") {
            Some(SymbolEntry::Functions(set)) => {
                assert_eq!(set, &[FunctionId(1), FunctionId(2)])
            }
            other => panic!("wrong entry: {other:?}"),
        }
    }

    #[test]
    fn template_cache_keyed_by_full_args() {
        let mut t = TemplateStore::new();
        let id = t.add(TemplateEntry {
            name: "wrap::fix".into(),
            params: Vec::new(),
            kind: TemplateKind::Builtin(BuiltinTemplate::WrapFix),
        });
        let a1 = vec![TemplateArg::Const(2), TemplateArg::Type(Type::Int)];
        let a2 = vec![TemplateArg::Const(4), TemplateArg::Type(Type::Int)];
        t.insert_cache(id, a1.clone(), StructId(10));
        assert_eq!(t.cached(id, &a1), Some(StructId(10)));
        assert_eq!(t.cached(id, &a2), None);
    }

    #[test]
    fn cycle_detected_on_reentry() {
        let mut t = TemplateStore::new();
        let id = t.add(TemplateEntry {
            name: "A".into(),
            params: Vec::new(),
            kind: TemplateKind::Builtin(BuiltinTemplate::WrapFix),
        });
        let args = vec![TemplateArg::Const(1)];
        assert!(t.enter(id, &args).is_ok());
        assert!(t.enter(id, &args).is_err());
        t.exit(id, &args);
        assert!(t.enter(id, &args).is_ok());
    }
}
