// session.rs — Compilation session and pass driver
//
// One session per compile request. The session owns every table the passes
// share (tree, types, functions, templates, globals, layout) and runs the
// pipeline in the order `pass::required_passes` dictates, timing each pass.
// A successful compile yields a `JitObject`: the compiled program, its bound
// callback collection and the source digest it was built from.
//
// Preconditions: one session compiles one source text, once.
// Postconditions: on success every function with a body has been folded,
//   pruned, register-annotated and emitted; on failure the error names the
//   pass that rejected the unit.
// Failure modes: `CompileError` carrying the failing pass and diagnostics.
// Side effects: none outside the session.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use crate::ast::{Item, SyntaxTree};
use crate::backend::{CompiledProgram, LayoutBuilder, NativeFunction};
use crate::diag::Diagnostic;
use crate::func::{FunctionId, FunctionTable};
use crate::lexer::Span;
use crate::object::CallbackCollection;
use crate::pass::{required_passes, PassId};
use crate::registry::{self, Library};
use crate::resolve::Resolver;
use crate::scope::{GlobalSymbols, TemplateStore};
use crate::types::TypeTable;
use crate::{codegen, dce, fold, parser, regalloc};

// ── Compile results ──────────────────────────────────────────────────────

/// Wall-clock time spent in one pass.
#[derive(Debug, Clone, Copy)]
pub struct PassTiming {
    pub pass: PassId,
    pub duration: Duration,
}

/// A failed compile: which pass rejected the unit and why.
#[derive(Debug, serde::Serialize)]
pub struct CompileError {
    pub failing_pass: PassId,
    pub diagnostics: Vec<Diagnostic>,
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed", self.failing_pass)?;
        for d in &self.diagnostics {
            write!(f, "\n{d}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileError {}

/// The output of one successful compile. Immutable once built; hot reload
/// replaces the whole object rather than mutating it.
#[derive(Debug)]
pub struct JitObject {
    pub program: Arc<CompiledProgram>,
    pub collection: CallbackCollection,
    /// SHA-256 of the source text this object was compiled from.
    pub provenance: String,
}

impl JitObject {
    pub fn new_instance(&self) -> crate::backend::Instance {
        self.program.new_instance()
    }

    /// Bind an arbitrary entry point (callbacks go through `collection`).
    pub fn entry(&self, name: &str) -> Option<NativeFunction> {
        NativeFunction::bind(&self.program, name)
    }
}

/// Digest used as the compilation change key.
pub fn source_digest(source: &str) -> String {
    format!("{:x}", Sha256::digest(source.as_bytes()))
}

// ── Session ──────────────────────────────────────────────────────────────

/// Owns all shared state of one compile request. No globals: every cache
/// (template instances, struct table, function table) lives here and dies
/// with the session.
pub struct CompilationSession {
    source: String,
    tree: SyntaxTree,
    types: TypeTable,
    funcs: FunctionTable,
    templates: TemplateStore,
    globals: GlobalSymbols,
    layout: LayoutBuilder,
    library: Library,
    items: Vec<Item>,
    program: Option<Arc<CompiledProgram>>,
    timings: Vec<PassTiming>,
    done: Vec<PassId>,
}

impl CompilationSession {
    pub fn new(source: impl Into<String>) -> Self {
        let mut types = TypeTable::new();
        let mut funcs = FunctionTable::new();
        let mut templates = TemplateStore::new();
        let mut globals = GlobalSymbols::new();
        let library = registry::install(&mut types, &mut funcs, &mut templates, &mut globals);
        Self {
            source: source.into(),
            tree: SyntaxTree::new(),
            types,
            funcs,
            templates,
            globals,
            layout: LayoutBuilder::new(),
            library,
            items: Vec::new(),
            program: None,
            timings: Vec::new(),
            done: Vec::new(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn tree(&self) -> &SyntaxTree {
        &self.tree
    }

    pub fn timings(&self) -> &[PassTiming] {
        &self.timings
    }

    fn unit_span(&self) -> Span {
        Span {
            start: 0,
            end: self.source.len(),
        }
    }

    /// Run every pass up to and including `target`, dependencies first.
    /// Passes already run are skipped.
    pub fn run_to(&mut self, target: PassId) -> Result<(), CompileError> {
        for pass in required_passes(target) {
            if self.done.contains(&pass) {
                continue;
            }
            let start = Instant::now();
            self.run_pass(pass).map_err(|d| CompileError {
                failing_pass: pass,
                diagnostics: vec![d],
            })?;
            self.timings.push(PassTiming {
                pass,
                duration: start.elapsed(),
            });
            self.done.push(pass);
        }
        Ok(())
    }

    /// Front half of the pipeline: parse and resolve, no code emitted.
    pub fn analyze(&mut self) -> Result<(), CompileError> {
        self.run_to(PassId::Resolve)
    }

    /// Run the full pipeline and bind the result.
    pub fn compile(&mut self) -> Result<JitObject, CompileError> {
        self.run_to(PassId::Codegen)?;
        // run_to(Codegen) always leaves a program behind
        let program = self.program.clone().ok_or_else(|| CompileError {
            failing_pass: PassId::Codegen,
            diagnostics: vec![Diagnostic::new(
                crate::diag::DiagLevel::Error,
                self.unit_span(),
                "code generation produced no program",
            )],
        })?;
        let collection = CallbackCollection::from_program(&program);
        Ok(JitObject {
            program,
            collection,
            provenance: source_digest(&self.source),
        })
    }

    fn run_pass(&mut self, pass: PassId) -> Result<(), Diagnostic> {
        match pass {
            PassId::Parse => {
                let unit = parser::parse_unit(&self.source)?;
                self.tree = unit.tree;
                self.items = unit.items;
                Ok(())
            }
            PassId::Resolve => {
                let mut r = Resolver::new(
                    &mut self.tree,
                    &mut self.types,
                    &mut self.funcs,
                    &mut self.templates,
                    &mut self.globals,
                    &mut self.layout,
                    &self.library.well_known,
                );
                r.run(&self.items)
            }
            PassId::FoldConstants => {
                for id in self.function_ids() {
                    if let Some(root) = self.body_root(id) {
                        fold::run(&mut self.tree, root);
                    }
                }
                Ok(())
            }
            PassId::EliminateNoops => {
                for id in self.function_ids() {
                    if let Some(root) = self.body_root(id) {
                        dce::run(&mut self.tree, root);
                    }
                }
                Ok(())
            }
            PassId::AllocateRegisters => {
                for id in self.function_ids() {
                    let Some(root) = self.body_root(id) else {
                        continue;
                    };
                    let regs = regalloc::allocate(&mut self.tree, root)?;
                    if let Some(b) = self.funcs.get_mut(id).body.as_mut() {
                        b.num_regs = regs;
                    }
                }
                Ok(())
            }
            PassId::Codegen => {
                let layout = std::mem::take(&mut self.layout).finish();
                let (program, _) = codegen::run(
                    &self.tree,
                    &self.types,
                    &self.funcs,
                    layout,
                    &self.library.natives,
                    self.unit_span(),
                )?;
                self.program = Some(Arc::new(program));
                Ok(())
            }
        }
    }

    fn function_ids(&self) -> Vec<FunctionId> {
        self.funcs.ids().collect()
    }

    fn body_root(&self, id: FunctionId) -> Option<crate::ast::NodeId> {
        self.funcs.get(id).body.as_ref().map(|b| b.root)
    }
}

/// Compile one source text end to end.
pub fn compile(source: &str) -> Result<JitObject, CompileError> {
    CompilationSession::new(source).compile()
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ExtArg;

    #[test]
    fn scalar_function_compiles_and_runs() {
        let obj = compile("int main(int input){ return input + 7; }").unwrap();
        let main = obj.entry("main").unwrap();
        let mut inst = obj.new_instance();
        let out = main.call(&mut inst, &mut [ExtArg::Int(12)]);
        assert_eq!(out.as_i64(), 19);
    }

    #[test]
    fn syntax_error_names_the_parse_pass() {
        let err = compile("int main( {").unwrap_err();
        assert_eq!(err.failing_pass, PassId::Parse);
        assert!(!err.diagnostics.is_empty());
    }

    #[test]
    fn unresolved_symbol_names_the_resolve_pass() {
        let err = compile("int main(int x){ return nope(x); }").unwrap_err();
        assert_eq!(err.failing_pass, PassId::Resolve);
    }

    #[test]
    fn timings_cover_every_pass_in_order() {
        let mut s = CompilationSession::new("int f(){ return 1; }");
        s.compile().unwrap();
        let order: Vec<PassId> = s.timings().iter().map(|t| t.pass).collect();
        assert_eq!(order, required_passes(PassId::Codegen));
    }

    #[test]
    fn provenance_tracks_source_text() {
        let a = compile("int f(){ return 1; }").unwrap();
        let b = compile("int f(){ return 1; }").unwrap();
        let c = compile("int f(){ return 2; }").unwrap();
        assert_eq!(a.provenance, b.provenance);
        assert_ne!(a.provenance, c.provenance);
    }

    #[test]
    fn analyze_stops_before_codegen() {
        let mut s = CompilationSession::new("int f(){ return 1; }");
        s.analyze().unwrap();
        let ran: Vec<PassId> = s.timings().iter().map(|t| t.pass).collect();
        assert_eq!(ran, vec![PassId::Parse, PassId::Resolve]);
    }
}
