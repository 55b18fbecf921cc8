// snexc — SNEX compiler
//
// Library root. The pipeline runs lexer → parser → resolve → fold → dce →
// regalloc → codegen under a per-request `CompilationSession`; `reload`
// layers the hot-swap controller on top of the session.

pub mod ast;
pub mod backend;
pub mod codegen;
pub mod dce;
pub mod diag;
pub mod eval;
pub mod fold;
pub mod func;
pub mod inline;
pub mod lexer;
pub mod object;
pub mod parser;
pub mod pass;
pub mod regalloc;
pub mod registry;
pub mod reload;
pub mod resolve;
pub mod scope;
pub mod session;
pub mod types;
pub mod wrap;

pub use session::{compile, CompilationSession, CompileError, JitObject};
