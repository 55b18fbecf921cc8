// object.rs — Callback collection and compiled-object lifecycle
//
// Binds the standard callback entry points out of a compiled program and
// precomputes the best callback per processing granularity. A callback is
// bound only when the program defines it with the exact ABI signature;
// anything else is left unbound so the render side can tell "missing"
// from "wrong shape" at bind time instead of faulting mid-render.
//
// Preconditions: the program passed in came out of a successful compile.
// Postconditions: best-callback selection is fixed at construction and
//   never changes for the lifetime of the collection.
// Failure modes: none (binding is best-effort; lookups return Option).
// Side effects: none.

use std::sync::Arc;

use crate::backend::{CompiledProgram, NativeFunction};
use crate::types::Type;

// ── Callback kinds ───────────────────────────────────────────────────────

/// The fixed set of entry points a compiled object can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    /// `process(block)` over a whole channel block.
    Channel,
    /// `processFrame(block)` over one sample per channel.
    Frame,
    /// `processSample(float) -> float`.
    Sample,
    Prepare,
    Reset,
    Event,
    SetParameter,
}

impl CallbackKind {
    pub const ALL: [CallbackKind; 7] = [
        CallbackKind::Channel,
        CallbackKind::Frame,
        CallbackKind::Sample,
        CallbackKind::Prepare,
        CallbackKind::Reset,
        CallbackKind::Event,
        CallbackKind::SetParameter,
    ];

    /// Entry-point name in the compiled program.
    pub fn entry_name(self) -> &'static str {
        match self {
            CallbackKind::Channel => "process",
            CallbackKind::Frame => "processFrame",
            CallbackKind::Sample => "processSample",
            CallbackKind::Prepare => "prepare",
            CallbackKind::Reset => "reset",
            CallbackKind::Event => "handleEvent",
            CallbackKind::SetParameter => "setParameter",
        }
    }

    /// Required ABI signature, return type first.
    fn signature(self) -> (Type, &'static [Type]) {
        match self {
            CallbackKind::Channel => (Type::Void, &[Type::Block]),
            CallbackKind::Frame => (Type::Void, &[Type::Block]),
            CallbackKind::Sample => (Type::Float, &[Type::Float]),
            CallbackKind::Prepare => (Type::Void, &[Type::Double, Type::Int, Type::Int]),
            CallbackKind::Reset => (Type::Void, &[]),
            CallbackKind::Event => (Type::Void, &[Type::Event]),
            CallbackKind::SetParameter => (Type::Void, &[Type::Int, Type::Double]),
        }
    }

    fn index(self) -> usize {
        match self {
            CallbackKind::Channel => 0,
            CallbackKind::Frame => 1,
            CallbackKind::Sample => 2,
            CallbackKind::Prepare => 3,
            CallbackKind::Reset => 4,
            CallbackKind::Event => 5,
            CallbackKind::SetParameter => 6,
        }
    }
}

/// The granularity the host renders at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessType {
    BlockProcessing,
    FrameProcessing,
}

/// Preference order per granularity. Block processing amortizes call
/// overhead, so the block callback wins when the source defines several.
const BLOCK_PREFERENCE: [CallbackKind; 3] =
    [CallbackKind::Channel, CallbackKind::Frame, CallbackKind::Sample];
const FRAME_PREFERENCE: [CallbackKind; 3] =
    [CallbackKind::Frame, CallbackKind::Sample, CallbackKind::Channel];

// ── Callback collection ──────────────────────────────────────────────────

/// The runtime-facing record of one successful compile: bound entry points
/// plus the precomputed best callback per granularity. Replaced wholesale
/// on recompilation, never mutated.
#[derive(Debug)]
pub struct CallbackCollection {
    callbacks: [Option<NativeFunction>; 7],
    best_block: Option<CallbackKind>,
    best_frame: Option<CallbackKind>,
}

impl CallbackCollection {
    pub fn from_program(program: &Arc<CompiledProgram>) -> Self {
        let mut callbacks: [Option<NativeFunction>; 7] = Default::default();
        for kind in CallbackKind::ALL {
            callbacks[kind.index()] = bind_checked(program, kind);
        }
        let best_block = first_bound(&callbacks, &BLOCK_PREFERENCE);
        let best_frame = first_bound(&callbacks, &FRAME_PREFERENCE);
        Self {
            callbacks,
            best_block,
            best_frame,
        }
    }

    pub fn get(&self, kind: CallbackKind) -> Option<&NativeFunction> {
        self.callbacks[kind.index()].as_ref()
    }

    /// The callback kind selected for the given granularity.
    pub fn best_kind(&self, pt: ProcessType) -> Option<CallbackKind> {
        match pt {
            ProcessType::BlockProcessing => self.best_block,
            ProcessType::FrameProcessing => self.best_frame,
        }
    }

    pub fn best(&self, pt: ProcessType) -> Option<&NativeFunction> {
        self.best_kind(pt).and_then(|k| self.get(k))
    }
}

/// Bind one entry point, rejecting signature mismatches.
fn bind_checked(program: &Arc<CompiledProgram>, kind: CallbackKind) -> Option<NativeFunction> {
    let f = NativeFunction::bind(program, kind.entry_name())?;
    let (ret, args) = kind.signature();
    if f.ret != ret || f.arg_types != args {
        return None;
    }
    Some(f)
}

fn first_bound(
    callbacks: &[Option<NativeFunction>; 7],
    order: &[CallbackKind; 3],
) -> Option<CallbackKind> {
    order
        .iter()
        .copied()
        .find(|k| callbacks[k.index()].is_some())
}

// ── Lifecycle ────────────────────────────────────────────────────────────

/// State machine per compiled unit. A failed compile returns to the
/// previous state's observable behavior: the last Ready object stays in
/// service and only replacement is blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileState {
    Uninitialized,
    Compiling,
    Ready,
    /// Source text changed since the Ready object was produced.
    Stale,
}

// ── Tests ────────────────────────────────────────────────────────────────
