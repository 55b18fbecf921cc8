// reload.rs — Hot-reload controller
//
// Bridges the edit thread and the render thread. Edits land in a pending
// slot under a mutex; compilation runs with no lock held; the finished
// object is published through an atomic pointer swap so render-side reads
// never block. When edits arrive faster than compiles finish, intermediate
// texts are superseded but the final edit is always compiled.
//
// Preconditions: `recompile_now` is driven from one thread at a time (the
//   edit/update thread); readers may be on any thread.
// Postconditions: after `recompile_now` returns, every edit submitted
//   before the call has been compiled or superseded by a later edit.
// Failure modes: a failed compile leaves the previous object in service and
//   parks the error for inspection.
// Side effects: publishes objects visible to concurrent readers.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;

use crate::backend::Instance;
use crate::object::CompileState;
use crate::session::{self, CompileError, JitObject};

// ── Recompile controller ─────────────────────────────────────────────────

struct ControllerInner {
    state: CompileState,
    /// Latest submitted source, not yet compiled. Overwritten by newer
    /// edits; only the newest text is ever compiled.
    pending: Option<String>,
    last_error: Option<CompileError>,
}

/// Owns the render-visible object pointer and the edit queue.
pub struct RecompileController {
    current: ArcSwapOption<JitObject>,
    inner: Mutex<ControllerInner>,
}

impl Default for RecompileController {
    fn default() -> Self {
        Self::new()
    }
}

impl RecompileController {
    pub fn new() -> Self {
        Self {
            current: ArcSwapOption::empty(),
            inner: Mutex::new(ControllerInner {
                state: CompileState::Uninitialized,
                pending: None,
                last_error: None,
            }),
        }
    }

    /// Submit new source text. Supersedes any pending edit.
    pub fn set_source(&self, source: impl Into<String>) {
        let mut inner = self.inner.lock();
        inner.pending = Some(source.into());
        if inner.state == CompileState::Ready {
            inner.state = CompileState::Stale;
        }
    }

    /// The object the render thread should use right now. Lock-free.
    pub fn current(&self) -> Option<Arc<JitObject>> {
        self.current.load_full()
    }

    pub fn state(&self) -> CompileState {
        self.inner.lock().state
    }

    /// The error from the most recent failed compile, if any.
    pub fn take_error(&self) -> Option<CompileError> {
        self.inner.lock().last_error.take()
    }

    /// Drain the pending queue, compiling until no newer edit remains.
    /// Compilation itself runs with no lock held.
    pub fn recompile_now(&self) {
        loop {
            let source = {
                let mut inner = self.inner.lock();
                let Some(s) = inner.pending.take() else {
                    return;
                };
                inner.state = CompileState::Compiling;
                s
            };

            // unchanged text keeps the installed object
            let digest = session::source_digest(&source);
            let unchanged = self
                .current()
                .map(|cur| cur.provenance == digest)
                .unwrap_or(false);

            let result = if unchanged {
                None
            } else {
                Some(session::compile(&source))
            };

            let mut inner = self.inner.lock();
            match result {
                None => inner.state = CompileState::Ready,
                Some(Ok(obj)) => {
                    self.current.store(Some(Arc::new(obj)));
                    inner.last_error = None;
                    inner.state = CompileState::Ready;
                }
                Some(Err(e)) => {
                    inner.last_error = Some(e);
                    inner.state = if self.current.load().is_some() {
                        CompileState::Ready
                    } else {
                        CompileState::Uninitialized
                    };
                }
            }
            if inner.pending.is_some() {
                inner.state = CompileState::Stale;
                continue;
            }
            return;
        }
    }
}

// ── Polyphonic voices ────────────────────────────────────────────────────

/// One published generation of voice state: the object and every voice
/// instance built from its layout. Voices are swapped as a group so no
/// render call ever sees instances from two different compiles.
pub struct VoiceGroup {
    pub object: Arc<JitObject>,
    voices: Vec<Mutex<Instance>>,
}

impl VoiceGroup {
    pub fn num_voices(&self) -> usize {
        self.voices.len()
    }

    pub fn voice(&self, index: usize) -> &Mutex<Instance> {
        &self.voices[index]
    }
}

/// Holds the current voice group behind an atomic pointer.
pub struct PolyVoiceSet {
    num_voices: usize,
    group: ArcSwapOption<VoiceGroup>,
}

impl PolyVoiceSet {
    pub fn new(num_voices: usize) -> Self {
        Self {
            num_voices,
            group: ArcSwapOption::empty(),
        }
    }

    /// Build fresh instances for every voice and publish them together.
    pub fn install(&self, object: Arc<JitObject>) {
        let voices = (0..self.num_voices)
            .map(|_| Mutex::new(object.new_instance()))
            .collect();
        self.group.store(Some(Arc::new(VoiceGroup { object, voices })));
    }

    pub fn group(&self) -> Option<Arc<VoiceGroup>> {
        self.group.load_full()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────
