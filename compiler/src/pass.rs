// pass.rs — Pipeline pass identities and dependency resolution
//
// Each stage of the pipeline is a named pass with explicit dependencies.
// `required_passes` expands a target into the full ordered list to run, so
// the session never executes a pass before its prerequisites.
//
// Preconditions: the dependency graph is a DAG (fixed at compile time).
// Postconditions: the returned order satisfies every dependency edge.
// Failure modes: none.
// Side effects: none.

use serde::Serialize;

/// Identity of one pipeline pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PassId {
    Parse,
    Resolve,
    FoldConstants,
    EliminateNoops,
    AllocateRegisters,
    Codegen,
}

impl std::fmt::Display for PassId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.descriptor().name)
    }
}

/// Static description of a pass.
pub struct PassDescriptor {
    pub id: PassId,
    pub name: &'static str,
    pub deps: &'static [PassId],
}

/// All passes, in declaration order.
pub const PASSES: &[PassDescriptor] = &[
    PassDescriptor {
        id: PassId::Parse,
        name: "parse",
        deps: &[],
    },
    PassDescriptor {
        id: PassId::Resolve,
        name: "resolve",
        deps: &[PassId::Parse],
    },
    PassDescriptor {
        id: PassId::FoldConstants,
        name: "fold-constants",
        deps: &[PassId::Resolve],
    },
    PassDescriptor {
        id: PassId::EliminateNoops,
        name: "eliminate-noops",
        deps: &[PassId::FoldConstants],
    },
    PassDescriptor {
        id: PassId::AllocateRegisters,
        name: "allocate-registers",
        deps: &[PassId::EliminateNoops],
    },
    PassDescriptor {
        id: PassId::Codegen,
        name: "codegen",
        deps: &[PassId::AllocateRegisters],
    },
];

impl PassId {
    pub fn descriptor(&self) -> &'static PassDescriptor {
        PASSES.iter().find(|d| d.id == *self).unwrap()
    }
}

/// Expand a target pass into the ordered list of passes to run, dependencies
/// first, each pass exactly once.
pub fn required_passes(target: PassId) -> Vec<PassId> {
    let mut out = Vec::new();
    fn visit(id: PassId, out: &mut Vec<PassId>) {
        if out.contains(&id) {
            return;
        }
        for &dep in id.descriptor().deps {
            visit(dep, out);
        }
        out.push(id);
    }
    visit(target, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_pipeline_order() {
        assert_eq!(
            required_passes(PassId::Codegen),
            vec![
                PassId::Parse,
                PassId::Resolve,
                PassId::FoldConstants,
                PassId::EliminateNoops,
                PassId::AllocateRegisters,
                PassId::Codegen,
            ]
        );
    }

    #[test]
    fn partial_target() {
        assert_eq!(
            required_passes(PassId::FoldConstants),
            vec![PassId::Parse, PassId::Resolve, PassId::FoldConstants]
        );
    }

    #[test]
    fn deps_precede_dependents() {
        let order = required_passes(PassId::Codegen);
        for d in PASSES {
            let Some(at) = order.iter().position(|p| *p == d.id) else {
                continue;
            };
            for dep in d.deps {
                assert!(order.iter().position(|p| p == dep).unwrap() < at);
            }
        }
    }
}
