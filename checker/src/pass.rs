// pass.rs — Pass descriptor module: metadata, dependency edges, ordering
//
// Declares the validator's built-in passes, their prerequisite edges and
// whether each is structural. The engine uses these edges to decide which
// passes may still run after a failure.
//
// Structural passes build the artifacts every later pass reads; a failure
// there makes dependent results meaningless. Semantic passes only read
// artifacts and never gate one another.

use std::fmt;

// ── Pass identifiers ───────────────────────────────────────────────────────

/// Identifies a checking pass. Open-ended so callers can plug in their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(pub &'static str);

impl PassId {
    pub const HEADER: PassId = PassId("header");
    pub const LAYOUT: PassId = PassId("layout");
    pub const IDS: PassId = PassId("ids");
    pub const LOGICAL_LAYOUT: PassId = PassId("logical_layout");
    pub const ID_REFS: PassId = PassId("id_refs");
    pub const TYPES: PassId = PassId("types");
    pub const ENTRY_POINTS: PassId = PassId("entry_points");
    pub const CONTROL_FLOW: PassId = PassId("control_flow");

    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a checking pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassDescriptor {
    pub id: PassId,
    /// Passes whose success this pass requires.
    pub inputs: &'static [PassId],
    /// Structural passes gate their dependents; semantic passes gate nothing.
    pub structural: bool,
}

/// Return the static descriptor for a built-in pass.
pub fn descriptor(id: PassId) -> Option<PassDescriptor> {
    let desc = match id {
        PassId::HEADER => PassDescriptor {
            id,
            inputs: &[],
            structural: true,
        },
        PassId::LAYOUT => PassDescriptor {
            id,
            inputs: &[PassId::HEADER],
            structural: true,
        },
        PassId::IDS => PassDescriptor {
            id,
            inputs: &[PassId::LAYOUT],
            structural: true,
        },
        PassId::LOGICAL_LAYOUT => PassDescriptor {
            id,
            inputs: &[PassId::LAYOUT],
            structural: false,
        },
        PassId::ID_REFS => PassDescriptor {
            id,
            inputs: &[PassId::IDS],
            structural: false,
        },
        PassId::TYPES => PassDescriptor {
            id,
            inputs: &[PassId::IDS],
            structural: false,
        },
        PassId::ENTRY_POINTS => PassDescriptor {
            id,
            inputs: &[PassId::IDS],
            structural: false,
        },
        PassId::CONTROL_FLOW => PassDescriptor {
            id,
            inputs: &[PassId::LAYOUT],
            structural: false,
        },
        _ => return None,
    };
    Some(desc)
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All built-in pass IDs in declaration (execution) order.
pub const ALL_PASSES: [PassId; 8] = [
    PassId::HEADER,
    PassId::LAYOUT,
    PassId::IDS,
    PassId::LOGICAL_LAYOUT,
    PassId::ID_REFS,
    PassId::TYPES,
    PassId::ENTRY_POINTS,
    PassId::CONTROL_FLOW,
];

/// Whether any pass in `remaining` depends on `failed`, directly or through
/// another remaining pass.
///
/// In a list accepted by `check_order`, every transitive dependent sits
/// behind a direct one, so direct edges are enough.
pub fn has_dependents(remaining: &[PassDescriptor], failed: PassId) -> bool {
    remaining.iter().any(|desc| desc.inputs.contains(&failed))
}

// ── Ordering checks ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PassOrderError {
    #[error("pass `{0}` is listed more than once")]
    Duplicate(PassId),
    #[error("pass `{pass}` requires `{input}`, which is listed after it")]
    InputAfter { pass: PassId, input: PassId },
    #[error("pass `{pass}` requires semantic pass `{input}`; only structural passes may be prerequisites")]
    SemanticInput { pass: PassId, input: PassId },
}

/// Check that a pass list is usable: unique ids, no prerequisite listed after
/// the pass that needs it, and only structural passes used as prerequisites.
///
/// A prerequisite missing from the list altogether is allowed; the engine
/// treats it as unmet when the dependent pass comes up.
pub fn check_order(passes: &[PassDescriptor]) -> Result<(), PassOrderError> {
    for (i, desc) in passes.iter().enumerate() {
        if passes[..i].iter().any(|d| d.id == desc.id) {
            return Err(PassOrderError::Duplicate(desc.id));
        }
        for &input in desc.inputs {
            if passes[i..].iter().any(|d| d.id == input) {
                return Err(PassOrderError::InputAfter {
                    pass: desc.id,
                    input,
                });
            }
            if let Some(dep) = passes[..i].iter().find(|d| d.id == input) {
                if !dep.structural {
                    return Err(PassOrderError::SemanticInput {
                        pass: desc.id,
                        input,
                    });
                }
            }
        }
    }
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────
