// pass.rs — Pass descriptor module: metadata, dependency resolution, artifact IDs
//
// Declares the compiler's 4 passes (IR loading is outside the runner), their
// dependency edges, and the artifacts they produce. Used by the pipeline
// runner to compute minimal pass subsets for each --emit target.

use std::collections::HashSet;
use std::fmt;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each compiler pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Expand,
    BuildAffine,
    BuildGuards,
    Simulate,
}

/// Machine-readable artifact identifiers. Each maps to a concrete type
/// in the compilation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Expansion,  // Expansion
    Evaluator,  // ExprEvaluator
    Affine,     // AffineSystem
    Initial,    // Array1<Complex64>
    Phasor,     // PhasorSystem
    Trajectory, // Trajectory
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a compiler pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// What invalidates this pass's output.
    pub invalidation_key: &'static str,
    /// Pre/post conditions (documentation only).
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Expand => PassDescriptor {
            name: "expand",
            inputs: &[],
            outputs: &[ArtifactId::Expansion, ArtifactId::Evaluator],
            invalidation_key: "program + params + lengths",
            invariants: "no loop remains, op ids in expansion order",
        },
        PassId::BuildAffine => PassDescriptor {
            name: "build_affine",
            inputs: &[PassId::Expand],
            outputs: &[ArtifactId::Affine, ArtifactId::Initial],
            invalidation_key: "expansion + params",
            invariants: "uniform block dimension, block-diagonal M_global",
        },
        PassId::BuildGuards => PassDescriptor {
            name: "build_guards",
            inputs: &[PassId::BuildAffine],
            outputs: &[ArtifactId::Phasor],
            invalidation_key: "expansion + affine + params",
            invariants: "every guard row spans total_dim",
        },
        PassId::Simulate => PassDescriptor {
            name: "simulate",
            inputs: &[PassId::BuildGuards],
            outputs: &[ArtifactId::Trajectory],
            invalidation_key: "phasor + simulation config",
            invariants: "final_step equals trajectory length",
        },
    }
}

impl PassId {
    pub fn name(self) -> &'static str {
        descriptor(self).name
    }
}

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All 4 pass IDs in declaration order (used for iteration).
pub const ALL_PASSES: [PassId; 4] = [
    PassId::Expand,
    PassId::BuildAffine,
    PassId::BuildGuards,
    PassId::Simulate,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────
