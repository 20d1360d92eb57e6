// pipeline.rs — Compilation state and pass orchestration
//
// Holds all pass artifacts and runs the minimal set of passes for a given
// terminal PassId.
//
// Preconditions: program, parameters, and loop lengths are set before calling
//   run_pipeline.
// Postconditions: all artifacts for required passes are populated, or has_error
//   is set and the failing pass is reported.
// Failure modes: the first `BuildError` or `SimulationError` of any pass.
// Side effects: calls on_pass_complete callback after each pass for immediate
//   display; emits `tracing` debug events with per-pass timing.

use std::time::{Duration, Instant};

use ndarray::Array1;
use num_complex::Complex64;
use thiserror::Error;

use crate::affine::{build_affine, AffineSystem};
use crate::diag::{BuildError, DiagLevel, Diagnostic};
use crate::eval::ExprEvaluator;
use crate::expand::{expand, Expansion};
use crate::guard::build_guards;
use crate::ir::{LengthTable, ParamTable, Program};
use crate::pass::{required_passes, PassId};
use crate::phasor::{initial_state, PhasorSystem};
use crate::simulate::{simulate, SimulationConfig, SimulationError, Trajectory};

// ── Options ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Omit non-affine guard conditions with a W0301 warning instead of failing.
    pub allow_unsupported_guards: bool,
    /// Build blocks on the rayon pool.
    pub parallel: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            allow_unsupported_guards: false,
            parallel: true,
        }
    }
}

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata for reproducible builds and cache-key use.
///
/// `input_hash`: SHA-256 of the canonical compact JSON of program,
/// parameters, and loop lengths.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub input_hash: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    /// Hex string of the input hash (64 characters).
    pub fn input_hash_hex(&self) -> String {
        bytes_to_hex(&self.input_hash)
    }

    /// Serialize provenance as a JSON string for `--emit build-info`.
    pub fn to_json(&self) -> String {
        format!(
            "{{\n  \"input_hash\": \"{}\",\n  \"compiler_version\": \"{}\"\n}}\n",
            self.input_hash_hex(),
            self.compiler_version,
        )
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

/// Compute provenance from the build inputs.
///
/// Parameter and length tables keep insertion order, so the same input files
/// always produce the same canonical JSON.
pub fn compute_provenance(
    program: &Program,
    params: &ParamTable,
    lengths: &LengthTable,
) -> Provenance {
    use sha2::{Digest, Sha256};

    let canonical = serde_json::to_string(&(program, params, lengths)).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let result = hasher.finalize();
    let mut input_hash = [0u8; 32];
    input_hash.copy_from_slice(&result);

    Provenance {
        input_hash,
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── Artifact storage ───────────────────────────────────────────────────────

/// Holds all compilation artifacts and accumulated diagnostics.
pub struct CompilationState {
    pub program: Program,
    pub params: ParamTable,
    pub lengths: LengthTable,
    pub expansion: Option<Expansion>,
    pub evaluator: Option<ExprEvaluator>,
    pub affine: Option<AffineSystem>,
    pub initial: Option<Array1<Complex64>>,
    pub phasor: Option<PhasorSystem>,
    pub trajectory: Option<Trajectory>,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub provenance: Option<Provenance>,
}

impl CompilationState {
    pub fn new(program: Program, params: ParamTable, lengths: LengthTable) -> Self {
        Self {
            program,
            params,
            lengths,
            expansion: None,
            evaluator: None,
            affine: None,
            initial: None,
            phasor: None,
            trajectory: None,
            diagnostics: Vec::new(),
            has_error: false,
            provenance: None,
        }
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PassFailure {
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
    #[error("required artifact `{0}` was not produced")]
    MissingArtifact(&'static str),
}

impl PassFailure {
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            PassFailure::Build(err) => err.to_diagnostic(),
            other => Diagnostic::new(DiagLevel::Error, other.to_string()),
        }
    }
}

/// Pipeline execution failed in one pass. The error-level diagnostic is
/// also available in `CompilationState.diagnostics`.
#[derive(Debug, Error)]
#[error("pass `{failing_pass}` failed: {cause}")]
pub struct PipelineError {
    /// The pass that produced the error.
    pub failing_pass: PassId,
    #[source]
    pub cause: PassFailure,
}

fn missing(pass: PassId, artifact: &'static str) -> PipelineError {
    PipelineError {
        failing_pass: pass,
        cause: PassFailure::MissingArtifact(artifact),
    }
}

// ── Per-pass bookkeeping ───────────────────────────────────────────────────

/// Per-pass post-processing: callback, accumulate, timing, error check.
fn finish_pass<T>(
    state: &mut CompilationState,
    pass_id: PassId,
    outcome: Result<(T, Vec<Diagnostic>), PassFailure>,
    elapsed: Duration,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<T, PipelineError> {
    tracing::debug!(
        pass = %pass_id,
        elapsed_ms = elapsed.as_secs_f64() * 1000.0,
        "pass complete"
    );
    match outcome {
        Ok((value, diags)) => {
            on_pass_complete(pass_id, &diags);
            state.diagnostics.extend(diags);
            Ok(value)
        }
        Err(cause) => {
            let diag = cause.to_diagnostic();
            on_pass_complete(pass_id, std::slice::from_ref(&diag));
            state.diagnostics.push(diag);
            state.has_error = true;
            Err(PipelineError {
                failing_pass: pass_id,
                cause,
            })
        }
    }
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → timing → error check.
///
/// Preconditions: `state.program`, `state.params`, `state.lengths` are set.
/// Postconditions: artifacts for all passes in `required_passes(terminal)` are
///   populated, or `state.has_error` is true.
/// Failure modes: the first error of any pass; no later pass runs.
/// Side effects: calls `on_pass_complete` after each pass.
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    options: &PipelineOptions,
    sim_config: &SimulationConfig,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    state.provenance = Some(compute_provenance(
        &state.program,
        &state.params,
        &state.lengths,
    ));

    for pass_id in required_passes(terminal) {
        let t = Instant::now();
        match pass_id {
            PassId::Expand => {
                let outcome = expand(&state.program, &state.params, &state.lengths)
                    .map(|mut expansion| {
                        let diags = std::mem::take(&mut expansion.diagnostics);
                        (expansion, diags)
                    })
                    .map_err(PassFailure::from);
                let expansion =
                    finish_pass(state, pass_id, outcome, t.elapsed(), &mut on_pass_complete)?;
                tracing::debug!(
                    ops = expansion.ops.len(),
                    assignments = expansion.assign_count(),
                    guards = expansion.conditions.len(),
                    "expanded"
                );
                state.evaluator = Some(ExprEvaluator::new(
                    state.params.clone(),
                    expansion.loop_vars.iter().cloned(),
                ));
                state.expansion = Some(expansion);
            }
            PassId::BuildAffine => {
                let expansion = state
                    .expansion
                    .as_ref()
                    .ok_or_else(|| missing(pass_id, "expansion"))?;
                let evaluator = state
                    .evaluator
                    .as_ref()
                    .ok_or_else(|| missing(pass_id, "evaluator"))?;
                let outcome = build_affine(expansion, evaluator, options.parallel)
                    .and_then(|affine| {
                        let (x0, diags) = initial_state(expansion, &affine, evaluator)?;
                        Ok(((affine, x0), diags))
                    })
                    .map_err(PassFailure::from);
                let (affine, x0) =
                    finish_pass(state, pass_id, outcome, t.elapsed(), &mut on_pass_complete)?;
                tracing::debug!(
                    blocks = affine.block_count(),
                    k_local = affine.k_local,
                    total_dim = affine.total_dim(),
                    "affine system assembled"
                );
                state.affine = Some(affine);
                state.initial = Some(x0);
            }
            PassId::BuildGuards => {
                let expansion = state
                    .expansion
                    .as_ref()
                    .ok_or_else(|| missing(pass_id, "expansion"))?;
                let evaluator = state
                    .evaluator
                    .as_ref()
                    .ok_or_else(|| missing(pass_id, "evaluator"))?;
                let affine = state
                    .affine
                    .as_ref()
                    .ok_or_else(|| missing(pass_id, "affine"))?;
                let outcome = build_guards(
                    expansion,
                    affine,
                    evaluator,
                    options.allow_unsupported_guards,
                )
                .map_err(PassFailure::from);
                let guards = finish_pass(state, pass_id, outcome, t.elapsed(), &mut on_pass_complete)?;
                tracing::debug!(guards = guards.len(), "guards built");

                let affine = state
                    .affine
                    .as_ref()
                    .ok_or_else(|| missing(pass_id, "affine"))?;
                let initial = state
                    .initial
                    .clone()
                    .ok_or_else(|| missing(pass_id, "initial state"))?;
                let warnings = state
                    .diagnostics
                    .iter()
                    .filter(|d| !d.is_error())
                    .cloned()
                    .collect();
                state.phasor = Some(PhasorSystem::from_parts(affine, guards, initial, warnings));
            }
            PassId::Simulate => {
                let phasor = state
                    .phasor
                    .as_ref()
                    .ok_or_else(|| missing(pass_id, "phasor system"))?;
                let outcome = simulate(phasor, sim_config)
                    .map(|trajectory| (trajectory, Vec::new()))
                    .map_err(PassFailure::from);
                let trajectory =
                    finish_pass(state, pass_id, outcome, t.elapsed(), &mut on_pass_complete)?;
                state.trajectory = Some(trajectory);
            }
        }
    }
    Ok(())
}

/// Build the phasor system for `program` without simulating it.
pub fn compile(
    program: Program,
    params: ParamTable,
    lengths: LengthTable,
    options: &PipelineOptions,
) -> Result<PhasorSystem, PipelineError> {
    let mut state = CompilationState::new(program, params, lengths);
    run_pipeline(
        &mut state,
        PassId::BuildGuards,
        options,
        &SimulationConfig::default(),
        |_, _| {},
    )?;
    state
        .phasor
        .ok_or_else(|| missing(PassId::BuildGuards, "phasor system"))
}
