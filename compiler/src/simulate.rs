// simulate.rs — Phasor simulator: guarded affine recurrence
//
// Two-state machine {Running, Halted}. Each step checks the guards on the
// current state, applies `X' = M·X + c`, and halts on a fixed point. Running
// out of budget is a normal halt, not an error.
//
// Preconditions: the system's dimensions are consistent (see phasor.rs).
// Postconditions: `final_step` equals the number of applied transitions and
//   `states.len()`.
// Failure modes: an explicit initial vector of the wrong length.
// Side effects: `tracing` trace events per step.

use ndarray::Array1;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::phasor::PhasorSystem;

// ── Configuration ───────────────────────────────────────────────────────────

/// Element-wise closeness: `|a − b| ≤ atol + rtol·|b|`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    pub atol: f64,
    pub rtol: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            atol: 1e-8,
            rtol: 1e-5,
        }
    }
}

impl Tolerance {
    pub fn allclose(&self, a: &Array1<Complex64>, b: &Array1<Complex64>) -> bool {
        a.len() == b.len()
            && a
                .iter()
                .zip(b.iter())
                .all(|(x, y)| (x - y).norm() <= self.atol + self.rtol * y.norm())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum InitialState {
    /// Use the system's `X₀`.
    #[default]
    FromSystem,
    Explicit(Vec<Complex64>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub max_steps: usize,
    pub initial: InitialState,
    pub tolerance: Tolerance,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            max_steps: 1000,
            initial: InitialState::FromSystem,
            tolerance: Tolerance::default(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SimulationError {
    #[error("initial state has {found} entries, but the system has dimension {expected}")]
    InitialDimension { expected: usize, found: usize },
}

// ── State machine ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HaltReason {
    GuardViolation,
    FixedPoint,
    StepBudgetExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimStatus {
    Running,
    Halted(HaltReason),
}

/// Stepwise driver over one phasor system.
#[derive(Debug)]
pub struct Simulator<'a> {
    system: &'a PhasorSystem,
    tolerance: Tolerance,
    state: Array1<Complex64>,
    step: usize,
    status: SimStatus,
    violated_guard: Option<usize>,
}

impl<'a> Simulator<'a> {
    pub fn new(system: &'a PhasorSystem, config: &SimulationConfig) -> Result<Self, SimulationError> {
        let state = match &config.initial {
            InitialState::FromSystem => system.initial.clone(),
            InitialState::Explicit(values) => {
                if values.len() != system.total_dim() {
                    return Err(SimulationError::InitialDimension {
                        expected: system.total_dim(),
                        found: values.len(),
                    });
                }
                Array1::from(values.clone())
            }
        };
        Ok(Self {
            system,
            tolerance: config.tolerance,
            state,
            step: 0,
            status: SimStatus::Running,
            violated_guard: None,
        })
    }

    pub fn state(&self) -> &Array1<Complex64> {
        &self.state
    }

    pub fn status(&self) -> SimStatus {
        self.status
    }

    /// Transitions applied so far.
    pub fn step_count(&self) -> usize {
        self.step
    }

    pub fn violated_guard(&self) -> Option<usize> {
        self.violated_guard
    }

    /// Run one step. Returns the new state when a transition was applied,
    /// `None` when halted before applying one.
    pub fn advance(&mut self) -> Option<&Array1<Complex64>> {
        if self.status != SimStatus::Running {
            return None;
        }

        if let Some(guard) = self.system.guards.first_violated(&self.state) {
            tracing::trace!(step = self.step, guard, "guard violated");
            self.violated_guard = Some(guard);
            self.status = SimStatus::Halted(HaltReason::GuardViolation);
            return None;
        }

        let next = self.system.apply(&self.state);
        let fixed = self.tolerance.allclose(&next, &self.state);
        self.state = next;
        self.step += 1;
        tracing::trace!(step = self.step, fixed, "transition applied");
        if fixed {
            self.status = SimStatus::Halted(HaltReason::FixedPoint);
        }
        Some(&self.state)
    }

    /// Halt with `StepBudgetExhausted` if still running.
    pub fn exhaust(&mut self) {
        if self.status == SimStatus::Running {
            self.status = SimStatus::Halted(HaltReason::StepBudgetExhausted);
        }
    }
}

// ── Trajectory ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    pub initial: Array1<Complex64>,
    /// States produced by transitions, in order; excludes `initial`.
    pub states: Vec<Array1<Complex64>>,
    pub halt_reason: HaltReason,
    pub final_step: usize,
    pub violated_guard: Option<usize>,
}

impl Trajectory {
    /// Last state reached (the initial state if no transition applied).
    pub fn final_state(&self) -> &Array1<Complex64> {
        self.states.last().unwrap_or(&self.initial)
    }
}

/// Run the recurrence until a guard fires, a fixed point is reached, or
/// `max_steps` transitions have been applied.
pub fn simulate(
    system: &PhasorSystem,
    config: &SimulationConfig,
) -> Result<Trajectory, SimulationError> {
    let mut sim = Simulator::new(system, config)?;
    let initial = sim.state().clone();
    let mut states = Vec::new();

    while sim.step_count() < config.max_steps {
        match sim.advance() {
            Some(state) => states.push(state.clone()),
            None => break,
        }
        if sim.status() != SimStatus::Running {
            break;
        }
    }
    sim.exhaust();

    let halt_reason = match sim.status() {
        SimStatus::Halted(reason) => reason,
        SimStatus::Running => HaltReason::StepBudgetExhausted,
    };
    tracing::debug!(?halt_reason, steps = sim.step_count(), "simulation halted");

    Ok(Trajectory {
        initial,
        states,
        halt_reason,
        final_step: sim.step_count(),
        violated_guard: sim.violated_guard(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::{Guard, GuardSet};
    use ndarray::Array2;

    fn c(re: f64) -> Complex64 {
        Complex64::new(re, 0.0)
    }

    fn scalar_system(m: f64, offset: f64, x0: f64, guards: Vec<Guard>) -> PhasorSystem {
        PhasorSystem {
            control_blocks: vec!["block{}".into()],
            data_addresses: vec!["x".into()],
            k_local: 1,
            m: Array2::from_elem((1, 1), c(m)),
            c: Array1::from(vec![c(offset)]),
            guards: GuardSet { guards },
            initial: Array1::from(vec![c(x0)]),
            diagnostics: Vec::new(),
        }
    }

    fn below_five() -> Guard {
        Guard {
            row: vec![1.0],
            offset: -5.0,
            inclusive: true,
            source: "x < 5".into(),
        }
    }

    #[test]
    fn guarded_counter_halts_after_three_steps() {
        let system = scalar_system(1.0, 2.0, 0.0, vec![below_five()]);
        let t = simulate(&system, &SimulationConfig::default()).unwrap();
        assert_eq!(t.halt_reason, HaltReason::GuardViolation);
        assert_eq!(t.final_step, 3);
        assert_eq!(t.violated_guard, Some(0));
        let xs: Vec<f64> = t.states.iter().map(|s| s[0].re).collect();
        assert_eq!(xs, vec![2.0, 4.0, 6.0]);
        assert_eq!(t.final_state()[0], c(6.0));
    }

    #[test]
    fn identity_reaches_fixed_point_at_step_one() {
        let system = scalar_system(1.0, 0.0, 1.0, vec![]);
        let t = simulate(&system, &SimulationConfig::default()).unwrap();
        assert_eq!(t.halt_reason, HaltReason::FixedPoint);
        assert_eq!(t.final_step, 1);
        assert_eq!(t.states.len(), 1);
    }

    #[test]
    fn budget_exhaustion_is_normal() {
        let system = scalar_system(1.0, 1.0, 0.0, vec![]);
        let config = SimulationConfig {
            max_steps: 7,
            ..SimulationConfig::default()
        };
        let t = simulate(&system, &config).unwrap();
        assert_eq!(t.halt_reason, HaltReason::StepBudgetExhausted);
        assert_eq!(t.states.len(), 7);
        assert_eq!(t.final_step, 7);
    }

    #[test]
    fn zero_budget_yields_empty_trajectory() {
        let system = scalar_system(1.0, 1.0, 0.0, vec![]);
        let config = SimulationConfig {
            max_steps: 0,
            ..SimulationConfig::default()
        };
        let t = simulate(&system, &config).unwrap();
        assert!(t.states.is_empty());
        assert_eq!(t.halt_reason, HaltReason::StepBudgetExhausted);
        assert_eq!(t.final_state()[0], c(0.0));
    }

    #[test]
    fn guard_violated_initially_applies_no_transition() {
        let system = scalar_system(1.0, 2.0, 9.0, vec![below_five()]);
        let t = simulate(&system, &SimulationConfig::default()).unwrap();
        assert_eq!(t.halt_reason, HaltReason::GuardViolation);
        assert_eq!(t.final_step, 0);
        assert!(t.states.is_empty());
    }

    #[test]
    fn explicit_initial_state_is_checked() {
        let system = scalar_system(1.0, 2.0, 0.0, vec![]);
        let config = SimulationConfig {
            initial: InitialState::Explicit(vec![c(1.0), c(2.0)]),
            ..SimulationConfig::default()
        };
        assert_eq!(
            simulate(&system, &config).unwrap_err(),
            SimulationError::InitialDimension {
                expected: 1,
                found: 2
            }
        );

        let config = SimulationConfig {
            initial: InitialState::Explicit(vec![c(4.0)]),
            max_steps: 1,
            ..SimulationConfig::default()
        };
        let t = simulate(&system, &config).unwrap();
        assert_eq!(t.initial[0], c(4.0));
        assert_eq!(t.states[0][0], c(6.0));
    }

    #[test]
    fn tolerance_is_relative_and_absolute() {
        let tol = Tolerance::default();
        let a = Array1::from(vec![c(1000.0)]);
        let b = Array1::from(vec![c(1000.005)]);
        assert!(tol.allclose(&a, &b));
        let d = Array1::from(vec![c(1.0)]);
        let e = Array1::from(vec![c(1.1)]);
        assert!(!tol.allclose(&d, &e));
    }
}
