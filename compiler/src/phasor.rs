// phasor.rs — The immutable phasor system handed to the simulator
//
// Bundles the global affine map, the guard set, the initial state, and the
// non-fatal diagnostics collected while building them.
//
// Preconditions: affine system, guards, and initial state come from one build.
// Postconditions: `m` is square of side `total_dim`; `c`, `initial`, and every
//   guard row have length `total_dim`.
// Failure modes: an initial-value expression that fails to evaluate.
// Side effects: none.

use std::fmt::{self, Write};

use ndarray::{Array1, Array2};
use num_complex::Complex64;

use crate::affine::AffineSystem;
use crate::diag::{codes, BuildError, Diagnostic};
use crate::eval::ExprEvaluator;
use crate::expand::{Expansion, OpKind, OtherOp};
use crate::guard::GuardSet;

/// Imaginary parts below this render as plain reals.
pub const IMAG_EPS: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct PhasorSystem {
    pub control_blocks: Vec<String>,
    pub data_addresses: Vec<String>,
    pub k_local: usize,
    pub m: Array2<Complex64>,
    pub c: Array1<Complex64>,
    pub guards: GuardSet,
    pub initial: Array1<Complex64>,
    pub diagnostics: Vec<Diagnostic>,
}

impl PhasorSystem {
    pub fn from_parts(
        affine: &AffineSystem,
        guards: GuardSet,
        initial: Array1<Complex64>,
        diagnostics: Vec<Diagnostic>,
    ) -> Self {
        Self {
            control_blocks: affine.control_blocks(),
            data_addresses: affine.data_addresses(),
            k_local: affine.k_local,
            m: affine.m_global.clone(),
            c: affine.c_global.clone(),
            guards,
            initial,
            diagnostics,
        }
    }

    pub fn total_dim(&self) -> usize {
        self.data_addresses.len()
    }

    pub fn block_count(&self) -> usize {
        self.control_blocks.len()
    }

    /// One transition `X' = M·X + c`.
    pub fn apply(&self, state: &Array1<Complex64>) -> Array1<Complex64> {
        self.m.dot(state) + &self.c
    }

    /// Compact text rendering of the whole system.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "blocks: {} (k_local={})",
            self.control_blocks.join(", "),
            self.k_local
        );
        let _ = writeln!(out, "addresses: {}", self.data_addresses.join(", "));
        let _ = writeln!(out, "M:");
        for row in self.m.rows() {
            let _ = writeln!(out, "  {}", render_vector(row.iter().copied()));
        }
        let _ = writeln!(out, "c: {}", render_vector(self.c.iter().copied()));
        let _ = writeln!(out, "X0: {}", render_vector(self.initial.iter().copied()));
        let _ = write!(out, "guards:");
        if self.guards.is_empty() {
            let _ = write!(out, " none");
        }
        for guard in &self.guards.guards {
            let _ = write!(
                out,
                "\n  {}: {:?} {:+} {}",
                guard.source,
                guard.row,
                guard.offset,
                if guard.inclusive { ">= 0" } else { "> 0" }
            );
        }
        out
    }
}

impl fmt::Display for PhasorSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// `3`, `-1.5`, or `0.5+2j`.
pub fn render_complex(z: Complex64) -> String {
    if z.im.abs() < IMAG_EPS {
        format!("{}", z.re)
    } else {
        format!("{}{:+}j", z.re, z.im)
    }
}

fn render_vector(values: impl Iterator<Item = Complex64>) -> String {
    let parts: Vec<String> = values.map(render_complex).collect();
    format!("[{}]", parts.join(", "))
}

// ── Initial state ───────────────────────────────────────────────────────────

/// `X₀` for the built system.
///
/// Without any `decl` initializer this is the unit vector on slot 0. With
/// initializers, every slot whose address has the declared name takes the
/// evaluated value and all other slots are zero. A declared name with no
/// slot in the state yields a W0202 warning.
pub fn initial_state(
    expansion: &Expansion,
    affine: &AffineSystem,
    evaluator: &ExprEvaluator,
) -> Result<(Array1<Complex64>, Vec<Diagnostic>), BuildError> {
    let n = affine.total_dim();
    let mut diagnostics = Vec::new();
    let mut state = Array1::<Complex64>::zeros(n);
    let mut any_init = false;

    for op in &expansion.ops {
        let OpKind::Other {
            other: OtherOp::Decl {
                name,
                init: Some(init),
            },
        } = &op.kind
        else {
            continue;
        };
        let value = evaluator.evaluate(init, &op.context)?;
        let slots: Vec<usize> = affine
            .blocks
            .iter()
            .enumerate()
            .flat_map(|(b, block)| {
                block
                    .addresses
                    .iter()
                    .enumerate()
                    .filter(|(_, address)| &address.name == name)
                    .map(move |(s, _)| b * affine.k_local + s)
                    .collect::<Vec<_>>()
            })
            .collect();
        if slots.is_empty() {
            diagnostics.push(
                Diagnostic::warning(
                    codes::W0202,
                    format!("initial value for `{name}` ignored: `{name}` is not part of the state"),
                )
                .with_origin(op.id.to_string()),
            );
            continue;
        }
        any_init = true;
        for slot in slots {
            state[slot] = value;
        }
    }

    if !any_init && n > 0 {
        state[0] = Complex64::new(1.0, 0.0);
    }
    Ok((state, diagnostics))
}
