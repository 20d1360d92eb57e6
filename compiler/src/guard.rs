// guard.rs — Affine halting guards from loop conditions
//
// Each `while` condition `lhs op rhs` is normalized to `d = lhs − rhs =
// Σ aᵢ·xᵢ + b` and encoded as one row of `(C_p, c_p)` whose positive (or,
// for strict conditions, non-negative) value means "halt":
//
//   d <  0   →  row +a, offset +b, violated when value >= 0
//   d <= 0   →  row +a, offset +b, violated when value >  0
//   d >  0   →  row −a, offset −b, violated when value >= 0
//   d >= 0   →  row −a, offset −b, violated when value >  0
//
// Preconditions: the affine system was built from the same expansion.
// Postconditions: every row has length `total_dim`.
// Failure modes: `UnsupportedCondition` for non-affine input, conditions
//   without state references, or addresses outside the state (downgraded
//   to a W0301 warning when unsupported guards are allowed).
// Side effects: emits `tracing` warnings for omitted guards.

use ndarray::{Array1, Array2};
use num_complex::Complex64;
use serde::Serialize;

use crate::affine::AffineSystem;
use crate::ast::CmpOp;
use crate::diag::{codes, BuildError, Diagnostic};
use crate::eval::ExprEvaluator;
use crate::expand::{ConditionSite, Expansion};
use crate::linear::normalize;
use crate::parser::parse_condition;

/// One halting row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Guard {
    pub row: Vec<f64>,
    pub offset: f64,
    /// Whether a value of exactly zero counts as a violation.
    pub inclusive: bool,
    pub source: String,
}

impl Guard {
    /// `row·Re(X) + offset`.
    pub fn value(&self, state: &Array1<Complex64>) -> f64 {
        self.row
            .iter()
            .zip(state.iter())
            .map(|(a, x)| a * x.re)
            .sum::<f64>()
            + self.offset
    }

    pub fn is_violated(&self, state: &Array1<Complex64>) -> bool {
        let v = self.value(state);
        if self.inclusive {
            v >= 0.0
        } else {
            v > 0.0
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GuardSet {
    pub guards: Vec<Guard>,
}

impl GuardSet {
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    /// Index of the first violated row, if any.
    pub fn first_violated(&self, state: &Array1<Complex64>) -> Option<usize> {
        self.guards.iter().position(|g| g.is_violated(state))
    }

    /// `C_p` as a `(guards × dim)` matrix.
    pub fn matrix(&self, dim: usize) -> Array2<f64> {
        let mut c_p = Array2::<f64>::zeros((self.guards.len(), dim));
        for (i, guard) in self.guards.iter().enumerate() {
            for (j, a) in guard.row.iter().enumerate().take(dim) {
                c_p[[i, j]] = *a;
            }
        }
        c_p
    }

    pub fn offsets(&self) -> Vec<f64> {
        self.guards.iter().map(|g| g.offset).collect()
    }
}

/// Build guards for every condition site in the expansion.
pub fn build_guards(
    expansion: &Expansion,
    system: &AffineSystem,
    evaluator: &ExprEvaluator,
    allow_unsupported: bool,
) -> Result<(GuardSet, Vec<Diagnostic>), BuildError> {
    let mut set = GuardSet::default();
    let mut diagnostics = Vec::new();

    for site in &expansion.conditions {
        match build_guard(site, system, evaluator) {
            Ok(guard) => set.guards.push(guard),
            Err(err @ BuildError::UnsupportedCondition { .. }) if allow_unsupported => {
                tracing::warn!(cond = %site.cond, "omitting unsupported guard");
                diagnostics.push(
                    Diagnostic::warning(
                        codes::W0301,
                        format!("guard `{}` omitted: {err}", site.cond),
                    )
                    .with_origin(format!("while {}", site.context)),
                );
            }
            Err(err) => return Err(err),
        }
    }

    Ok((set, diagnostics))
}

/// Encode one condition as a guard row.
pub fn build_guard(
    site: &ConditionSite,
    system: &AffineSystem,
    evaluator: &ExprEvaluator,
) -> Result<Guard, BuildError> {
    let unsupported = |reason: String| BuildError::UnsupportedCondition {
        cond: site.cond.clone(),
        reason,
        context: site.context.clone(),
    };

    let cond = parse_condition(&site.cond)
        .into_result()
        .map_err(|errs| unsupported(format!("parse error: {}", errs.join("; "))))?;

    let env = evaluator.environment(&site.context);
    let lhs = normalize(&cond.lhs, &env).map_err(unsupported)?;
    let rhs = normalize(&cond.rhs, &env).map_err(unsupported)?;
    let diff = lhs.sub(rhs);
    if diff.is_constant() {
        return Err(unsupported("condition references no state address".into()));
    }

    let sign = match cond.op {
        CmpOp::Lt | CmpOp::Le => 1.0,
        CmpOp::Gt | CmpOp::Ge => -1.0,
    };
    let mut row = vec![0.0; system.total_dim()];
    for (address, coeff) in &diff.terms {
        let slot = system
            .slot_for(address, &site.context)
            .ok_or_else(|| unsupported(format!("address `{address}` is not part of the state")))?;
        row[slot] += sign * coeff;
    }

    Ok(Guard {
        row,
        offset: sign * diff.constant,
        inclusive: matches!(cond.op, CmpOp::Lt | CmpOp::Gt),
        source: site.cond.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affine::build_affine;
    use crate::address::LoopContext;
    use crate::expand::expand;
    use crate::ir::{AddressRef, LengthTable, Node, ParamTable, Program, Term};

    fn counter(cond: &str) -> (Expansion, AffineSystem, ExprEvaluator) {
        let x = AddressRef::scalar("x");
        let program = Program {
            body: vec![Node::While {
                cond: cond.into(),
                body: vec![Node::Assign {
                    target: x.clone(),
                    terms: vec![Term::new(x, None)],
                    constant: Some("2".into()),
                }],
            }],
        };
        let mut params = ParamTable::new();
        params.insert("LIMIT".into(), 5.0);
        let expansion = expand(&program, &params, &LengthTable::new()).unwrap();
        let evaluator = ExprEvaluator::new(params, expansion.loop_vars.iter().cloned());
        let system = build_affine(&expansion, &evaluator, false).unwrap();
        (expansion, system, evaluator)
    }

    fn state(x: f64) -> Array1<Complex64> {
        Array1::from(vec![Complex64::new(x, 0.0)])
    }

    #[test]
    fn less_than_halts_at_boundary() {
        let (exp, sys, ev) = counter("x < 5");
        let (set, diags) = build_guards(&exp, &sys, &ev, false).unwrap();
        assert!(diags.is_empty());
        let g = &set.guards[0];
        assert_eq!(g.row, vec![1.0]);
        assert_eq!(g.offset, -5.0);
        assert!(!g.is_violated(&state(4.0)));
        assert!(g.is_violated(&state(5.0)));
        assert!(g.is_violated(&state(6.0)));
    }

    #[test]
    fn comparison_directions() {
        // (condition, safe, boundary, boundary violates, beyond)
        let cases = [
            ("x <= 5", 4.0, 5.0, false, 6.0),
            ("x > 5", 6.0, 5.0, true, 4.0),
            ("x >= 5", 6.0, 5.0, false, 4.0),
            ("LIMIT > x", 4.0, 5.0, true, 6.0),
        ];
        for (cond, safe, boundary, boundary_violates, beyond) in cases {
            let (exp, sys, ev) = counter(cond);
            let g = build_guard(&exp.conditions[0], &sys, &ev).unwrap();
            assert!(!g.is_violated(&state(safe)), "{cond} at {safe}");
            assert_eq!(g.is_violated(&state(boundary)), boundary_violates, "{cond} at {boundary}");
            assert!(g.is_violated(&state(beyond)), "{cond} at {beyond}");
        }
    }

    #[test]
    fn unsupported_condition_fails_or_warns() {
        let (exp, sys, ev) = counter("x * x < 5");
        let err = build_guards(&exp, &sys, &ev, false).unwrap_err();
        assert!(matches!(err, BuildError::UnsupportedCondition { .. }));

        let (set, diags) = build_guards(&exp, &sys, &ev, true).unwrap();
        assert!(set.is_empty());
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, Some(codes::W0301));
    }

    #[test]
    fn address_outside_state_is_unsupported() {
        let (exp, sys, ev) = counter("y < 5");
        let err = build_guard(&exp.conditions[0], &sys, &ev).unwrap_err();
        let BuildError::UnsupportedCondition { reason, context, .. } = err else {
            panic!("wrong error");
        };
        assert!(reason.contains("`y`"));
        assert_eq!(context, LoopContext::new());
    }

    #[test]
    fn constant_condition_is_unsupported() {
        let (exp, sys, ev) = counter("LIMIT < 5");
        assert!(build_guard(&exp.conditions[0], &sys, &ev).is_err());
    }

    #[test]
    fn matrix_form() {
        let (exp, sys, ev) = counter("x < 5");
        let (set, _) = build_guards(&exp, &sys, &ev, false).unwrap();
        assert_eq!(set.matrix(1)[[0, 0]], 1.0);
        assert_eq!(set.offsets(), vec![-5.0]);
    }
}
