// artifact.rs — JSON artifacts for phasor systems and trajectories
//
// Complex entries serialize as a plain number when the imaginary part is
// negligible, otherwise as `[re, im]`. Phasor artifacts read back into a
// `PhasorSystem`, so a build can be simulated later without the IR.
//
// Preconditions: none.
// Postconditions: serialization is deterministic (field order fixed, vectors
//   only, no hash maps).
// Failure modes: shape mismatches when reading an artifact back.
// Side effects: none.

use ndarray::{Array1, Array2};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::guard::{Guard, GuardSet};
use crate::phasor::{PhasorSystem, IMAG_EPS};
use crate::pipeline::Provenance;
use crate::simulate::{HaltReason, Trajectory};

// ── Complex scalars ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ComplexRepr {
    Real(f64),
    Pair([f64; 2]),
}

impl From<Complex64> for ComplexRepr {
    fn from(z: Complex64) -> Self {
        if z.im.abs() < IMAG_EPS {
            ComplexRepr::Real(z.re)
        } else {
            ComplexRepr::Pair([z.re, z.im])
        }
    }
}

impl From<ComplexRepr> for Complex64 {
    fn from(repr: ComplexRepr) -> Self {
        match repr {
            ComplexRepr::Real(re) => Complex64::new(re, 0.0),
            ComplexRepr::Pair([re, im]) => Complex64::new(re, im),
        }
    }
}

fn vector(values: &Array1<Complex64>) -> Vec<ComplexRepr> {
    values.iter().copied().map(ComplexRepr::from).collect()
}

#[derive(Debug, Error, PartialEq)]
pub enum ArtifactError {
    #[error("artifact shape mismatch: {0}")]
    Shape(String),
}

// ── Phasor artifact ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub input_hash: String,
    pub compiler_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhasorArtifact {
    pub control_blocks: Vec<String>,
    pub data_addresses: Vec<String>,
    #[serde(rename = "M_global")]
    pub m_global: Vec<Vec<ComplexRepr>>,
    pub c_global: Vec<ComplexRepr>,
    #[serde(rename = "C_p")]
    pub guard_rows: Vec<Vec<f64>>,
    #[serde(rename = "c_p")]
    pub guard_offsets: Vec<f64>,
    pub guard_inclusive: Vec<bool>,
    #[serde(default)]
    pub guard_sources: Vec<String>,
    #[serde(rename = "X_0")]
    pub x_0: Vec<ComplexRepr>,
    pub total_dim: usize,
    pub block_count: usize,
    pub k_local: usize,
    #[serde(default)]
    pub diagnostics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<ProvenanceRecord>,
}

impl PhasorArtifact {
    pub fn from_system(system: &PhasorSystem, provenance: Option<&Provenance>) -> Self {
        let guards = &system.guards.guards;
        Self {
            control_blocks: system.control_blocks.clone(),
            data_addresses: system.data_addresses.clone(),
            m_global: system
                .m
                .rows()
                .into_iter()
                .map(|row| row.iter().copied().map(ComplexRepr::from).collect())
                .collect(),
            c_global: vector(&system.c),
            guard_rows: guards.iter().map(|g| g.row.clone()).collect(),
            guard_offsets: guards.iter().map(|g| g.offset).collect(),
            guard_inclusive: guards.iter().map(|g| g.inclusive).collect(),
            guard_sources: guards.iter().map(|g| g.source.clone()).collect(),
            x_0: vector(&system.initial),
            total_dim: system.total_dim(),
            block_count: system.block_count(),
            k_local: system.k_local,
            diagnostics: system.diagnostics.iter().map(|d| d.to_string()).collect(),
            provenance: provenance.map(|p| ProvenanceRecord {
                input_hash: p.input_hash_hex(),
                compiler_version: p.compiler_version.to_string(),
            }),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Rebuild a simulatable system, checking every dimension.
    /// Diagnostics are not carried back (they are rendered text).
    pub fn into_system(self) -> Result<PhasorSystem, ArtifactError> {
        let n = self.total_dim;
        let shape = |what: &str, expected: usize, found: usize| {
            if expected == found {
                Ok(())
            } else {
                Err(ArtifactError::Shape(format!(
                    "{what} has length {found}, expected {expected}"
                )))
            }
        };

        shape("data_addresses", n, self.data_addresses.len())?;
        shape("M_global", n, self.m_global.len())?;
        for row in &self.m_global {
            shape("M_global row", n, row.len())?;
        }
        shape("c_global", n, self.c_global.len())?;
        shape("X_0", n, self.x_0.len())?;
        shape("control_blocks", self.block_count, self.control_blocks.len())?;
        shape("total_dim", self.k_local * self.block_count, n)?;
        let g = self.guard_rows.len();
        shape("c_p", g, self.guard_offsets.len())?;
        shape("guard_inclusive", g, self.guard_inclusive.len())?;
        for row in &self.guard_rows {
            shape("C_p row", n, row.len())?;
        }

        let flat: Vec<Complex64> = self
            .m_global
            .into_iter()
            .flatten()
            .map(Complex64::from)
            .collect();
        let m = Array2::from_shape_vec((n, n), flat)
            .map_err(|e| ArtifactError::Shape(e.to_string()))?;

        let mut sources = self.guard_sources.into_iter();
        let guards = self
            .guard_rows
            .into_iter()
            .zip(self.guard_offsets)
            .zip(self.guard_inclusive)
            .map(|((row, offset), inclusive)| Guard {
                row,
                offset,
                inclusive,
                source: sources.next().unwrap_or_default(),
            })
            .collect();

        Ok(PhasorSystem {
            control_blocks: self.control_blocks,
            data_addresses: self.data_addresses,
            k_local: self.k_local,
            m,
            c: self.c_global.into_iter().map(Complex64::from).collect(),
            guards: GuardSet { guards },
            initial: self.x_0.into_iter().map(Complex64::from).collect(),
            diagnostics: Vec::new(),
        })
    }
}

// ── Trajectory artifact ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryArtifact {
    pub initial: Vec<ComplexRepr>,
    pub states: Vec<Vec<ComplexRepr>>,
    pub halt_reason: HaltReason,
    pub final_step: usize,
    pub violated_guard: Option<usize>,
}

impl From<&Trajectory> for TrajectoryArtifact {
    fn from(t: &Trajectory) -> Self {
        Self {
            initial: vector(&t.initial),
            states: t.states.iter().map(vector).collect(),
            halt_reason: t.halt_reason,
            final_step: t.final_step,
            violated_guard: t.violated_guard,
        }
    }
}

impl TrajectoryArtifact {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    fn sample() -> PhasorSystem {
        PhasorSystem {
            control_blocks: vec!["block{}".into()],
            data_addresses: vec!["a[0]".into(), "a[1]".into()],
            k_local: 2,
            m: Array2::from_shape_vec((2, 2), vec![c(1.0, 0.0), c(0.0, -1.0), c(1.0, 0.0), c(0.0, 0.0)])
                .unwrap(),
            c: Array1::from(vec![c(0.0, 0.0), c(2.0, 0.0)]),
            guards: GuardSet {
                guards: vec![Guard {
                    row: vec![1.0, 0.0],
                    offset: -5.0,
                    inclusive: true,
                    source: "a[0] < 5".into(),
                }],
            },
            initial: Array1::from(vec![c(1.0, 0.0), c(0.0, 0.0)]),
            diagnostics: Vec::new(),
        }
    }

    #[test]
    fn complex_entries_use_compact_form() {
        let json = serde_json::to_string(&vector(&Array1::from(vec![c(1.5, 0.0), c(0.0, -1.0)])))
            .unwrap();
        assert_eq!(json, "[1.5,[0.0,-1.0]]");
    }

    #[test]
    fn phasor_artifact_reads_back() {
        let system = sample();
        let artifact = PhasorArtifact::from_system(&system, None);
        assert_eq!(artifact.total_dim, 2);
        let json = artifact.to_json().unwrap();
        assert!(json.contains("\"M_global\""));
        assert!(json.contains("\"C_p\""));
        assert!(!json.contains("provenance"));

        let back = PhasorArtifact::from_json(&json).unwrap().into_system().unwrap();
        assert_eq!(back.m, system.m);
        assert_eq!(back.c, system.c);
        assert_eq!(back.initial, system.initial);
        assert_eq!(back.guards, system.guards);
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let mut artifact = PhasorArtifact::from_system(&sample(), None);
        artifact.c_global.pop();
        let err = artifact.into_system().unwrap_err();
        assert!(err.to_string().contains("c_global"));
    }
}
