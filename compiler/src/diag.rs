// diag.rs — Build errors and the unified diagnostics model
//
// `BuildError` is the fatal taxonomy shared by every build phase; any value of
// it aborts the pipeline. `Diagnostic` is the reporting form: errors convert
// into it, and phases attach non-fatal warnings (omitted guards, unfolded
// branches) directly.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use thiserror::Error;

use crate::address::LoopContext;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0101`, `W0301`).
///
/// Codes are `&'static str` constants defined in the `codes` module. Once
/// assigned, a code keeps its meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    // E01xx: expansion
    pub const E0101: DiagCode = DiagCode("E0101"); // unbound loop bound
    pub const E0102: DiagCode = DiagCode("E0102"); // index references missing loop variable
    pub const E0103: DiagCode = DiagCode("E0103"); // expression evaluation failed

    // E02xx: affine composition
    pub const E0201: DiagCode = DiagCode("E0201"); // inconsistent block dimension
    pub const E0202: DiagCode = DiagCode("E0202"); // address not pre-registered
    pub const W0201: DiagCode = DiagCode("W0201"); // conditional branch not folded
    pub const W0202: DiagCode = DiagCode("W0202"); // initial value for address outside the state

    // E03xx: guards
    pub const E0301: DiagCode = DiagCode("E0301"); // unsupported condition
    pub const W0301: DiagCode = DiagCode("W0301"); // unsupported condition omitted
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Cause record ─────────────────────────────────────────────────────────

/// One link in a cause chain explaining a failure.
#[derive(Debug, Clone)]
pub struct CauseRecord {
    pub message: String,
    pub origin: Option<String>,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A diagnostic emitted by any phase.
///
/// `origin` names the IR location (operation, block, or condition site) the
/// diagnostic refers to; the IR carries no source spans.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub origin: Option<String>,
    pub message: String,
    pub hint: Option<String>,
    pub cause_chain: Vec<CauseRecord>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, origin, hint, or causes.
    pub fn new(level: DiagLevel, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            origin: None,
            message: message.into(),
            hint: None,
            cause_chain: Vec::new(),
        }
    }

    pub fn warning(code: DiagCode, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, message).with_code(code)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach the IR location this diagnostic refers to.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a cause record to the chain.
    pub fn with_cause(mut self, message: impl Into<String>, origin: Option<String>) -> Self {
        self.cause_chain.push(CauseRecord {
            message: message.into(),
            origin,
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(origin) = &self.origin {
            write!(f, "\n  at: {}", origin)?;
        }
        for cause in &self.cause_chain {
            write!(f, "\n  cause: {}", cause.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

// ── Environment snapshot ─────────────────────────────────────────────────

/// Rendered bindings visible to an expression when it failed: loop context
/// first, then parameters. Built-ins are omitted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvSnapshot(pub Vec<(String, String)>);

impl fmt::Display for EnvSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        write!(f, "}}")
    }
}

// ── Build errors ─────────────────────────────────────────────────────────

/// Fatal errors of the expand/build/guard phases.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BuildError {
    #[error("cannot resolve bound `{symbol}` of loop `{loop_var}` in {context}: {detail}")]
    UnboundSymbol {
        symbol: String,
        loop_var: String,
        context: LoopContext,
        detail: String,
    },

    #[error("cannot resolve index of `{address}` at loop variable `{variable}` in {context}: {reason}")]
    IndexEvaluation {
        address: String,
        variable: String,
        reason: String,
        context: LoopContext,
    },

    #[error("cannot evaluate `{expr}`: {reason} (environment {env})")]
    ExpressionEvaluation {
        expr: String,
        reason: String,
        env: EnvSnapshot,
    },

    #[error(
        "block `{block}` has local dimension {found}, but block `{first_block}` has {expected}"
    )]
    InconsistentBlockDimension {
        expected: usize,
        found: usize,
        block: String,
        first_block: String,
    },

    #[error("address `{address}` was not registered during the scan of block `{block}`")]
    UnregisteredAddress { address: String, block: String },

    #[error("condition `{cond}` in {context} is not an affine guard: {reason}")]
    UnsupportedCondition {
        cond: String,
        reason: String,
        context: LoopContext,
    },
}

impl BuildError {
    pub fn code(&self) -> DiagCode {
        match self {
            BuildError::UnboundSymbol { .. } => codes::E0101,
            BuildError::IndexEvaluation { .. } => codes::E0102,
            BuildError::ExpressionEvaluation { .. } => codes::E0103,
            BuildError::InconsistentBlockDimension { .. } => codes::E0201,
            BuildError::UnregisteredAddress { .. } => codes::E0202,
            BuildError::UnsupportedCondition { .. } => codes::E0301,
        }
    }

    /// Convert into an error-level diagnostic with code, hint, and the
    /// underlying reason as its cause.
    pub fn to_diagnostic(&self) -> Diagnostic {
        let diag = Diagnostic::new(DiagLevel::Error, self.to_string()).with_code(self.code());
        match self {
            BuildError::UnboundSymbol { symbol, detail, .. } => diag
                .with_cause(detail, Some(format!("bound `{symbol}`")))
                .with_hint(format!(
                    "supply `{symbol}` in the loop-length table or the parameter table"
                )),
            BuildError::IndexEvaluation {
                address,
                variable,
                reason,
                ..
            } => diag.with_cause(reason, Some(format!("`{variable}` in index of `{address}`"))),
            BuildError::ExpressionEvaluation { expr, reason, .. } => {
                diag.with_cause(reason, Some(format!("expression `{expr}`")))
            }
            BuildError::InconsistentBlockDimension {
                found,
                block,
                ..
            } => diag
                .with_cause(
                    format!("touches {found} distinct addresses"),
                    Some(format!("block `{block}`")),
                )
                .with_hint(
                    "every loop-context block must touch the same number of distinct addresses",
                ),
            BuildError::UnsupportedCondition { cond, reason, .. } => diag
                .with_cause(reason, Some(format!("condition `{cond}`")))
                .with_hint(
                    "guards accept `affine-expr (<|<=|>|>=) affine-expr` over state addresses",
                ),
            BuildError::UnregisteredAddress { .. } => diag,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_without_code() {
        let d = Diagnostic::new(DiagLevel::Error, "something failed");
        assert_eq!(format!("{d}"), "error: something failed");
    }

    #[test]
    fn display_with_code_and_origin() {
        let d = Diagnostic::warning(codes::W0301, "guard omitted").with_origin("op#4");
        assert_eq!(format!("{d}"), "warning[W0301]: guard omitted\n  at: op#4");
    }

    #[test]
    fn builder_chain() {
        let d = Diagnostic::new(DiagLevel::Error, "dimension mismatch")
            .with_code(codes::E0201)
            .with_hint("pad the block")
            .with_cause("block 1 touches three addresses", Some("b1".into()));

        assert_eq!(d.code, Some(codes::E0201));
        assert_eq!(d.hint.as_deref(), Some("pad the block"));
        assert_eq!(d.cause_chain.len(), 1);
        assert!(d.is_error());
    }

    #[test]
    fn build_error_maps_to_stable_code() {
        let err = BuildError::UnboundSymbol {
            symbol: "N".into(),
            loop_var: "k".into(),
            context: LoopContext::default(),
            detail: "not in either table".into(),
        };
        let diag = err.to_diagnostic();
        assert_eq!(diag.code, Some(codes::E0101));
        assert!(diag.message.contains("`N`"));
        assert!(diag.hint.unwrap().contains("loop-length table"));
    }

    #[test]
    fn build_error_reason_becomes_cause() {
        let err = BuildError::ExpressionEvaluation {
            expr: "k * alpha".into(),
            reason: "unknown name `alpha`".into(),
            env: EnvSnapshot(vec![("k".into(), "0".into())]),
        };
        let diag = err.to_diagnostic();
        assert_eq!(diag.cause_chain.len(), 1);
        assert_eq!(diag.cause_chain[0].message, "unknown name `alpha`");
        assert_eq!(
            diag.cause_chain[0].origin.as_deref(),
            Some("expression `k * alpha`")
        );
        assert!(format!("{diag}").contains("\n  cause: unknown name `alpha`"));
    }

    #[test]
    fn env_snapshot_renders_in_order() {
        let env = EnvSnapshot(vec![("k".into(), "1".into()), ("N".into(), "4".into())]);
        assert_eq!(env.to_string(), "{k=1, N=4}");
    }
}
