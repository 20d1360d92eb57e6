// eval.rs — Sandboxed complex evaluator for multipliers and initial values
//
// Evaluates parsed expressions against an explicit environment: the current
// loop context, the parameter table, and a closed set of built-in constants
// and functions. Nothing else is reachable.
//
// Preconditions: the parameter table is fixed for the evaluator's lifetime.
// Postconditions: results are finite complex scalars.
// Failure modes: parse failure, unbound name, unknown function or arity,
//   address reference inside a coefficient, non-finite result.
// Side effects: populates the per-text compile cache.

use std::collections::HashSet;
use std::f64::consts::{E, PI, TAU};
use std::sync::Arc;

use dashmap::DashMap;
use num_complex::Complex64;

use crate::address::LoopContext;
use crate::ast::{BinOp, Expr, ExprKind, UnaryOp};
use crate::diag::{BuildError, EnvSnapshot};
use crate::ir::ParamTable;
use crate::parser::parse_expr;

const ONE: Complex64 = Complex64::new(1.0, 0.0);

// ── Built-ins ───────────────────────────────────────────────────────────────

/// Closed set of named constants. `math.`/`cmath.` spellings are accepted
/// for compatibility with translator output.
pub fn builtin_constant(name: &str) -> Option<Complex64> {
    let value = match name {
        "pi" | "PI" | "math.pi" | "cmath.pi" => PI,
        "tau" | "math.tau" | "cmath.tau" => TAU,
        "E" | "math.e" | "cmath.e" => E,
        _ => return None,
    };
    Some(Complex64::new(value, 0.0))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Exp,
    Sin,
    Cos,
    Tan,
    Sqrt,
    Ln,
    Abs,
    Arg,
    Conj,
    Re,
    Im,
    Pow,
    Polar,
    Cis,
}

/// Look up a built-in function; a `math.` or `cmath.` prefix is ignored.
pub fn builtin_function(name: &str) -> Option<Builtin> {
    let base = name
        .strip_prefix("cmath.")
        .or_else(|| name.strip_prefix("math."))
        .unwrap_or(name);
    let f = match base {
        "exp" => Builtin::Exp,
        "sin" => Builtin::Sin,
        "cos" => Builtin::Cos,
        "tan" => Builtin::Tan,
        "sqrt" => Builtin::Sqrt,
        "ln" | "log" => Builtin::Ln,
        "abs" => Builtin::Abs,
        "arg" | "phase" => Builtin::Arg,
        "conj" | "conjugate" => Builtin::Conj,
        "re" | "real" => Builtin::Re,
        "im" | "imag" => Builtin::Im,
        "pow" => Builtin::Pow,
        "polar" | "rect" | "conv_from_polar" => Builtin::Polar,
        "cis" => Builtin::Cis,
        _ => return None,
    };
    Some(f)
}

impl Builtin {
    pub fn arity(self) -> usize {
        match self {
            Builtin::Pow | Builtin::Polar => 2,
            _ => 1,
        }
    }

    fn apply(self, args: &[Complex64]) -> Complex64 {
        let z = args[0];
        match self {
            Builtin::Exp => z.exp(),
            Builtin::Sin => z.sin(),
            Builtin::Cos => z.cos(),
            Builtin::Tan => z.tan(),
            Builtin::Sqrt => z.sqrt(),
            Builtin::Ln => z.ln(),
            Builtin::Abs => Complex64::new(z.norm(), 0.0),
            Builtin::Arg => Complex64::new(z.arg(), 0.0),
            Builtin::Conj => z.conj(),
            Builtin::Re => Complex64::new(z.re, 0.0),
            Builtin::Im => Complex64::new(z.im, 0.0),
            Builtin::Pow => power(z, args[1]),
            Builtin::Polar => Complex64::from_polar(z.re, args[1].re),
            Builtin::Cis => Complex64::from_polar(1.0, z.re),
        }
    }
}

/// Real powers stay on the real axis when the result is real.
fn power(base: Complex64, exponent: Complex64) -> Complex64 {
    let real_args = base.im == 0.0 && exponent.im == 0.0;
    if real_args && (base.re >= 0.0 || exponent.re.fract() == 0.0) {
        Complex64::new(base.re.powf(exponent.re), 0.0)
    } else {
        base.powc(exponent)
    }
}

// ── Environment ─────────────────────────────────────────────────────────────

/// Name resolution order: loop context, parameters, built-in constants.
#[derive(Debug, Clone, Copy)]
pub struct Environment<'a> {
    pub context: &'a LoopContext,
    pub params: &'a ParamTable,
}

impl<'a> Environment<'a> {
    pub fn new(context: &'a LoopContext, params: &'a ParamTable) -> Self {
        Self { context, params }
    }

    pub fn lookup(&self, name: &str) -> Option<Complex64> {
        if let Some(v) = self.context.get(name) {
            return Some(Complex64::new(v as f64, 0.0));
        }
        if let Some(v) = self.params.get(name) {
            return Some(Complex64::new(*v, 0.0));
        }
        builtin_constant(name)
    }

    pub fn snapshot(&self) -> EnvSnapshot {
        let mut bindings: Vec<(String, String)> = self
            .context
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect();
        bindings.extend(self.params.iter().map(|(n, v)| (n.clone(), v.to_string())));
        EnvSnapshot(bindings)
    }
}

/// Evaluate an AST. Errors are plain reasons; callers attach the text and
/// environment.
pub fn eval_expr(expr: &Expr, env: &Environment<'_>) -> Result<Complex64, String> {
    let value = match &expr.kind {
        ExprKind::Number(v) => Complex64::new(*v, 0.0),
        ExprKind::Imaginary(v) => Complex64::new(0.0, *v),
        ExprKind::Name(name) => env
            .lookup(name)
            .ok_or_else(|| format!("unbound name `{name}`"))?,
        ExprKind::Index { .. } => {
            return Err(format!(
                "address reference `{expr}` is not allowed in a coefficient"
            ))
        }
        ExprKind::Unary { op, operand } => {
            let v = eval_expr(operand, env)?;
            match op {
                UnaryOp::Neg => -v,
                UnaryOp::Plus => v,
            }
        }
        ExprKind::Binary { op, lhs, rhs } => {
            let l = eval_expr(lhs, env)?;
            let r = eval_expr(rhs, env)?;
            match op {
                BinOp::Add => l + r,
                BinOp::Sub => l - r,
                BinOp::Mul => l * r,
                BinOp::Div => {
                    if r.norm_sqr() == 0.0 {
                        return Err(format!("division by zero in `{expr}`"));
                    }
                    l / r
                }
                BinOp::Pow => power(l, r),
            }
        }
        ExprKind::Call { func, args } => {
            let builtin =
                builtin_function(func).ok_or_else(|| format!("unknown function `{func}`"))?;
            if args.len() != builtin.arity() {
                return Err(format!(
                    "`{func}` takes {} argument(s), got {}",
                    builtin.arity(),
                    args.len()
                ));
            }
            let values = args
                .iter()
                .map(|a| eval_expr(a, env))
                .collect::<Result<Vec<_>, _>>()?;
            builtin.apply(&values)
        }
    };
    if !value.re.is_finite() || !value.im.is_finite() {
        return Err(format!("non-finite result for `{expr}`"));
    }
    Ok(value)
}

// ── Cached evaluator ────────────────────────────────────────────────────────

#[derive(Debug)]
struct Compiled {
    expr: Expr,
    /// Precomputed value when the expression references no loop variable.
    constant: Option<Complex64>,
}

/// Evaluator shared by one build. Parses each distinct expression text once;
/// constant-only expressions are also evaluated once.
///
/// Safe to share across the rayon workers that build blocks in parallel.
#[derive(Debug)]
pub struct ExprEvaluator {
    params: ParamTable,
    loop_vars: HashSet<String>,
    cache: DashMap<String, Arc<Compiled>>,
}

impl ExprEvaluator {
    /// `loop_vars` are the names the expander bound; an expression naming
    /// any of them is never treated as constant.
    pub fn new(params: ParamTable, loop_vars: impl IntoIterator<Item = String>) -> Self {
        Self {
            params,
            loop_vars: loop_vars.into_iter().collect(),
            cache: DashMap::new(),
        }
    }

    pub fn params(&self) -> &ParamTable {
        &self.params
    }

    pub fn environment<'a>(&'a self, context: &'a LoopContext) -> Environment<'a> {
        Environment::new(context, &self.params)
    }

    /// Evaluate expression text under `context`.
    pub fn evaluate(&self, text: &str, context: &LoopContext) -> Result<Complex64, BuildError> {
        let env = self.environment(context);
        let compiled = self.compile(text, &env)?;
        if let Some(value) = compiled.constant {
            return Ok(value);
        }
        eval_expr(&compiled.expr, &env).map_err(|reason| failure(text, reason, &env))
    }

    /// A missing multiplier means 1.
    pub fn evaluate_multiplier(
        &self,
        text: Option<&str>,
        context: &LoopContext,
    ) -> Result<Complex64, BuildError> {
        match text {
            None => Ok(ONE),
            Some(t) if t.trim().is_empty() => Ok(ONE),
            Some(t) => self.evaluate(t, context),
        }
    }

    /// Whether `text` was classified as constant-only (parses it if needed).
    pub fn is_constant(&self, text: &str) -> Result<bool, BuildError> {
        let empty = LoopContext::new();
        let env = self.environment(&empty);
        Ok(self.compile(text, &env)?.constant.is_some())
    }

    /// Number of distinct expression texts compiled so far.
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    fn compile(&self, text: &str, env: &Environment<'_>) -> Result<Arc<Compiled>, BuildError> {
        if let Some(hit) = self.cache.get(text) {
            return Ok(Arc::clone(hit.value()));
        }

        let expr = parse_expr(text)
            .into_result()
            .map_err(|errs| failure(text, format!("parse error: {}", errs.join("; ")), env))?;

        let constant = if self.is_constant_only(&expr) {
            let empty = LoopContext::new();
            eval_expr(&expr, &Environment::new(&empty, &self.params)).ok()
        } else {
            None
        };

        let compiled = Arc::new(Compiled { expr, constant });
        self.cache.insert(text.to_string(), Arc::clone(&compiled));
        Ok(compiled)
    }

    fn is_constant_only(&self, expr: &Expr) -> bool {
        if expr.contains_index() {
            return false;
        }
        let mut constant = true;
        expr.for_each_name(&mut |name| {
            let resolvable =
                self.params.contains_key(name) || builtin_constant(name).is_some();
            if self.loop_vars.contains(name) || !resolvable {
                constant = false;
            }
        });
        constant
    }
}

fn failure(text: &str, reason: String, env: &Environment<'_>) -> BuildError {
    BuildError::ExpressionEvaluation {
        expr: text.to_string(),
        reason,
        env: env.snapshot(),
    }
}
