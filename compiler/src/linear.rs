// linear.rs — Affine normal form for condition operands
//
// Reduces one side of a halting condition to `Σ aᵢ·addrᵢ + b`. Closed
// subexpressions (everything resolvable in the environment) fold to real
// constants through the evaluator; names the environment does not know are
// scalar state addresses; indexed references resolve to concrete addresses.
//
// Preconditions: the environment is the condition site's loop context plus
//   the build's parameters.
// Postconditions: no zero coefficients remain in the returned form.
// Failure modes: any non-affine construct (product of two state references,
//   division by a state reference, power or function of a state reference),
//   complex-valued constants, non-integral indices.
// Side effects: none.

use indexmap::IndexMap;

use crate::address::Address;
use crate::ast::{BinOp, Expr, ExprKind, UnaryOp};
use crate::eval::{eval_expr, Environment};

/// Imaginary parts below this are treated as zero.
const IMAG_EPS: f64 = 1e-12;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinearForm {
    /// Coefficients in first-mention order.
    pub terms: IndexMap<Address, f64>,
    pub constant: f64,
}

impl LinearForm {
    pub fn constant(value: f64) -> Self {
        Self {
            terms: IndexMap::new(),
            constant: value,
        }
    }

    pub fn address(address: Address) -> Self {
        let mut terms = IndexMap::new();
        terms.insert(address, 1.0);
        Self {
            terms,
            constant: 0.0,
        }
    }

    /// True when no state address carries a coefficient.
    pub fn is_constant(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn scale(mut self, k: f64) -> Self {
        for coeff in self.terms.values_mut() {
            *coeff *= k;
        }
        self.constant *= k;
        self.prune()
    }

    pub fn add(mut self, other: LinearForm) -> Self {
        for (address, coeff) in other.terms {
            *self.terms.entry(address).or_insert(0.0) += coeff;
        }
        self.constant += other.constant;
        self.prune()
    }

    pub fn sub(self, other: LinearForm) -> Self {
        self.add(other.scale(-1.0))
    }

    fn prune(mut self) -> Self {
        self.terms.retain(|_, c| *c != 0.0);
        self
    }
}

/// Normalize `expr` to affine form. Errors are plain reasons.
pub fn normalize(expr: &Expr, env: &Environment<'_>) -> Result<LinearForm, String> {
    if is_closed(expr, env) {
        return real_value(expr, env).map(LinearForm::constant);
    }

    match &expr.kind {
        ExprKind::Name(name) => Ok(LinearForm::address(Address::scalar(name.clone()))),
        ExprKind::Index { name, indices } => {
            let resolved = indices
                .iter()
                .map(|idx| integral_index(idx, env))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(LinearForm::address(Address::new(name.clone(), resolved)))
        }
        ExprKind::Unary { op, operand } => {
            let inner = normalize(operand, env)?;
            Ok(match op {
                UnaryOp::Neg => inner.scale(-1.0),
                UnaryOp::Plus => inner,
            })
        }
        ExprKind::Binary { op, lhs, rhs } => {
            let l = normalize(lhs, env)?;
            let r = normalize(rhs, env)?;
            match op {
                BinOp::Add => Ok(l.add(r)),
                BinOp::Sub => Ok(l.sub(r)),
                BinOp::Mul => {
                    if r.is_constant() {
                        Ok(l.scale(r.constant))
                    } else if l.is_constant() {
                        Ok(r.scale(l.constant))
                    } else {
                        Err(format!("`{expr}` multiplies two state references"))
                    }
                }
                BinOp::Div => {
                    if !r.is_constant() {
                        Err(format!("`{expr}` divides by a state reference"))
                    } else if r.constant == 0.0 {
                        Err(format!("division by zero in `{expr}`"))
                    } else {
                        Ok(l.scale(1.0 / r.constant))
                    }
                }
                BinOp::Pow => Err(format!("`{expr}` raises a state reference to a power")),
            }
        }
        ExprKind::Call { func, .. } => {
            Err(format!("`{func}` applied to a state reference is not affine"))
        }
        // Literals are always closed.
        ExprKind::Number(_) | ExprKind::Imaginary(_) => real_value(expr, env).map(LinearForm::constant),
    }
}

/// Every name resolves in the environment and no indexed reference appears.
fn is_closed(expr: &Expr, env: &Environment<'_>) -> bool {
    if expr.contains_index() {
        return false;
    }
    let mut closed = true;
    expr.for_each_name(&mut |name| {
        if env.lookup(name).is_none() {
            closed = false;
        }
    });
    closed
}

fn real_value(expr: &Expr, env: &Environment<'_>) -> Result<f64, String> {
    let value = eval_expr(expr, env)?;
    if value.im.abs() >= IMAG_EPS {
        return Err(format!("`{expr}` has a complex value {value}"));
    }
    Ok(value.re)
}

fn integral_index(expr: &Expr, env: &Environment<'_>) -> Result<i64, String> {
    if !is_closed(expr, env) {
        return Err(format!("index `{expr}` depends on state"));
    }
    let value = real_value(expr, env)?;
    if value.fract() != 0.0 {
        return Err(format!("index `{expr}` evaluates to non-integer {value}"));
    }
    Ok(value as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::LoopContext;
    use crate::ir::ParamTable;
    use crate::parser::parse_expr;

    fn form(source: &str, ctx: &LoopContext, params: &ParamTable) -> Result<LinearForm, String> {
        let expr = parse_expr(source).into_result().unwrap();
        normalize(&expr, &Environment::new(ctx, params))
    }

    #[test]
    fn scalar_and_constant() {
        let ctx = LoopContext::new();
        let params = ParamTable::new();
        let f = form("2 * x - 3 + x", &ctx, &params).unwrap();
        assert_eq!(f.terms.get(&Address::scalar("x")), Some(&3.0));
        assert_eq!(f.constant, -3.0);
    }

    #[test]
    fn indexed_reference_uses_loop_context() {
        let ctx = LoopContext::new().with("i", 2);
        let mut params = ParamTable::new();
        params.insert("N".into(), 4.0);
        let f = form("a[i + 1] / 2 + N", &ctx, &params).unwrap();
        assert_eq!(f.terms.get(&Address::new("a", vec![3])), Some(&0.5));
        assert_eq!(f.constant, 4.0);
    }

    #[test]
    fn cancelled_terms_are_pruned() {
        let f = form("x - x + 1", &LoopContext::new(), &ParamTable::new()).unwrap();
        assert!(f.is_constant());
        assert_eq!(f.constant, 1.0);
    }

    #[test]
    fn non_affine_forms_fail() {
        let ctx = LoopContext::new();
        let params = ParamTable::new();
        for src in ["x * y", "1 / x", "x ** 2", "sin(x)", "a[x]"] {
            assert!(form(src, &ctx, &params).is_err(), "{src} should not normalize");
        }
    }

    #[test]
    fn complex_constant_fails() {
        assert!(form("x + 1j", &LoopContext::new(), &ParamTable::new()).is_err());
    }
}
