// AST node types for coefficient and condition expressions.
//
// A deliberately small tree: literals, names, indexed references, unary and
// binary arithmetic, and calls into the fixed built-in set. Every node
// carries a `SimpleSpan` into the expression text for error reporting.
//
// Preconditions: produced by the parser from a valid token stream.
// Postconditions: each node's span covers the text of the construct.
// Failure modes: none (data-only module).
// Side effects: none.

use std::fmt;

use chumsky::span::SimpleSpan;

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Real literal.
    Number(f64),
    /// Imaginary literal; the value is the imaginary part.
    Imaginary(f64),
    /// Bare name: loop variable, parameter, built-in constant, or (in
    /// conditions) a scalar state address.
    Name(String),
    /// Indexed reference `a[i][j]`; only meaningful in conditions.
    Index { name: String, indices: Vec<Expr> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call { func: String, args: Vec<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

/// `lhs op rhs`: the only condition shape the guard builder accepts.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub lhs: Expr,
    pub op: CmpOp,
    pub rhs: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Visit every variable-position name (`Name` nodes and the base name of
    /// `Index` nodes), in left-to-right order. Function names are not visited.
    pub fn for_each_name<'a>(&'a self, f: &mut impl FnMut(&'a str)) {
        match &self.kind {
            ExprKind::Number(_) | ExprKind::Imaginary(_) => {}
            ExprKind::Name(name) => f(name),
            ExprKind::Index { name, indices } => {
                f(name);
                for idx in indices {
                    idx.for_each_name(f);
                }
            }
            ExprKind::Unary { operand, .. } => operand.for_each_name(f),
            ExprKind::Binary { lhs, rhs, .. } => {
                lhs.for_each_name(f);
                rhs.for_each_name(f);
            }
            ExprKind::Call { args, .. } => {
                for arg in args {
                    arg.for_each_name(f);
                }
            }
        }
    }

    pub fn contains_index(&self) -> bool {
        match &self.kind {
            ExprKind::Index { .. } => true,
            ExprKind::Number(_) | ExprKind::Imaginary(_) | ExprKind::Name(_) => false,
            ExprKind::Unary { operand, .. } => operand.contains_index(),
            ExprKind::Binary { lhs, rhs, .. } => lhs.contains_index() || rhs.contains_index(),
            ExprKind::Call { args, .. } => args.iter().any(Expr::contains_index),
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Pow => "**",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        };
        write!(f, "{s}")
    }
}

/// Fully parenthesized rendering, used in tests and debug output.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Number(v) => write!(f, "{v}"),
            ExprKind::Imaginary(v) => write!(f, "{v}j"),
            ExprKind::Name(name) => write!(f, "{name}"),
            ExprKind::Index { name, indices } => {
                write!(f, "{name}")?;
                for idx in indices {
                    write!(f, "[{idx}]")?;
                }
                Ok(())
            }
            ExprKind::Unary { op, operand } => match op {
                UnaryOp::Neg => write!(f, "(-{operand})"),
                UnaryOp::Plus => write!(f, "(+{operand})"),
            },
            ExprKind::Binary { op, lhs, rhs } => write!(f, "({lhs} {op} {rhs})"),
            ExprKind::Call { func, args } => {
                write!(f, "{func}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
        }
    }
}
