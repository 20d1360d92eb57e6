// ir.rs — Block-graph IR consumed by the expander
//
// The front end (statement extractor + translator) produces this tree as
// JSON. References are already typed: every source term names its address
// and carries its multiplier expression, so no string re-parsing of
// right-hand sides happens downstream.
//
// Preconditions: none (data-only module).
// Postconditions: none.
// Failure modes: malformed JSON is rejected by serde at load time.
// Side effects: none.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Parameter table: name → numeric value.
pub type ParamTable = IndexMap<String, f64>;

/// Loop-length table: bound symbol or loop variable → iteration count.
pub type LengthTable = IndexMap<String, i64>;

// ── Root ──

/// A whole program: top-level nodes in source order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub body: Vec<Node>,
}

impl Program {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

// ── Nodes ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Node {
    /// `for var in start..bound { body }`
    Loop {
        var: String,
        #[serde(default)]
        start: i64,
        /// Omitted bound: the loop-length table entry for `var` is used.
        #[serde(default)]
        bound: Option<Bound>,
        #[serde(default)]
        body: Vec<Node>,
    },
    /// `target = Σ multiplier·source + constant`
    Assign {
        target: AddressRef,
        #[serde(default)]
        terms: Vec<Term>,
        #[serde(default)]
        constant: Option<String>,
    },
    Call {
        name: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Decl {
        name: String,
        #[serde(default)]
        init: Option<String>,
    },
    If {
        cond: String,
        #[serde(default)]
        then: Vec<Node>,
        #[serde(default, rename = "else")]
        otherwise: Vec<Node>,
    },
    /// The body is one step of the recurrence; `cond` becomes a guard.
    While {
        cond: String,
        #[serde(default)]
        body: Vec<Node>,
    },
}

/// Loop upper bound: a literal count or a symbol resolved at expansion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Bound {
    Const(i64),
    Symbol(String),
}

// ── References ──

/// Symbolic memory reference, e.g. `X[k + 2·m + 1]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRef {
    pub name: String,
    #[serde(default)]
    pub indices: Vec<IndexExpr>,
}

impl AddressRef {
    pub fn scalar(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            indices: Vec::new(),
        }
    }

    /// One-dimensional reference with a single affine index.
    pub fn indexed(name: impl Into<String>, index: IndexExpr) -> Self {
        Self {
            name: name.into(),
            indices: vec![index],
        }
    }
}

/// Affine index `Σ coeffs[var]·var + offset`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexExpr {
    #[serde(default)]
    pub coeffs: IndexMap<String, i64>,
    #[serde(default)]
    pub offset: i64,
}

impl IndexExpr {
    pub fn constant(offset: i64) -> Self {
        Self {
            coeffs: IndexMap::new(),
            offset,
        }
    }

    pub fn var(name: &str) -> Self {
        Self::affine(&[(name, 1)], 0)
    }

    pub fn affine(coeffs: &[(&str, i64)], offset: i64) -> Self {
        Self {
            coeffs: coeffs.iter().map(|(v, c)| (v.to_string(), *c)).collect(),
            offset,
        }
    }
}

/// One right-hand-side term: `multiplier · address` (multiplier defaults to 1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    pub address: AddressRef,
    #[serde(default)]
    pub multiplier: Option<String>,
}

impl Term {
    pub fn new(address: AddressRef, multiplier: Option<&str>) -> Self {
        Self {
            address,
            multiplier: multiplier.map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_loop_with_symbolic_bound() {
        let json = r#"{ "body": [
            { "op": "loop", "var": "k", "bound": "N", "body": [
                { "op": "assign",
                  "target": { "name": "X", "indices": [ { "coeffs": { "k": 1 } } ] },
                  "terms": [ { "address": { "name": "X", "indices": [ { "coeffs": { "k": 1 }, "offset": 1 } ] },
                               "multiplier": "2" } ] }
            ] }
        ] }"#;
        let program = Program::from_json(json).unwrap();
        let Node::Loop { var, bound, body, start } = &program.body[0] else {
            panic!("expected loop");
        };
        assert_eq!(var, "k");
        assert_eq!(*start, 0);
        assert_eq!(bound, &Some(Bound::Symbol("N".into())));
        let Node::Assign { terms, constant, .. } = &body[0] else {
            panic!("expected assign");
        };
        assert_eq!(terms[0].multiplier.as_deref(), Some("2"));
        assert_eq!(terms[0].address.indices[0].offset, 1);
        assert!(constant.is_none());
    }

    #[test]
    fn parse_literal_bound_and_branches() {
        let json = r#"{ "body": [
            { "op": "loop", "var": "i", "bound": 3, "body": [] },
            { "op": "if", "cond": "x < 1", "then": [ { "op": "call", "name": "f" } ], "else": [] },
            { "op": "while", "cond": "x < 5", "body": [] },
            { "op": "decl", "name": "x", "init": "0" }
        ] }"#;
        let program = Program::from_json(json).unwrap();
        assert!(matches!(
            program.body[0],
            Node::Loop { bound: Some(Bound::Const(3)), .. }
        ));
        let Node::If { then, otherwise, .. } = &program.body[1] else {
            panic!("expected if");
        };
        assert_eq!(then.len(), 1);
        assert!(otherwise.is_empty());
        assert!(matches!(program.body[3], Node::Decl { init: Some(_), .. }));
    }

    #[test]
    fn unknown_op_is_rejected() {
        let json = r#"{ "body": [ { "op": "goto", "label": "L1" } ] }"#;
        assert!(Program::from_json(json).is_err());
    }
}
