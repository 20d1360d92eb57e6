// expand.rs — Loop expansion into context-annotated atomic operations
//
// Walks the IR tree, resolves every loop bound, and unrolls loops by
// exhaustive cartesian expansion (outer to inner). Each leaf becomes one
// `AtomicOp` tagged with the concrete bindings of its enclosing loops.
//
// Preconditions: the IR was deserialized successfully.
// Postconditions: no loop construct remains; op IDs follow expansion order;
//   conditionals are captured structurally and never folded.
// Failure modes: unresolvable or non-integral loop bound (`UnboundSymbol`).
// Side effects: none.

use indexmap::IndexSet;
use serde::Serialize;

use crate::address::LoopContext;
use crate::diag::{codes, BuildError, Diagnostic};
use crate::id::{IdAllocator, OpId};
use crate::ir::{AddressRef, Bound, LengthTable, Node, ParamTable, Program, Term};

// ── Output types ────────────────────────────────────────────────────────────

/// One unrolled leaf instruction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AtomicOp {
    pub id: OpId,
    pub context: LoopContext,
    pub kind: OpKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OpKind {
    Assign {
        target: AddressRef,
        terms: Vec<Term>,
        constant: Option<String>,
    },
    Call {
        name: String,
        args: Vec<String>,
    },
    Other {
        other: OtherOp,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OtherOp {
    Decl { name: String, init: Option<String> },
    /// Marks where a conditional was captured; indexes `Expansion::branches`.
    Branch { capture: usize },
}

/// Both arms of an `if`, expanded under the same context but kept out of
/// the flat operation sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BranchCapture {
    pub placeholder: OpId,
    pub cond: String,
    pub context: LoopContext,
    pub then_ops: Vec<AtomicOp>,
    pub else_ops: Vec<AtomicOp>,
    /// `while` conditions found inside either arm. Never guards.
    pub conditions: Vec<ConditionSite>,
}

/// A `while` condition to be turned into a guard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditionSite {
    pub cond: String,
    pub context: LoopContext,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Expansion {
    pub ops: Vec<AtomicOp>,
    pub branches: Vec<BranchCapture>,
    pub conditions: Vec<ConditionSite>,
    /// Every loop variable name bound anywhere in the program.
    pub loop_vars: IndexSet<String>,
    #[serde(skip)]
    pub diagnostics: Vec<Diagnostic>,
}

impl Expansion {
    pub fn assign_count(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op.kind, OpKind::Assign { .. }))
            .count()
    }
}

// ── Expander ────────────────────────────────────────────────────────────────

/// Expand `program` under the given tables.
pub fn expand(
    program: &Program,
    params: &ParamTable,
    lengths: &LengthTable,
) -> Result<Expansion, BuildError> {
    let mut expander = Expander {
        params,
        lengths,
        ids: IdAllocator::new(),
        out: Expansion::default(),
        branch_conditions: Vec::new(),
    };
    let mut ops = Vec::new();
    expander.expand_nodes(&program.body, &LoopContext::new(), &mut ops, false)?;
    expander.out.ops = ops;
    Ok(expander.out)
}

struct Expander<'a> {
    params: &'a ParamTable,
    lengths: &'a LengthTable,
    ids: IdAllocator,
    out: Expansion,
    /// Conditions met inside the innermost open branch.
    branch_conditions: Vec<ConditionSite>,
}

impl Expander<'_> {
    fn expand_nodes(
        &mut self,
        nodes: &[Node],
        context: &LoopContext,
        ops: &mut Vec<AtomicOp>,
        in_branch: bool,
    ) -> Result<(), BuildError> {
        for node in nodes {
            self.expand_node(node, context, ops, in_branch)?;
        }
        Ok(())
    }

    fn expand_node(
        &mut self,
        node: &Node,
        context: &LoopContext,
        ops: &mut Vec<AtomicOp>,
        in_branch: bool,
    ) -> Result<(), BuildError> {
        match node {
            Node::Loop {
                var,
                start,
                bound,
                body,
            } => {
                self.out.loop_vars.insert(var.clone());
                let end = self.resolve_bound(var, bound.as_ref(), context)?;
                for value in *start..end {
                    let inner = context.with(var, value);
                    self.expand_nodes(body, &inner, ops, in_branch)?;
                }
            }
            Node::Assign {
                target,
                terms,
                constant,
            } => {
                self.push(
                    ops,
                    context,
                    OpKind::Assign {
                        target: target.clone(),
                        terms: terms.clone(),
                        constant: constant.clone(),
                    },
                );
            }
            Node::Call { name, args } => {
                self.push(
                    ops,
                    context,
                    OpKind::Call {
                        name: name.clone(),
                        args: args.clone(),
                    },
                );
            }
            Node::Decl { name, init } => {
                self.push(
                    ops,
                    context,
                    OpKind::Other {
                        other: OtherOp::Decl {
                            name: name.clone(),
                            init: init.clone(),
                        },
                    },
                );
            }
            Node::If {
                cond,
                then,
                otherwise,
            } => {
                let capture = self.out.branches.len();
                let placeholder = self.push(
                    ops,
                    context,
                    OpKind::Other {
                        other: OtherOp::Branch { capture },
                    },
                );
                // Reserve the slot so nested captures keep source order.
                self.out.branches.push(BranchCapture {
                    placeholder,
                    cond: cond.clone(),
                    context: context.clone(),
                    then_ops: Vec::new(),
                    else_ops: Vec::new(),
                    conditions: Vec::new(),
                });
                let outer = std::mem::take(&mut self.branch_conditions);
                let mut then_ops = Vec::new();
                self.expand_nodes(then, context, &mut then_ops, true)?;
                let mut else_ops = Vec::new();
                self.expand_nodes(otherwise, context, &mut else_ops, true)?;
                let nested = std::mem::replace(&mut self.branch_conditions, outer);

                let mut message = format!("conditional on `{cond}` is not folded into the affine map");
                if !nested.is_empty() {
                    let dropped: Vec<String> =
                        nested.iter().map(|site| format!("`{}`", site.cond)).collect();
                    message.push_str(&format!(
                        "; loop conditions {} inside it produce no guard",
                        dropped.join(", ")
                    ));
                }
                let entry = &mut self.out.branches[capture];
                entry.then_ops = then_ops;
                entry.else_ops = else_ops;
                entry.conditions = nested;

                tracing::warn!(%cond, %context, "conditional branch captured but not folded");
                self.out.diagnostics.push(
                    Diagnostic::warning(codes::W0201, message)
                        .with_origin(format!("{placeholder} {context}")),
                );
            }
            Node::While { cond, body } => {
                let site = ConditionSite {
                    cond: cond.clone(),
                    context: context.clone(),
                };
                if in_branch {
                    self.branch_conditions.push(site);
                } else {
                    self.out.conditions.push(site);
                }
                self.expand_nodes(body, context, ops, in_branch)?;
            }
        }
        Ok(())
    }

    fn push(&mut self, ops: &mut Vec<AtomicOp>, context: &LoopContext, kind: OpKind) -> OpId {
        let id = self.ids.alloc_op();
        ops.push(AtomicOp {
            id,
            context: context.clone(),
            kind,
        });
        id
    }

    /// Loop-length table first, then parameters; a missing bound falls back
    /// to the loop-length entry for the loop variable itself.
    fn resolve_bound(
        &self,
        var: &str,
        bound: Option<&Bound>,
        context: &LoopContext,
    ) -> Result<i64, BuildError> {
        let unbound = |symbol: &str, detail: String| BuildError::UnboundSymbol {
            symbol: symbol.to_string(),
            loop_var: var.to_string(),
            context: context.clone(),
            detail,
        };

        let symbol = match bound {
            Some(Bound::Const(n)) => return Ok(*n),
            Some(Bound::Symbol(s)) => s.as_str(),
            None => {
                return self.lengths.get(var).copied().ok_or_else(|| {
                    unbound(var, "loop has no bound and no loop-length entry".into())
                })
            }
        };

        if let Ok(n) = symbol.trim().parse::<i64>() {
            return Ok(n);
        }
        if let Some(n) = self.lengths.get(symbol) {
            return Ok(*n);
        }
        match self.params.get(symbol) {
            Some(v) if v.is_finite() && v.fract() == 0.0 => Ok(*v as i64),
            Some(v) => Err(unbound(
                symbol,
                format!("parameter value {v} is not an integer"),
            )),
            None => Err(unbound(
                symbol,
                "not in the loop-length table or the parameter table".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IndexExpr;

    fn assign(target: AddressRef, terms: Vec<Term>) -> Node {
        Node::Assign {
            target,
            terms,
            constant: None,
        }
    }

    fn lengths(entries: &[(&str, i64)]) -> LengthTable {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn nested_loops_expand_outer_to_inner() {
        let program = Program {
            body: vec![Node::Loop {
                var: "i".into(),
                start: 0,
                bound: Some(Bound::Const(2)),
                body: vec![Node::Loop {
                    var: "j".into(),
                    start: 0,
                    bound: Some(Bound::Symbol("M".into())),
                    body: vec![assign(
                        AddressRef::indexed("a", IndexExpr::var("j")),
                        vec![],
                    )],
                }],
            }],
        };
        let exp = expand(&program, &ParamTable::new(), &lengths(&[("M", 3)])).unwrap();
        let contexts: Vec<String> = exp.ops.iter().map(|op| op.context.to_string()).collect();
        assert_eq!(
            contexts,
            vec![
                "{i=0, j=0}",
                "{i=0, j=1}",
                "{i=0, j=2}",
                "{i=1, j=0}",
                "{i=1, j=1}",
                "{i=1, j=2}"
            ]
        );
        let ids: Vec<u32> = exp.ops.iter().map(|op| op.id.0).collect();
        assert_eq!(ids, (0..6).collect::<Vec<_>>());
        assert_eq!(exp.loop_vars.iter().collect::<Vec<_>>(), vec!["i", "j"]);
    }

    #[test]
    fn bound_falls_back_to_params_then_fails() {
        let mut params = ParamTable::new();
        params.insert("N".into(), 2.0);
        let program = Program {
            body: vec![Node::Loop {
                var: "k".into(),
                start: 0,
                bound: Some(Bound::Symbol("N".into())),
                body: vec![Node::Call {
                    name: "f".into(),
                    args: vec![],
                }],
            }],
        };
        assert_eq!(expand(&program, &params, &LengthTable::new()).unwrap().ops.len(), 2);

        let err = expand(&program, &ParamTable::new(), &LengthTable::new()).unwrap_err();
        assert!(matches!(
            err,
            BuildError::UnboundSymbol { ref symbol, ref loop_var, .. } if symbol == "N" && loop_var == "k"
        ));
    }

    #[test]
    fn fractional_parameter_bound_is_rejected() {
        let mut params = ParamTable::new();
        params.insert("N".into(), 2.5);
        let program = Program {
            body: vec![Node::Loop {
                var: "k".into(),
                start: 0,
                bound: Some(Bound::Symbol("N".into())),
                body: vec![],
            }],
        };
        assert!(expand(&program, &params, &LengthTable::new()).is_err());
    }

    #[test]
    fn missing_bound_uses_loop_length_of_variable() {
        let program = Program {
            body: vec![Node::Loop {
                var: "k".into(),
                start: 1,
                bound: None,
                body: vec![Node::Call {
                    name: "f".into(),
                    args: vec![],
                }],
            }],
        };
        let exp = expand(&program, &ParamTable::new(), &lengths(&[("k", 4)])).unwrap();
        assert_eq!(exp.ops.len(), 3);
        assert_eq!(exp.ops[0].context.get("k"), Some(1));
    }

    #[test]
    fn branches_are_captured_not_inlined() {
        let program = Program {
            body: vec![Node::If {
                cond: "x < 1".into(),
                then: vec![assign(AddressRef::scalar("x"), vec![])],
                otherwise: vec![],
            }],
        };
        let exp = expand(&program, &ParamTable::new(), &LengthTable::new()).unwrap();
        assert_eq!(exp.ops.len(), 1);
        assert!(matches!(
            exp.ops[0].kind,
            OpKind::Other { other: OtherOp::Branch { capture: 0 } }
        ));
        assert_eq!(exp.branches[0].then_ops.len(), 1);
        assert_eq!(exp.assign_count(), 0);
        assert_eq!(exp.diagnostics[0].code, Some(codes::W0201));
    }

    #[test]
    fn while_inside_branch_is_recorded_on_the_capture() {
        let program = Program {
            body: vec![Node::If {
                cond: "x < 1".into(),
                then: vec![Node::While {
                    cond: "x < 5".into(),
                    body: vec![assign(AddressRef::scalar("x"), vec![])],
                }],
                otherwise: vec![],
            }],
        };
        let exp = expand(&program, &ParamTable::new(), &LengthTable::new()).unwrap();
        assert!(exp.conditions.is_empty());
        assert_eq!(exp.branches[0].conditions.len(), 1);
        assert_eq!(exp.branches[0].conditions[0].cond, "x < 5");
        let warning = &exp.diagnostics[0];
        assert_eq!(warning.code, Some(codes::W0201));
        assert!(warning.message.contains("`x < 5`"), "{}", warning.message);
    }

    #[test]
    fn while_body_expands_once_and_records_condition() {
        let program = Program {
            body: vec![Node::While {
                cond: "x < 5".into(),
                body: vec![assign(
                    AddressRef::scalar("x"),
                    vec![Term::new(AddressRef::scalar("x"), None)],
                )],
            }],
        };
        let exp = expand(&program, &ParamTable::new(), &LengthTable::new()).unwrap();
        assert_eq!(exp.assign_count(), 1);
        assert_eq!(exp.conditions.len(), 1);
        assert_eq!(exp.conditions[0].cond, "x < 5");
        assert!(exp.conditions[0].context.is_empty());
    }
}
