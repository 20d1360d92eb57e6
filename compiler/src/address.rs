// address.rs — Concrete addresses and the de-duplicating address table
//
// Turns symbolic IR references (`X[k + m]`) into concrete addresses (`X[3]`)
// under a loop context, and assigns each distinct address a stable slot in
// first-occurrence order.
//
// Preconditions: loop contexts come from the expander (outer-to-inner order).
// Postconditions: slots are dense `0..len`, never reassigned within a table.
// Failure modes: index references a loop variable absent from the context.
// Side effects: none.

use std::fmt;

use indexmap::IndexSet;
use serde::Serialize;

use crate::diag::BuildError;
use crate::ir::{AddressRef, IndexExpr};

// ── Loop context ────────────────────────────────────────────────────────────

/// Concrete bindings of every enclosing loop variable, outer to inner.
///
/// Equality and hashing follow the binding order, so two contexts are the
/// same block key only if they bind the same variables in the same nesting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct LoopContext {
    bindings: Vec<(String, i64)>,
}

impl LoopContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a copy with `var` bound to `value`. An inner loop reusing an
    /// outer variable name rebinds it in place.
    pub fn with(&self, var: &str, value: i64) -> Self {
        let mut next = self.clone();
        match next.bindings.iter_mut().find(|(name, _)| name == var) {
            Some(slot) => slot.1 = value,
            None => next.bindings.push((var.to_string(), value)),
        }
        next
    }

    pub fn get(&self, var: &str) -> Option<i64> {
        self.bindings
            .iter()
            .find(|(name, _)| name == var)
            .map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.bindings.iter().map(|(n, v)| (n.as_str(), *v))
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }
}

impl fmt::Display for LoopContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.bindings.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        write!(f, "}}")
    }
}

// ── Address ─────────────────────────────────────────────────────────────────

/// A concrete memory reference: name plus resolved indices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    pub name: String,
    pub indices: Vec<i64>,
}

impl Address {
    pub fn new(name: impl Into<String>, indices: Vec<i64>) -> Self {
        Self {
            name: name.into(),
            indices,
        }
    }

    /// An unindexed address such as a scalar variable `x`.
    pub fn scalar(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for idx in &self.indices {
            write!(f, "[{idx}]")?;
        }
        Ok(())
    }
}

impl Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ── Index resolution ────────────────────────────────────────────────────────

/// Evaluate `Σ coefficient·loop_var + offset` for one index position.
pub fn resolve_index(
    name: &str,
    index: &IndexExpr,
    context: &LoopContext,
) -> Result<i64, BuildError> {
    let failure = |var: &str, reason: &str| BuildError::IndexEvaluation {
        address: name.to_string(),
        variable: var.to_string(),
        reason: reason.to_string(),
        context: context.clone(),
    };

    let mut value = index.offset;
    for (var, coeff) in &index.coeffs {
        let bound = context
            .get(var)
            .ok_or_else(|| failure(var, "variable is not bound by an enclosing loop"))?;
        value = coeff
            .checked_mul(bound)
            .and_then(|term| value.checked_add(term))
            .ok_or_else(|| failure(var, "index arithmetic overflows i64"))?;
    }
    Ok(value)
}

/// Resolve every index of a symbolic reference under `context`.
pub fn resolve(reference: &AddressRef, context: &LoopContext) -> Result<Address, BuildError> {
    let indices = reference
        .indices
        .iter()
        .map(|idx| resolve_index(&reference.name, idx, context))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Address::new(reference.name.clone(), indices))
}

// ── Address table ───────────────────────────────────────────────────────────

/// Registry mapping each distinct address to a stable slot.
///
/// Slots are assigned in first-occurrence order; registering a known address
/// returns its existing slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddressTable {
    slots: IndexSet<Address>,
}

impl AddressTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, address: Address) -> usize {
        self.slots.insert_full(address).0
    }

    pub fn slot_of(&self, address: &Address) -> Option<usize> {
        self.slots.get_index_of(address)
    }

    pub fn address(&self, slot: usize) -> Option<&Address> {
        self.slots.get_index(slot)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Addresses in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Address> {
        self.slots.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn idx(coeffs: &[(&str, i64)], offset: i64) -> IndexExpr {
        IndexExpr {
            coeffs: coeffs
                .iter()
                .map(|(v, c)| (v.to_string(), *c))
                .collect::<IndexMap<_, _>>(),
            offset,
        }
    }

    #[test]
    fn resolve_affine_index() {
        let ctx = LoopContext::new().with("k", 2).with("m", 3);
        let index = idx(&[("k", 1), ("m", 4)], 1);
        assert_eq!(resolve_index("X", &index, &ctx).unwrap(), 2 + 12 + 1);
    }

    #[test]
    fn resolve_missing_loop_variable_fails() {
        let ctx = LoopContext::new().with("k", 0);
        let index = idx(&[("m", 1)], 0);
        let err = resolve_index("X", &index, &ctx).unwrap_err();
        assert!(matches!(
            err,
            BuildError::IndexEvaluation { ref variable, .. } if variable == "m"
        ));
    }

    #[test]
    fn resolve_overflowing_index_fails() {
        let ctx = LoopContext::new().with("k", 2);
        let index = idx(&[("k", i64::MAX)], 0);
        let err = resolve_index("X", &index, &ctx).unwrap_err();
        assert!(matches!(
            err,
            BuildError::IndexEvaluation { ref variable, ref reason, .. }
                if variable == "k" && reason.contains("overflow")
        ));

        let near_max = idx(&[("k", 1)], i64::MAX - 1);
        assert!(resolve_index("X", &near_max, &ctx).is_err());
        assert_eq!(resolve_index("X", &near_max, &LoopContext::new().with("k", 1)).unwrap(), i64::MAX);
    }

    #[test]
    fn resolve_multi_dimensional_reference() {
        let ctx = LoopContext::new().with("i", 1).with("j", 0);
        let reference = AddressRef {
            name: "rows".into(),
            indices: vec![idx(&[("i", 1)], 0), idx(&[("j", 1)], 0)],
        };
        assert_eq!(resolve(&reference, &ctx).unwrap().to_string(), "rows[1][0]");
    }

    #[test]
    fn register_is_idempotent_and_ordered() {
        let mut table = AddressTable::new();
        assert_eq!(table.register(Address::new("a", vec![1])), 0);
        assert_eq!(table.register(Address::scalar("x")), 1);
        assert_eq!(table.register(Address::new("a", vec![1])), 0);
        assert_eq!(table.len(), 2);
        assert_eq!(table.slot_of(&Address::scalar("x")), Some(1));
        assert_eq!(table.slot_of(&Address::scalar("y")), None);
        let names: Vec<String> = table.iter().map(|a| a.to_string()).collect();
        assert_eq!(names, vec!["a[1]", "x"]);
    }

    #[test]
    fn rebinding_keeps_nesting_position() {
        let ctx = LoopContext::new().with("i", 0).with("j", 1).with("i", 5);
        assert_eq!(ctx.to_string(), "{i=5, j=1}");
        assert_eq!(ctx.len(), 2);
    }
}
