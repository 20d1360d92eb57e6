// affine.rs — Per-block affine composition and global assembly
//
// Groups assignments by concrete loop context (one block per context, in
// first-occurrence order), composes each block's assignments sequentially
// into a local map `(M, c)`, then assembles the block-diagonal global map.
//
// Preconditions: expansion succeeded; the evaluator was built from the same
//   parameters and the expansion's loop variables.
// Postconditions: all blocks share local dimension `k_local`;
//   `m_global` is `k_local·B` square; global slot order is block order, then
//   local slot order.
// Failure modes: index or expression errors, unregistered source address,
//   inconsistent block dimension. The first error in block order wins.
// Side effects: none.

use indexmap::IndexMap;
use ndarray::{s, Array1, Array2};
use num_complex::Complex64;
use rayon::prelude::*;

use crate::address::{resolve, Address, AddressTable, LoopContext};
use crate::diag::BuildError;
use crate::eval::ExprEvaluator;
use crate::expand::{AtomicOp, Expansion, OpKind};
use crate::id::{BlockId, IdAllocator};
use crate::ir::{AddressRef, Term};

const ZERO: Complex64 = Complex64::new(0.0, 0.0);

// ── Single assignment ───────────────────────────────────────────────────────

/// Sparse form of one assignment's `(M_assign, c_assign)`: identity except
/// row `row`, which holds `coeffs`; `c_assign` is zero except `constant`
/// at `row`.
#[derive(Debug, Clone, PartialEq)]
pub struct RowUpdate {
    pub row: usize,
    /// `(source slot, multiplier)`; repeated slots accumulate.
    pub coeffs: Vec<(usize, Complex64)>,
    pub constant: Complex64,
}

impl RowUpdate {
    /// Dense `(M_assign, c_assign)` over a block of dimension `k`.
    pub fn to_dense(&self, k: usize) -> (Array2<Complex64>, Array1<Complex64>) {
        let mut m = Array2::<Complex64>::eye(k);
        m.row_mut(self.row).fill(ZERO);
        for &(slot, value) in &self.coeffs {
            m[[self.row, slot]] += value;
        }
        let mut c = Array1::<Complex64>::zeros(k);
        c[self.row] = self.constant;
        (m, c)
    }

    /// `M ← M_assign·M`, `c ← M_assign·c + c_assign`, touching only the
    /// target row. The new row is computed from the old `M` before writing.
    pub fn compose_into(&self, m: &mut Array2<Complex64>, c: &mut Array1<Complex64>) {
        let mut row = Array1::<Complex64>::zeros(m.ncols());
        let mut offset = self.constant;
        for &(slot, value) in &self.coeffs {
            row.scaled_add(value, &m.row(slot));
            offset += value * c[slot];
        }
        m.row_mut(self.row).assign(&row);
        c[self.row] = offset;
    }
}

// ── Block ───────────────────────────────────────────────────────────────────

/// One loop-context block with its local map.
#[derive(Debug, Clone)]
pub struct BlockSystem {
    pub id: BlockId,
    pub context: LoopContext,
    pub addresses: AddressTable,
    pub m: Array2<Complex64>,
    pub c: Array1<Complex64>,
}

impl BlockSystem {
    pub fn dim(&self) -> usize {
        self.addresses.len()
    }

    /// Rendered control-block label, e.g. `block{k=0, m=1}`.
    pub fn label(&self) -> String {
        format!("block{}", self.context)
    }
}

/// Build one block from its assignments, in source order.
pub fn build_block(
    id: BlockId,
    context: &LoopContext,
    ops: &[&AtomicOp],
    evaluator: &ExprEvaluator,
) -> Result<BlockSystem, BuildError> {
    let label = format!("block{context}");

    // Scan: targets and sources in occurrence order.
    let mut addresses = AddressTable::new();
    for (target, terms, _) in ops.iter().filter_map(|op| assignment(op)) {
        addresses.register(resolve(target, context)?);
        for term in terms {
            addresses.register(resolve(&term.address, context)?);
        }
    }

    let k = addresses.len();
    let mut m = Array2::<Complex64>::eye(k);
    let mut c = Array1::<Complex64>::zeros(k);

    for (target, terms, constant) in ops.iter().filter_map(|op| assignment(op)) {
        let update = row_update(target, terms, constant, context, &addresses, evaluator, &label)?;
        update.compose_into(&mut m, &mut c);
    }

    Ok(BlockSystem {
        id,
        context: context.clone(),
        addresses,
        m,
        c,
    })
}

fn assignment(op: &AtomicOp) -> Option<(&AddressRef, &[Term], Option<&str>)> {
    match &op.kind {
        OpKind::Assign {
            target,
            terms,
            constant,
        } => Some((target, terms.as_slice(), constant.as_deref())),
        _ => None,
    }
}

fn row_update(
    target: &AddressRef,
    terms: &[Term],
    constant: Option<&str>,
    context: &LoopContext,
    addresses: &AddressTable,
    evaluator: &ExprEvaluator,
    label: &str,
) -> Result<RowUpdate, BuildError> {
    let slot = |address: Address| {
        addresses
            .slot_of(&address)
            .ok_or_else(|| BuildError::UnregisteredAddress {
                address: address.to_string(),
                block: label.to_string(),
            })
    };

    let row = slot(resolve(target, context)?)?;
    let mut coeffs = Vec::with_capacity(terms.len());
    for term in terms {
        let source = slot(resolve(&term.address, context)?)?;
        let value = evaluator.evaluate_multiplier(term.multiplier.as_deref(), context)?;
        coeffs.push((source, value));
    }
    let constant = match constant {
        Some(text) => evaluator.evaluate(text, context)?,
        None => ZERO,
    };
    Ok(RowUpdate {
        row,
        coeffs,
        constant,
    })
}

// ── Global system ───────────────────────────────────────────────────────────

/// Block-diagonal global map over the concatenated block address lists.
#[derive(Debug, Clone)]
pub struct AffineSystem {
    pub blocks: Vec<BlockSystem>,
    pub k_local: usize,
    pub m_global: Array2<Complex64>,
    pub c_global: Array1<Complex64>,
}

impl AffineSystem {
    pub fn total_dim(&self) -> usize {
        self.k_local * self.blocks.len()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Global slot of `address`: the block whose context equals `context`
    /// wins, otherwise the first block holding the address.
    pub fn slot_for(&self, address: &Address, context: &LoopContext) -> Option<usize> {
        let local = |b: usize| {
            self.blocks[b]
                .addresses
                .slot_of(address)
                .map(|s| b * self.k_local + s)
        };
        self.blocks
            .iter()
            .position(|block| &block.context == context)
            .and_then(local)
            .or_else(|| (0..self.blocks.len()).find_map(local))
    }

    /// Global address list rendered in slot order.
    pub fn data_addresses(&self) -> Vec<String> {
        self.blocks
            .iter()
            .flat_map(|block| block.addresses.iter().map(|a| a.to_string()))
            .collect()
    }

    pub fn control_blocks(&self) -> Vec<String> {
        self.blocks.iter().map(BlockSystem::label).collect()
    }
}

/// Build every block and assemble the global map. With `parallel`, blocks
/// are built on the rayon pool; results are still assembled in block order.
pub fn build_affine(
    expansion: &Expansion,
    evaluator: &ExprEvaluator,
    parallel: bool,
) -> Result<AffineSystem, BuildError> {
    let mut groups: IndexMap<&LoopContext, Vec<&AtomicOp>> = IndexMap::new();
    for op in &expansion.ops {
        if matches!(op.kind, OpKind::Assign { .. }) {
            groups.entry(&op.context).or_default().push(op);
        }
    }
    let mut ids = IdAllocator::new();
    let groups: Vec<(BlockId, &LoopContext, Vec<&AtomicOp>)> = groups
        .into_iter()
        .map(|(context, ops)| (ids.alloc_block(), context, ops))
        .collect();

    let build = |(id, context, ops): &(BlockId, &LoopContext, Vec<&AtomicOp>)| {
        build_block(*id, context, ops, evaluator)
    };
    let results: Vec<Result<BlockSystem, BuildError>> = if parallel {
        groups.par_iter().map(build).collect()
    } else {
        groups.iter().map(build).collect()
    };
    let blocks = results.into_iter().collect::<Result<Vec<_>, _>>()?;

    assemble(blocks)
}

/// Check dimensions and place each block on the diagonal.
pub fn assemble(blocks: Vec<BlockSystem>) -> Result<AffineSystem, BuildError> {
    let k_local = blocks.first().map_or(0, BlockSystem::dim);
    if let Some(first) = blocks.first() {
        if let Some(bad) = blocks.iter().find(|b| b.dim() != k_local) {
            return Err(BuildError::InconsistentBlockDimension {
                expected: k_local,
                found: bad.dim(),
                block: bad.label(),
                first_block: first.label(),
            });
        }
    }

    let n = k_local * blocks.len();
    let mut m_global = Array2::<Complex64>::zeros((n, n));
    let mut c_global = Array1::<Complex64>::zeros(n);
    for (b, block) in blocks.iter().enumerate() {
        let off = b * k_local;
        m_global
            .slice_mut(s![off..off + k_local, off..off + k_local])
            .assign(&block.m);
        c_global.slice_mut(s![off..off + k_local]).assign(&block.c);
    }

    Ok(AffineSystem {
        blocks,
        k_local,
        m_global,
        c_global,
    })
}
