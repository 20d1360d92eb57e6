// id.rs — Stable identifiers for expanded operations and blocks
//
// IDs give deterministic, position-independent identity to the artifacts of
// one build. Allocated in expansion order, so identical IR always yields
// identical IDs.

use serde::Serialize;
use std::fmt;

/// Stable identifier for one unrolled atomic operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct OpId(pub u32);

/// Stable identifier for a block (one concrete loop-context tuple).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BlockId(pub u32);

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// Allocator for stable IDs. Produces monotonically increasing IDs in
/// allocation order.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_op: u32,
    next_block: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_op(&mut self) -> OpId {
        let id = OpId(self.next_op);
        self.next_op += 1;
        id
    }

    pub fn alloc_block(&mut self) -> BlockId {
        let id = BlockId(self.next_block);
        self.next_block += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_per_kind() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.alloc_op(), OpId(0));
        assert_eq!(ids.alloc_block(), BlockId(0));
        assert_eq!(ids.alloc_op(), OpId(1));
        assert_eq!(ids.alloc_block(), BlockId(1));
    }

    #[test]
    fn display_forms() {
        assert_eq!(OpId(7).to_string(), "op#7");
        assert_eq!(BlockId(3).to_string(), "b3");
    }
}
