//! Basic blocks.

use crate::ir::{BlockId, InstId, Origin};

/// A basic block: an ordered list of instructions ending in a terminator.
///
/// Phi instructions, when present, form a prefix of the list.
#[derive(Debug, Clone)]
pub struct Block {
    id: BlockId,
    /// Optional label used when printing.
    pub name: Option<String>,
    /// Provenance tag.
    pub origin: Origin,
    pub(crate) insts: Vec<InstId>,
}

impl Block {
    pub(crate) fn new(id: BlockId, origin: Origin) -> Self {
        Self {
            id,
            name: None,
            origin,
            insts: Vec::new(),
        }
    }

    /// Returns this block's handle.
    #[must_use]
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Returns the instructions in program order.
    #[must_use]
    pub fn insts(&self) -> &[InstId] {
        &self.insts
    }

    /// Returns the number of instructions in the block.
    #[must_use]
    pub fn len(&self) -> usize {
        self.insts.len()
    }

    /// Returns `true` if the block holds no instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    /// Returns the last instruction of the block.
    #[must_use]
    pub fn last(&self) -> Option<InstId> {
        self.insts.last().copied()
    }
}
