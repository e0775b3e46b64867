//! Instructions: an operation plus provenance and source position.

use std::fmt;

use crate::ir::{BlockId, DebugLoc, Op};

/// Who created an IR entity.
///
/// Every instruction, block, function and global carries an explicit provenance tag. The
/// engine skips anything tagged [`Origin::Instrumentation`], which is what makes repeated
/// runs idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Origin {
    /// Present in the program before instrumentation.
    #[default]
    User,
    /// Synthesized by the instrumentation engine.
    Instrumentation,
}

impl Origin {
    /// Returns `true` for entities synthesized by the engine.
    #[must_use]
    pub fn is_instrumentation(self) -> bool {
        self == Origin::Instrumentation
    }
}

/// A single instruction in a function's instruction arena.
#[derive(Debug, Clone)]
pub struct Instruction {
    /// The operation.
    pub op: Op,
    /// Provenance tag.
    pub origin: Origin,
    /// Source position, if known.
    pub loc: Option<DebugLoc>,
    /// Block currently holding the instruction; `None` once erased.
    pub(crate) block: Option<BlockId>,
}

impl Instruction {
    /// Creates a detached user instruction.
    #[must_use]
    pub fn new(op: Op) -> Self {
        Self {
            op,
            origin: Origin::User,
            loc: None,
            block: None,
        }
    }

    /// Creates a detached instruction tagged as instrumentation-internal.
    #[must_use]
    pub fn synthetic(op: Op) -> Self {
        Self {
            origin: Origin::Instrumentation,
            ..Self::new(op)
        }
    }

    /// Attaches a source position.
    #[must_use]
    pub fn with_loc(mut self, loc: Option<DebugLoc>) -> Self {
        self.loc = loc;
        self
    }

    /// Returns the block holding this instruction.
    #[must_use]
    pub fn block(&self) -> Option<BlockId> {
        self.block
    }

    /// Returns `true` while the instruction is placed in a block.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.block.is_some()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op)?;
        if self.origin.is_instrumentation() {
            write!(f, " !instr")?;
        }
        if let Some(loc) = &self.loc {
            write!(f, " !loc({}:{})", loc.line, loc.col)?;
        }
        Ok(())
    }
}
