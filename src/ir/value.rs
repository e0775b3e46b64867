//! Entity handles and value definitions.
//!
//! Every IR entity is addressed by a small copyable index into an arena owned by its
//! container (unit or function). Handles stay valid for the lifetime of the container:
//! erased instructions are detached from their block but keep their slot.

use std::fmt;

use crate::{ir::IrType, utils::graph::NodeId};

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub(crate) u32);

        impl $name {
            /// Creates a handle from a raw arena index.
            #[must_use]
            #[inline]
            pub const fn new(index: usize) -> Self {
                Self(index as u32)
            }

            /// Returns the raw arena index.
            #[must_use]
            #[inline]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

entity_id!(
    /// Handle of a function within a [`crate::ir::Unit`].
    FuncId,
    "@f"
);
entity_id!(
    /// Handle of a global variable within a [`crate::ir::Unit`].
    GlobalId,
    "@g"
);
entity_id!(
    /// Handle of a basic block within a [`crate::ir::Function`].
    BlockId,
    "bb"
);
entity_id!(
    /// Handle of an instruction within a [`crate::ir::Function`].
    InstId,
    "i"
);
entity_id!(
    /// Handle of an SSA value within a [`crate::ir::Function`].
    ValueId,
    "%"
);

impl From<BlockId> for NodeId {
    fn from(block: BlockId) -> Self {
        NodeId::new(block.index())
    }
}

impl From<NodeId> for BlockId {
    fn from(node: NodeId) -> Self {
        BlockId::new(node.index())
    }
}

/// A compile-time constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstValue {
    /// Integer constant of the given width. The payload is stored sign-extended.
    Int {
        /// Constant value
        value: i64,
        /// Bit width
        bits: u16,
    },
    /// Null pointer.
    Null,
    /// Undefined value of the value's type.
    Undef,
}

impl ConstValue {
    /// Returns the integer payload, if any.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConstValue::Int { value, .. } => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Int { value, .. } => write!(f, "{value}"),
            ConstValue::Null => write!(f, "null"),
            ConstValue::Undef => write!(f, "undef"),
        }
    }
}

/// Where a value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueDef {
    /// Formal parameter with the given position.
    Argument(u32),
    /// Result of an instruction.
    Inst(InstId),
    /// Interned constant.
    Const(ConstValue),
    /// Address of a unit global.
    Global(GlobalId),
    /// Address of a unit function.
    Function(FuncId),
}

impl ValueDef {
    /// Returns the defining instruction for instruction results.
    #[must_use]
    pub fn inst(&self) -> Option<InstId> {
        match self {
            ValueDef::Inst(inst) => Some(*inst),
            _ => None,
        }
    }
}

/// Entry of a function's value table.
#[derive(Debug, Clone)]
pub struct ValueData {
    /// Static type of the value.
    pub ty: IrType,
    /// Definition site.
    pub def: ValueDef,
    /// Optional textual name used when printing.
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_formatting() {
        assert_eq!(ValueId::new(3).to_string(), "%3");
        assert_eq!(BlockId::new(2).to_string(), "bb2");
        assert_eq!(format!("{:?}", FuncId::new(1)), "FuncId(1)");
    }

    #[test]
    fn test_block_node_conversion() {
        let node: NodeId = BlockId::new(5).into();
        assert_eq!(node.index(), 5);
        assert_eq!(BlockId::from(node), BlockId::new(5));
    }

    #[test]
    fn test_const_value() {
        let c = ConstValue::Int { value: -1, bits: 32 };
        assert_eq!(c.as_int(), Some(-1));
        assert_eq!(ConstValue::Null.as_int(), None);
        assert_eq!(c.to_string(), "-1");
    }
}
