//! Symbolic integer expressions over function values.
//!
//! Upstream loop analyses describe bounds and steps as [`SymbolicExpr`] trees whose leaves
//! are constants or existing SSA values. The materializer turns them back into
//! instructions at a chosen program point.

use std::fmt;

use crate::ir::{BinaryOp, ValueId};

/// A symbolic integer expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SymbolicExpr {
    /// Integer constant.
    Constant {
        /// Value, sign-extended
        value: i64,
        /// Bit width
        bits: u16,
    },
    /// An existing SSA value.
    Value {
        /// The value
        value: ValueId,
        /// Bit width
        bits: u16,
    },
    /// Binary arithmetic over operands of equal width.
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        left: Box<SymbolicExpr>,
        /// Right operand
        right: Box<SymbolicExpr>,
    },
    /// Widening conversion.
    Extend {
        /// Operand
        expr: Box<SymbolicExpr>,
        /// Result width
        bits: u16,
        /// Sign extension when set, zero extension otherwise
        signed: bool,
    },
    /// Narrowing conversion.
    Truncate {
        /// Operand
        expr: Box<SymbolicExpr>,
        /// Result width
        bits: u16,
    },
}

impl SymbolicExpr {
    /// Integer constant leaf.
    #[must_use]
    pub fn constant(value: i64, bits: u16) -> Self {
        SymbolicExpr::Constant { value, bits }
    }

    /// SSA value leaf.
    #[must_use]
    pub fn value(value: ValueId, bits: u16) -> Self {
        SymbolicExpr::Value { value, bits }
    }

    /// Binary node.
    #[must_use]
    pub fn binary(op: BinaryOp, left: SymbolicExpr, right: SymbolicExpr) -> Self {
        SymbolicExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Sign or zero extension to `bits`.
    #[must_use]
    pub fn extend(self, bits: u16, signed: bool) -> Self {
        SymbolicExpr::Extend {
            expr: Box::new(self),
            bits,
            signed,
        }
    }

    /// Truncation to `bits`.
    #[must_use]
    pub fn truncate(self, bits: u16) -> Self {
        SymbolicExpr::Truncate {
            expr: Box::new(self),
            bits,
        }
    }

    /// Returns the result width in bits.
    #[must_use]
    pub fn bit_width(&self) -> u16 {
        match self {
            SymbolicExpr::Constant { bits, .. }
            | SymbolicExpr::Value { bits, .. }
            | SymbolicExpr::Extend { bits, .. }
            | SymbolicExpr::Truncate { bits, .. } => *bits,
            SymbolicExpr::Binary { left, .. } => left.bit_width(),
        }
    }

    /// Returns the SSA leaves in left-to-right order.
    #[must_use]
    pub fn values(&self) -> Vec<ValueId> {
        let mut out = Vec::new();
        self.collect_values(&mut out);
        out
    }

    fn collect_values(&self, out: &mut Vec<ValueId>) {
        match self {
            SymbolicExpr::Constant { .. } => {}
            SymbolicExpr::Value { value, .. } => out.push(*value),
            SymbolicExpr::Binary { left, right, .. } => {
                left.collect_values(out);
                right.collect_values(out);
            }
            SymbolicExpr::Extend { expr, .. } | SymbolicExpr::Truncate { expr, .. } => {
                expr.collect_values(out);
            }
        }
    }

    /// Folds the expression to a constant when it has no SSA leaves.
    ///
    /// Returns `None` for non-constant expressions and for operators whose folding would
    /// need more than wrapping two's-complement arithmetic.
    #[must_use]
    pub fn as_constant(&self) -> Option<i64> {
        match self {
            SymbolicExpr::Constant { value, .. } => Some(*value),
            SymbolicExpr::Value { .. } => None,
            SymbolicExpr::Binary { op, left, right } => {
                let (l, r) = (left.as_constant()?, right.as_constant()?);
                match op {
                    BinaryOp::Add => Some(l.wrapping_add(r)),
                    BinaryOp::Sub => Some(l.wrapping_sub(r)),
                    BinaryOp::Mul => Some(l.wrapping_mul(r)),
                    BinaryOp::And => Some(l & r),
                    BinaryOp::Or => Some(l | r),
                    BinaryOp::Xor => Some(l ^ r),
                    _ => None,
                }
            }
            SymbolicExpr::Extend { expr, signed, .. } => {
                let value = expr.as_constant()?;
                let from = expr.bit_width();
                if *signed || from >= 64 {
                    Some(value)
                } else {
                    Some(value & ((1i64 << from) - 1))
                }
            }
            SymbolicExpr::Truncate { expr, bits } => {
                let value = expr.as_constant()?;
                if *bits >= 64 {
                    return Some(value);
                }
                let shift = 64 - u32::from(*bits);
                Some((value << shift) >> shift)
            }
        }
    }
}

impl fmt::Display for SymbolicExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolicExpr::Constant { value, .. } => write!(f, "{value}"),
            SymbolicExpr::Value { value, .. } => write!(f, "{value}"),
            SymbolicExpr::Binary { op, left, right } => write!(f, "({left} {op} {right})"),
            SymbolicExpr::Extend { expr, bits, signed } => {
                let kind = if *signed { "sext" } else { "zext" };
                write!(f, "({kind} {expr} to i{bits})")
            }
            SymbolicExpr::Truncate { expr, bits } => write!(f, "(trunc {expr} to i{bits})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_width_and_values() {
        let n = ValueId::new(4);
        let e = SymbolicExpr::binary(
            BinaryOp::Sub,
            SymbolicExpr::value(n, 32),
            SymbolicExpr::constant(1, 32),
        )
        .extend(64, true);
        assert_eq!(e.bit_width(), 64);
        assert_eq!(e.values(), vec![n]);
        assert_eq!(e.as_constant(), None);
    }

    #[test]
    fn test_constant_folding() {
        let e = SymbolicExpr::binary(
            BinaryOp::Mul,
            SymbolicExpr::constant(3, 32),
            SymbolicExpr::constant(-2, 32),
        );
        assert_eq!(e.as_constant(), Some(-6));
        assert_eq!(
            SymbolicExpr::constant(-1, 32).extend(64, false).as_constant(),
            Some(0xffff_ffff)
        );
        assert_eq!(
            SymbolicExpr::constant(-1, 32).extend(64, true).as_constant(),
            Some(-1)
        );
        assert_eq!(
            SymbolicExpr::constant(0x1ff, 32).truncate(8).as_constant(),
            Some(-1)
        );
    }

    #[test]
    fn test_display() {
        let e = SymbolicExpr::binary(
            BinaryOp::Add,
            SymbolicExpr::value(ValueId::new(1), 32),
            SymbolicExpr::constant(2, 32),
        );
        assert_eq!(e.to_string(), "(%1 add 2)");
    }
}
