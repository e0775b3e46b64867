//! Operations of the IR.
//!
//! Every instruction carries exactly one [`Op`]. Value-producing operations name their
//! result in a `dest` field, the way `result = op(operands)` reads in the textual form.

use std::fmt;

use crate::ir::{BlockId, IrType, ValueId};

/// Integer binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// Wrapping addition
    Add,
    /// Wrapping subtraction
    Sub,
    /// Wrapping multiplication
    Mul,
    /// Signed division
    SDiv,
    /// Unsigned division
    UDiv,
    /// Signed remainder
    SRem,
    /// Unsigned remainder
    URem,
    /// Bitwise and
    And,
    /// Bitwise or
    Or,
    /// Bitwise xor
    Xor,
    /// Left shift
    Shl,
    /// Logical right shift
    LShr,
    /// Arithmetic right shift
    AShr,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::SDiv => "sdiv",
            Self::UDiv => "udiv",
            Self::SRem => "srem",
            Self::URem => "urem",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::Shl => "shl",
            Self::LShr => "lshr",
            Self::AShr => "ashr",
        };
        f.write_str(name)
    }
}

/// Integer comparison predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpPred {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// signed `<`
    Slt,
    /// signed `<=`
    Sle,
    /// signed `>`
    Sgt,
    /// signed `>=`
    Sge,
    /// unsigned `<`
    Ult,
    /// unsigned `<=`
    Ule,
    /// unsigned `>`
    Ugt,
    /// unsigned `>=`
    Uge,
}

impl CmpPred {
    /// Returns `true` for signed relational predicates.
    #[must_use]
    pub fn is_signed(self) -> bool {
        matches!(self, Self::Slt | Self::Sle | Self::Sgt | Self::Sge)
    }

    /// Returns `true` for unsigned relational predicates.
    #[must_use]
    pub fn is_unsigned(self) -> bool {
        matches!(self, Self::Ult | Self::Ule | Self::Ugt | Self::Uge)
    }
}

impl fmt::Display for CmpPred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Slt => "slt",
            Self::Sle => "sle",
            Self::Sgt => "sgt",
            Self::Sge => "sge",
            Self::Ult => "ult",
            Self::Ule => "ule",
            Self::Ugt => "ugt",
            Self::Uge => "uge",
        };
        f.write_str(name)
    }
}

/// Conversion operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CastKind {
    /// Sign extension
    SExt,
    /// Zero extension
    ZExt,
    /// Integer truncation
    Trunc,
    /// Reinterpretation without changing bits
    BitCast,
    /// Pointer to integer
    PtrToInt,
    /// Integer to pointer
    IntToPtr,
}

impl fmt::Display for CastKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SExt => "sext",
            Self::ZExt => "zext",
            Self::Trunc => "trunc",
            Self::BitCast => "bitcast",
            Self::PtrToInt => "ptrtoint",
            Self::IntToPtr => "inttoptr",
        };
        f.write_str(name)
    }
}

/// Target of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Callee {
    /// Call of a known unit function.
    Direct(crate::ir::FuncId),
    /// Call through a function pointer value.
    Indirect(ValueId),
}

/// An IR operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// `dest = op left, right`
    Binary {
        /// Result
        dest: ValueId,
        /// Operator
        op: BinaryOp,
        /// Left operand
        left: ValueId,
        /// Right operand
        right: ValueId,
    },
    /// `dest = cmp pred left, right`
    Cmp {
        /// Result (i1)
        dest: ValueId,
        /// Predicate
        pred: CmpPred,
        /// Left operand
        left: ValueId,
        /// Right operand
        right: ValueId,
    },
    /// `dest = kind operand to ty`
    Cast {
        /// Result
        dest: ValueId,
        /// Conversion
        kind: CastKind,
        /// Converted value
        operand: ValueId,
        /// Result type
        to: IrType,
    },
    /// Stack slot for one value of `ty`.
    Alloca {
        /// Resulting pointer
        dest: ValueId,
        /// Allocated type
        ty: IrType,
    },
    /// `dest = load ty, addr`
    Load {
        /// Loaded value
        dest: ValueId,
        /// Address
        addr: ValueId,
        /// Loaded type
        ty: IrType,
    },
    /// `store value, addr`
    Store {
        /// Address
        addr: ValueId,
        /// Stored value
        value: ValueId,
    },
    /// Atomic read-modify-write; `dest` receives the old value.
    AtomicRmw {
        /// Old value
        dest: ValueId,
        /// Combining operator
        op: BinaryOp,
        /// Address
        addr: ValueId,
        /// Operand
        value: ValueId,
    },
    /// Atomic compare-and-exchange; `dest` receives the old value.
    CmpXchg {
        /// Old value
        dest: ValueId,
        /// Address
        addr: ValueId,
        /// Expected value
        expected: ValueId,
        /// Replacement value
        replacement: ValueId,
    },
    /// Address arithmetic: `dest = base + indices` scaled by `elem_ty`.
    ElementPtr {
        /// Resulting pointer
        dest: ValueId,
        /// Base pointer
        base: ValueId,
        /// Type the first index steps over
        elem_ty: IrType,
        /// Indices
        indices: Vec<ValueId>,
    },
    /// Function call.
    Call {
        /// Result, absent for void calls
        dest: Option<ValueId>,
        /// Target
        callee: Callee,
        /// Arguments
        args: Vec<ValueId>,
    },
    /// An operation the engine has no model for (inline assembly, target builtins).
    Opaque {
        /// Result, if any
        dest: Option<ValueId>,
        /// Mnemonic used for printing
        name: String,
        /// Operands
        operands: Vec<ValueId>,
        /// Whether the operation may read or write memory
        touches_memory: bool,
    },
    /// `dest = phi [block, value], ...`
    Phi {
        /// Result
        dest: ValueId,
        /// Incoming value per predecessor block
        incoming: Vec<(BlockId, ValueId)>,
    },
    /// Unconditional branch.
    Jump {
        /// Successor
        target: BlockId,
    },
    /// Two-way conditional branch.
    Branch {
        /// Condition (i1)
        cond: ValueId,
        /// Successor when true
        true_target: BlockId,
        /// Successor when false
        false_target: BlockId,
    },
    /// Multi-way branch.
    Switch {
        /// Scrutinee
        value: ValueId,
        /// Successor when no case matches
        default: BlockId,
        /// Case values and successors
        cases: Vec<(i64, BlockId)>,
    },
    /// Function return.
    Return {
        /// Returned value for non-void functions
        value: Option<ValueId>,
    },
    /// Control never reaches this point.
    Unreachable,
}

impl Op {
    /// Returns the value defined by this operation.
    #[must_use]
    pub fn dest(&self) -> Option<ValueId> {
        match self {
            Op::Binary { dest, .. }
            | Op::Cmp { dest, .. }
            | Op::Cast { dest, .. }
            | Op::Alloca { dest, .. }
            | Op::Load { dest, .. }
            | Op::AtomicRmw { dest, .. }
            | Op::CmpXchg { dest, .. }
            | Op::ElementPtr { dest, .. }
            | Op::Phi { dest, .. } => Some(*dest),
            Op::Call { dest, .. } | Op::Opaque { dest, .. } => *dest,
            Op::Store { .. }
            | Op::Jump { .. }
            | Op::Branch { .. }
            | Op::Switch { .. }
            | Op::Return { .. }
            | Op::Unreachable => None,
        }
    }

    /// Renames the value defined by this operation. Returns `false` if it defines none.
    pub fn set_dest(&mut self, new_dest: ValueId) -> bool {
        match self {
            Op::Binary { dest, .. }
            | Op::Cmp { dest, .. }
            | Op::Cast { dest, .. }
            | Op::Alloca { dest, .. }
            | Op::Load { dest, .. }
            | Op::AtomicRmw { dest, .. }
            | Op::CmpXchg { dest, .. }
            | Op::ElementPtr { dest, .. }
            | Op::Phi { dest, .. } => {
                *dest = new_dest;
                true
            }
            Op::Call { dest, .. } | Op::Opaque { dest, .. } => {
                if dest.is_some() {
                    *dest = Some(new_dest);
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    /// Returns every value read by this operation, in operand order.
    #[must_use]
    pub fn uses(&self) -> Vec<ValueId> {
        match self {
            Op::Binary { left, right, .. } | Op::Cmp { left, right, .. } => vec![*left, *right],
            Op::Cast { operand, .. } => vec![*operand],
            Op::Alloca { .. } | Op::Jump { .. } | Op::Unreachable => Vec::new(),
            Op::Load { addr, .. } => vec![*addr],
            Op::Store { addr, value } | Op::AtomicRmw { addr, value, .. } => vec![*addr, *value],
            Op::CmpXchg {
                addr,
                expected,
                replacement,
                ..
            } => vec![*addr, *expected, *replacement],
            Op::ElementPtr { base, indices, .. } => {
                let mut uses = vec![*base];
                uses.extend(indices.iter().copied());
                uses
            }
            Op::Call { callee, args, .. } => {
                let mut uses = Vec::with_capacity(args.len() + 1);
                if let Callee::Indirect(target) = callee {
                    uses.push(*target);
                }
                uses.extend(args.iter().copied());
                uses
            }
            Op::Opaque { operands, .. } => operands.clone(),
            Op::Phi { incoming, .. } => incoming.iter().map(|(_, v)| *v).collect(),
            Op::Branch { cond, .. } => vec![*cond],
            Op::Switch { value, .. } => vec![*value],
            Op::Return { value } => value.iter().copied().collect(),
        }
    }

    /// Replaces every use of `old` with `new`, returning the number of replacements.
    pub fn replace_uses(&mut self, old: ValueId, new: ValueId) -> usize {
        let mut count = 0;
        let mut swap = |slot: &mut ValueId| {
            if *slot == old {
                *slot = new;
                count += 1;
            }
        };
        match self {
            Op::Binary { left, right, .. } | Op::Cmp { left, right, .. } => {
                swap(left);
                swap(right);
            }
            Op::Cast { operand, .. } => swap(operand),
            Op::Alloca { .. } | Op::Jump { .. } | Op::Unreachable => {}
            Op::Load { addr, .. } => swap(addr),
            Op::Store { addr, value } | Op::AtomicRmw { addr, value, .. } => {
                swap(addr);
                swap(value);
            }
            Op::CmpXchg {
                addr,
                expected,
                replacement,
                ..
            } => {
                swap(addr);
                swap(expected);
                swap(replacement);
            }
            Op::ElementPtr { base, indices, .. } => {
                swap(base);
                indices.iter_mut().for_each(&mut swap);
            }
            Op::Call { callee, args, .. } => {
                if let Callee::Indirect(target) = callee {
                    swap(target);
                }
                args.iter_mut().for_each(&mut swap);
            }
            Op::Opaque { operands, .. } => operands.iter_mut().for_each(&mut swap),
            Op::Phi { incoming, .. } => incoming.iter_mut().for_each(|(_, v)| swap(v)),
            Op::Branch { cond, .. } => swap(cond),
            Op::Switch { value, .. } => swap(value),
            Op::Return { value } => {
                if let Some(v) = value {
                    swap(v);
                }
            }
        }
        count
    }

    /// Returns `true` if this operation ends a basic block.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Op::Jump { .. }
                | Op::Branch { .. }
                | Op::Switch { .. }
                | Op::Return { .. }
                | Op::Unreachable
        )
    }

    /// Returns `true` for phi operations.
    #[must_use]
    pub fn is_phi(&self) -> bool {
        matches!(self, Op::Phi { .. })
    }

    /// Returns `true` if re-executing this operation at another program point yields the
    /// same result given the same operands.
    ///
    /// Only pure arithmetic, comparisons, conversions and address computations qualify.
    /// Phis depend on the incoming edge and memory operations on the state of memory.
    #[must_use]
    pub fn is_replayable(&self) -> bool {
        matches!(
            self,
            Op::Binary { .. } | Op::Cmp { .. } | Op::Cast { .. } | Op::ElementPtr { .. }
        )
    }

    /// Returns the successor blocks of a terminator, including duplicates.
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Op::Jump { target } => vec![*target],
            Op::Branch {
                true_target,
                false_target,
                ..
            } => vec![*true_target, *false_target],
            Op::Switch { default, cases, .. } => {
                let mut all: Vec<BlockId> = cases.iter().map(|(_, b)| *b).collect();
                all.push(*default);
                all
            }
            _ => Vec::new(),
        }
    }

    /// Redirects every edge to `old` so it targets `new`. Returns `true` if anything changed.
    pub fn redirect_target(&mut self, old: BlockId, new: BlockId) -> bool {
        let mut changed = false;
        let mut retarget = |slot: &mut BlockId| {
            if *slot == old {
                *slot = new;
                changed = true;
            }
        };
        match self {
            Op::Jump { target } => retarget(target),
            Op::Branch {
                true_target,
                false_target,
                ..
            } => {
                retarget(true_target);
                retarget(false_target);
            }
            Op::Switch { default, cases, .. } => {
                retarget(default);
                cases.iter_mut().for_each(|(_, b)| retarget(b));
            }
            _ => {}
        }
        changed
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, values: &[ValueId]) -> fmt::Result {
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{v}")?;
    }
    Ok(())
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Binary {
                dest,
                op,
                left,
                right,
            } => write!(f, "{dest} = {op} {left}, {right}"),
            Op::Cmp {
                dest,
                pred,
                left,
                right,
            } => write!(f, "{dest} = cmp {pred} {left}, {right}"),
            Op::Cast {
                dest,
                kind,
                operand,
                to,
            } => write!(f, "{dest} = {kind} {operand} to {to}"),
            Op::Alloca { dest, ty } => write!(f, "{dest} = alloca {ty}"),
            Op::Load { dest, addr, ty } => write!(f, "{dest} = load {ty}, {addr}"),
            Op::Store { addr, value } => write!(f, "store {value}, {addr}"),
            Op::AtomicRmw {
                dest,
                op,
                addr,
                value,
            } => write!(f, "{dest} = atomicrmw {op} {addr}, {value}"),
            Op::CmpXchg {
                dest,
                addr,
                expected,
                replacement,
            } => write!(f, "{dest} = cmpxchg {addr}, {expected}, {replacement}"),
            Op::ElementPtr {
                dest,
                base,
                elem_ty,
                indices,
            } => {
                write!(f, "{dest} = elementptr {elem_ty}, {base}")?;
                for idx in indices {
                    write!(f, ", {idx}")?;
                }
                Ok(())
            }
            Op::Call { dest, callee, args } => {
                if let Some(dest) = dest {
                    write!(f, "{dest} = ")?;
                }
                match callee {
                    Callee::Direct(func) => write!(f, "call {func}(")?,
                    Callee::Indirect(target) => write!(f, "call {target}(")?,
                }
                write_list(f, args)?;
                write!(f, ")")
            }
            Op::Opaque {
                dest,
                name,
                operands,
                ..
            } => {
                if let Some(dest) = dest {
                    write!(f, "{dest} = ")?;
                }
                write!(f, "{name} ")?;
                write_list(f, operands)
            }
            Op::Phi { dest, incoming } => {
                write!(f, "{dest} = phi ")?;
                for (i, (block, value)) in incoming.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "[{block}, {value}]")?;
                }
                Ok(())
            }
            Op::Jump { target } => write!(f, "jump {target}"),
            Op::Branch {
                cond,
                true_target,
                false_target,
            } => write!(f, "branch {cond}, {true_target}, {false_target}"),
            Op::Switch {
                value,
                default,
                cases,
            } => {
                write!(f, "switch {value}, default {default}")?;
                for (case, target) in cases {
                    write!(f, ", {case} -> {target}")?;
                }
                Ok(())
            }
            Op::Return { value: Some(v) } => write!(f, "ret {v}"),
            Op::Return { value: None } => write!(f, "ret"),
            Op::Unreachable => write!(f, "unreachable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(i: usize) -> ValueId {
        ValueId::new(i)
    }

    fn b(i: usize) -> BlockId {
        BlockId::new(i)
    }

    #[test]
    fn test_dest_and_uses() {
        let op = Op::Binary {
            dest: v(2),
            op: BinaryOp::Add,
            left: v(0),
            right: v(1),
        };
        assert_eq!(op.dest(), Some(v(2)));
        assert_eq!(op.uses(), vec![v(0), v(1)]);
        assert_eq!(op.to_string(), "%2 = add %0, %1");

        let store = Op::Store {
            addr: v(3),
            value: v(4),
        };
        assert_eq!(store.dest(), None);
        assert_eq!(store.uses(), vec![v(3), v(4)]);
    }

    #[test]
    fn test_indirect_call_uses_target() {
        let call = Op::Call {
            dest: None,
            callee: Callee::Indirect(v(7)),
            args: vec![v(1)],
        };
        assert_eq!(call.uses(), vec![v(7), v(1)]);
    }

    #[test]
    fn test_replace_uses() {
        let mut op = Op::Binary {
            dest: v(2),
            op: BinaryOp::Mul,
            left: v(0),
            right: v(0),
        };
        assert_eq!(op.replace_uses(v(0), v(9)), 2);
        assert_eq!(op.uses(), vec![v(9), v(9)]);
    }

    #[test]
    fn test_redirect_switch_duplicates() {
        let mut op = Op::Switch {
            value: v(0),
            default: b(1),
            cases: vec![(0, b(2)), (1, b(2))],
        };
        assert!(op.redirect_target(b(2), b(5)));
        assert_eq!(op.successors(), vec![b(5), b(5), b(1)]);
        assert!(!op.redirect_target(b(9), b(6)));
    }

    #[test]
    fn test_classification() {
        assert!(Op::Jump { target: b(0) }.is_terminator());
        assert!(!Op::Unreachable.is_replayable());
        assert!(Op::Cast {
            dest: v(1),
            kind: CastKind::SExt,
            operand: v(0),
            to: IrType::I64,
        }
        .is_replayable());
        assert!(!Op::Load {
            dest: v(1),
            addr: v(0),
            ty: IrType::I32,
        }
        .is_replayable());
        assert!(CmpPred::Slt.is_signed());
        assert!(CmpPred::Uge.is_unsigned());
        assert!(!CmpPred::Eq.is_signed() && !CmpPred::Eq.is_unsigned());
    }
}
