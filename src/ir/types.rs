//! Value types of the IR.
//!
//! Types are structural: two `IrType` values describe the same type exactly when they
//! compare equal, which is what lets the type registry key on them directly.

use std::fmt;

/// Signature of a function.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionType {
    /// Return type (`Void` for procedures).
    pub ret: IrType,
    /// Parameter types in declaration order.
    pub params: Vec<IrType>,
}

impl FunctionType {
    /// Creates a new function signature.
    #[must_use]
    pub fn new(ret: IrType, params: Vec<IrType>) -> Self {
        Self { ret, params }
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{param}")?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

/// A first-class IR type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IrType {
    /// No value.
    Void,
    /// Integer of the given bit width. Signedness lives on the operations.
    Int(u16),
    /// IEEE floating point of the given bit width.
    Float(u16),
    /// Opaque pointer.
    Ptr,
    /// Fixed-length array of `len` elements.
    Array(Box<IrType>, u64),
    /// Packed sequence of fields.
    Struct(Vec<IrType>),
    /// Function signature.
    Function(Box<FunctionType>),
}

impl IrType {
    /// Boolean type.
    pub const I1: IrType = IrType::Int(1);
    /// 8-bit integer type.
    pub const I8: IrType = IrType::Int(8);
    /// 32-bit integer type.
    pub const I32: IrType = IrType::Int(32);
    /// 64-bit integer type.
    pub const I64: IrType = IrType::Int(64);
    /// Double precision floating point type.
    pub const F64: IrType = IrType::Float(64);

    /// Builds an array type.
    #[must_use]
    pub fn array(elem: IrType, len: u64) -> Self {
        IrType::Array(Box::new(elem), len)
    }

    /// Builds a function type.
    #[must_use]
    pub fn function(ret: IrType, params: Vec<IrType>) -> Self {
        IrType::Function(Box::new(FunctionType::new(ret, params)))
    }

    /// Returns `true` for integer types.
    #[must_use]
    pub fn is_int(&self) -> bool {
        matches!(self, IrType::Int(_))
    }

    /// Returns the bit width of an integer type.
    #[must_use]
    pub fn int_bits(&self) -> Option<u16> {
        match self {
            IrType::Int(bits) => Some(*bits),
            _ => None,
        }
    }

    /// Returns `true` for array types.
    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self, IrType::Array(..))
    }

    /// Returns `true` for arrays and structs.
    #[must_use]
    pub fn is_aggregate(&self) -> bool {
        matches!(self, IrType::Array(..) | IrType::Struct(_))
    }

    /// Returns the allocation size in bytes, or `None` for unsized types.
    ///
    /// Integers narrower than a byte still occupy one byte. Structs are packed.
    #[must_use]
    pub fn size_in_bytes(&self) -> Option<u64> {
        match self {
            IrType::Void | IrType::Function(_) => None,
            IrType::Int(bits) | IrType::Float(bits) => Some(u64::from(*bits).div_ceil(8)),
            IrType::Ptr => Some(8),
            IrType::Array(elem, len) => elem.size_in_bytes()?.checked_mul(*len),
            IrType::Struct(fields) => fields
                .iter()
                .try_fold(0u64, |acc, f| acc.checked_add(f.size_in_bytes()?)),
        }
    }

    /// Returns the size in bits, or `None` for unsized types.
    ///
    /// Scalars report their exact width. Aggregates report their allocation size.
    #[must_use]
    pub fn size_in_bits(&self) -> Option<u64> {
        match self {
            IrType::Int(bits) | IrType::Float(bits) => Some(u64::from(*bits)),
            _ => self.size_in_bytes()?.checked_mul(8),
        }
    }

    /// Returns `(rank, element count)` of a possibly nested array type.
    ///
    /// Scalars and structs report `(0, 1)`. `[2 x [3 x f64]]` reports `(2, 6)`.
    #[must_use]
    pub fn array_shape(&self) -> (u32, u64) {
        let mut rank = 0u32;
        let mut elements = 1u64;
        let mut current = self;
        while let IrType::Array(elem, len) = current {
            rank += 1;
            elements = elements.saturating_mul(*len);
            current = elem;
        }
        (rank, elements)
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrType::Void => write!(f, "void"),
            IrType::Int(bits) => write!(f, "i{bits}"),
            IrType::Float(bits) => write!(f, "f{bits}"),
            IrType::Ptr => write!(f, "ptr"),
            IrType::Array(elem, len) => write!(f, "[{len} x {elem}]"),
            IrType::Struct(fields) => {
                write!(f, "{{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{field}")?;
                }
                write!(f, "}}")
            }
            IrType::Function(sig) => write!(f, "{sig}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        assert_eq!(IrType::I1.size_in_bytes(), Some(1));
        assert_eq!(IrType::I32.size_in_bytes(), Some(4));
        assert_eq!(IrType::array(IrType::F64, 3).size_in_bytes(), Some(24));
        assert_eq!(
            IrType::Struct(vec![IrType::I32, IrType::Ptr]).size_in_bytes(),
            Some(12)
        );
        assert_eq!(IrType::Void.size_in_bytes(), None);
        assert_eq!(IrType::function(IrType::Void, vec![]).size_in_bytes(), None);
    }

    #[test]
    fn test_size_in_bits() {
        assert_eq!(IrType::I1.size_in_bits(), Some(1));
        assert_eq!(IrType::Ptr.size_in_bits(), Some(64));
        assert_eq!(IrType::array(IrType::I1, 4).size_in_bits(), Some(32));
        assert_eq!(IrType::Void.size_in_bits(), None);
    }

    #[test]
    fn test_array_shape() {
        assert_eq!(IrType::I32.array_shape(), (0, 1));
        assert_eq!(IrType::array(IrType::F64, 3).array_shape(), (1, 3));
        let nested = IrType::array(IrType::array(IrType::F64, 3), 2);
        assert_eq!(nested.array_shape(), (2, 6));
    }

    #[test]
    fn test_display() {
        assert_eq!(IrType::array(IrType::F64, 3).to_string(), "[3 x f64]");
        assert_eq!(
            IrType::function(IrType::I32, vec![IrType::Ptr, IrType::I32]).to_string(),
            "fn(ptr, i32) -> i32"
        );
        assert_eq!(IrType::Struct(vec![IrType::I8]).to_string(), "{i8}");
    }
}
