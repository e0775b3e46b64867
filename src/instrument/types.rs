//! Type identifier registry of one unit.
//!
//! Types are numbered from zero per unit. At finalization the unit gets two constant tables
//! (`irprobe.type.ids`, `irprobe.type.sizes`) and a fix-up routine that shifts every local id
//! by the unit's global type base before declaring the table to the runtime. This lets each
//! unit number its types independently and still merge into one global type space.

use std::collections::HashMap;

use crate::ir::IrType;

/// Dense registry of the types a unit refers to.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    ids: HashMap<IrType, u64>,
    types: Vec<IrType>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the identifier of `ty`, allocating the next one if it is new.
    pub fn register(&mut self, ty: &IrType) -> u64 {
        if let Some(&id) = self.ids.get(ty) {
            return id;
        }
        let id = self.types.len() as u64;
        self.ids.insert(ty.clone(), id);
        self.types.push(ty.clone());
        id
    }

    /// Returns the identifier of a registered type.
    #[must_use]
    pub fn get(&self, ty: &IrType) -> Option<u64> {
        self.ids.get(ty).copied()
    }

    /// Returns the registered types in identifier order.
    #[must_use]
    pub fn types(&self) -> &[IrType] {
        &self.types
    }

    /// Returns the local type ids in order, i.e. `0..len()`.
    #[must_use]
    pub fn ids(&self) -> Vec<i64> {
        (0..self.types.len() as i64).collect()
    }

    /// Returns the size in bits of every type, 0 for unsized ones.
    #[must_use]
    pub fn sizes(&self) -> Vec<i64> {
        self.types
            .iter()
            .map(|t| t.size_in_bits().map_or(0, |s| i64::try_from(s).unwrap_or(i64::MAX)))
            .collect()
    }

    /// Returns the number of registered types.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.types.len() as u64
    }

    /// Returns `true` if no type was registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        let mut types = TypeRegistry::new();
        assert_eq!(types.register(&IrType::I32), 0);
        assert_eq!(types.register(&IrType::F64), 1);
        assert_eq!(types.register(&IrType::I32), 0);
        assert_eq!(types.len(), 2);
        assert_eq!(types.get(&IrType::F64), Some(1));
        assert_eq!(types.get(&IrType::Ptr), None);
    }

    #[test]
    fn test_sizes() {
        let mut types = TypeRegistry::new();
        types.register(&IrType::array(IrType::F64, 3));
        types.register(&IrType::Void);
        types.register(&IrType::I1);
        assert_eq!(types.ids(), vec![0, 1, 2]);
        assert_eq!(types.sizes(), vec![192, 0, 1]);
    }
}
