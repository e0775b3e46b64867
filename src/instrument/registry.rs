//! Metadata identifier registry of one unit.
//!
//! Every entity the runtime needs to describe (functions, variables, loops, source
//! positions) receives a small integer identifier that becomes its offset into the shared
//! metadata pool. Identifiers are dense: after `n` registrations plus the reserved block
//! they form exactly `0..len()`.
//!
//! The first [`MetaKind::COUNT`] identifiers are reserved, one per kind, and stand for "an
//! entity of this kind that could not be identified". Only the reserved location has a
//! descriptor; the runtime treats the other reserved slots as absent.

use std::collections::{BTreeMap, HashMap};

use strum::{EnumCount, EnumIter};

use crate::ir::{BlockId, DebugLoc, FuncId, GlobalId, ValueId};

/// Partition of the metadata identifier space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumCount, EnumIter)]
pub enum MetaKind {
    /// Source positions.
    Location,
    /// Functions.
    Function,
    /// Variables and other values.
    Value,
    /// Loops.
    Loop,
}

impl MetaKind {
    /// Returns the reserved identifier of this kind.
    #[must_use]
    pub fn reserved_id(self) -> u64 {
        self as u64
    }
}

/// An entity that can be registered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MetaEntity {
    /// A function of the unit.
    Function(FuncId),
    /// A global of the unit.
    Global(GlobalId),
    /// A value local to one function (stack slot, pointer argument, indirect callee).
    Local(FuncId, ValueId),
    /// The loop with the given header.
    Loop(FuncId, BlockId),
    /// A source position.
    Location(DebugLoc),
}

impl MetaEntity {
    /// Returns the partition the entity belongs to.
    #[must_use]
    pub fn kind(&self) -> MetaKind {
        match self {
            MetaEntity::Function(_) => MetaKind::Function,
            MetaEntity::Global(_) | MetaEntity::Local(..) => MetaKind::Value,
            MetaEntity::Loop(..) => MetaKind::Loop,
            MetaEntity::Location(_) => MetaKind::Location,
        }
    }
}

/// Identifier registry with per-identifier descriptors.
#[derive(Debug, Clone)]
pub struct MetadataRegistry {
    ids: HashMap<MetaEntity, u64>,
    descriptors: BTreeMap<u64, String>,
    next: u64,
}

impl Default for MetadataRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataRegistry {
    /// Creates a registry with the reserved identifiers allocated.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ids: HashMap::new(),
            descriptors: BTreeMap::new(),
            next: MetaKind::COUNT as u64,
        }
    }

    /// Returns the identifier of `entity`, allocating the next free one if it is new.
    ///
    /// The flag is `true` when the identifier was just allocated.
    pub fn register(&mut self, entity: MetaEntity) -> (u64, bool) {
        if let Some(&id) = self.ids.get(&entity) {
            return (id, false);
        }
        let id = self.next;
        self.next += 1;
        self.ids.insert(entity, id);
        (id, true)
    }

    /// Returns the identifier of an already registered entity.
    #[must_use]
    pub fn get(&self, entity: &MetaEntity) -> Option<u64> {
        self.ids.get(entity).copied()
    }

    /// Records the descriptor of `id`. The first descriptor wins.
    pub fn describe(&mut self, id: u64, descriptor: String) {
        self.descriptors.entry(id).or_insert(descriptor);
    }

    /// Returns the descriptor of `id`.
    #[must_use]
    pub fn descriptor(&self, id: u64) -> Option<&str> {
        self.descriptors.get(&id).map(String::as_str)
    }

    /// Iterates over descriptors in identifier order.
    pub fn descriptors(&self) -> impl Iterator<Item = (u64, &str)> {
        self.descriptors.iter().map(|(id, d)| (*id, d.as_str()))
    }

    /// Returns the number of allocated identifiers, reserved ones included.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.next
    }

    /// Returns `true` if nothing beyond the reserved block was registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_reserved_ids() {
        let registry = MetadataRegistry::new();
        let reserved: Vec<u64> = MetaKind::iter().map(MetaKind::reserved_id).collect();
        assert_eq!(reserved, vec![0, 1, 2, 3]);
        assert_eq!(registry.len(), MetaKind::COUNT as u64);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = MetadataRegistry::new();
        let f = MetaEntity::Function(FuncId::new(0));
        let (a, fresh_a) = registry.register(f.clone());
        let (b, fresh_b) = registry.register(f.clone());
        assert_eq!(a, b);
        assert!(fresh_a);
        assert!(!fresh_b);
        assert_eq!(registry.get(&f), Some(a));
    }

    #[test]
    fn test_ids_are_dense() {
        let mut registry = MetadataRegistry::new();
        let entities = [
            MetaEntity::Function(FuncId::new(0)),
            MetaEntity::Global(GlobalId::new(0)),
            MetaEntity::Local(FuncId::new(0), ValueId::new(3)),
            MetaEntity::Loop(FuncId::new(0), BlockId::new(1)),
            MetaEntity::Location(DebugLoc::new("a.c", 1, 1)),
            MetaEntity::Local(FuncId::new(1), ValueId::new(3)),
        ];
        let mut ids: Vec<u64> = entities.iter().map(|e| registry.register(e.clone()).0).collect();
        ids.sort_unstable();
        let base = MetaKind::COUNT as u64;
        assert_eq!(ids, (base..base + entities.len() as u64).collect::<Vec<_>>());
        assert_eq!(registry.len(), base + entities.len() as u64);
    }

    #[test]
    fn test_first_descriptor_wins() {
        let mut registry = MetadataRegistry::new();
        registry.describe(0, "type=file_name*file=a.c**".to_string());
        registry.describe(0, "other".to_string());
        registry.describe(7, "x".to_string());
        assert_eq!(registry.descriptor(0), Some("type=file_name*file=a.c**"));
        let order: Vec<u64> = registry.descriptors().map(|(id, _)| id).collect();
        assert_eq!(order, vec![0, 7]);
    }
}
