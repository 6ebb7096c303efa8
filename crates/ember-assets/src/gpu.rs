//! Side-table from graphics objects back to the asset that owns them.
//!
//! Render backends hand out opaque object ids (buffer names, shader program
//! handles). Loaders bind each one to the owning record here instead of
//! smuggling a pointer through the backend's user-data slot.

use ember_core::alloc::HashMap;
use parking_lot::RwLock;

use crate::id::AssetId;

/// An opaque graphics-backend object id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuObjectId(u64);

impl GpuObjectId {
    /// Wrap a backend object id.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The backend object id.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for GpuObjectId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Maps graphics objects to their owning asset.
#[derive(Debug, Default)]
pub struct GpuObjectTable {
    owners: RwLock<HashMap<GpuObjectId, AssetId>>,
}

impl GpuObjectTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `object` to `owner`, returning the previous owner if it was bound.
    pub fn bind(&self, object: GpuObjectId, owner: AssetId) -> Option<AssetId> {
        let previous = self.owners.write().insert(object, owner);
        if let Some(previous) = previous.filter(|previous| *previous != owner) {
            tracing::warn!(
                "GPU object {} rebound from asset {} to {}",
                object.get(),
                previous,
                owner
            );
        }
        previous
    }

    /// The asset `object` is bound to.
    pub fn owner_of(&self, object: GpuObjectId) -> Option<AssetId> {
        self.owners.read().get(&object).copied()
    }

    /// Remove the binding for `object`, returning its owner.
    pub fn unbind(&self, object: GpuObjectId) -> Option<AssetId> {
        self.owners.write().remove(&object)
    }

    /// All objects currently bound to `owner`, sorted.
    pub fn objects_of(&self, owner: AssetId) -> Vec<GpuObjectId> {
        let mut objects: Vec<_> = self
            .owners
            .read()
            .iter()
            .filter(|(_, bound)| **bound == owner)
            .map(|(object, _)| *object)
            .collect();
        objects.sort_unstable();
        objects
    }

    /// Remove every binding for `owner` and return the objects that were bound.
    pub fn unbind_owner(&self, owner: AssetId) -> Vec<GpuObjectId> {
        let mut removed = Vec::new();
        self.owners.write().retain(|object, bound| {
            if *bound == owner {
                removed.push(*object);
                false
            } else {
                true
            }
        });
        removed.sort_unstable();
        removed
    }

    /// Number of bound objects.
    pub fn len(&self) -> usize {
        self.owners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_and_lookup() {
        let table = GpuObjectTable::new();
        let mesh = AssetId::new();

        assert_eq!(table.bind(GpuObjectId::new(7), mesh), None);
        assert_eq!(table.owner_of(GpuObjectId::new(7)), Some(mesh));
        assert_eq!(table.owner_of(GpuObjectId::new(8)), None);
    }

    #[test]
    fn test_unbind_owner_only_touches_that_owner() {
        let table = GpuObjectTable::new();
        let mesh = AssetId::new();
        let shader = AssetId::new();

        table.bind(GpuObjectId::new(3), mesh);
        table.bind(GpuObjectId::new(1), mesh);
        table.bind(GpuObjectId::new(2), shader);

        assert_eq!(table.objects_of(mesh), vec![GpuObjectId::new(1), GpuObjectId::new(3)]);
        assert_eq!(table.unbind_owner(mesh), vec![GpuObjectId::new(1), GpuObjectId::new(3)]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.owner_of(GpuObjectId::new(2)), Some(shader));
    }

    #[test]
    fn test_rebind_returns_previous_owner() {
        let table = GpuObjectTable::new();
        let first = AssetId::new();
        let second = AssetId::new();

        table.bind(GpuObjectId::from(5), first);
        assert_eq!(table.bind(GpuObjectId::from(5), second), Some(first));
        assert_eq!(table.unbind(GpuObjectId::from(5)), Some(second));
        assert!(table.is_empty());
    }
}
