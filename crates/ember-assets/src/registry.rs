//! Ownership and lookup of every record a server knows about.

use std::sync::Arc;

use ember_core::alloc::HashMap;
use parking_lot::RwLock;

use crate::error::{AssetError, AssetResult};
use crate::id::AssetId;
use crate::path::AssetPath;
use crate::record::AssetRecord;

#[derive(Default)]
struct RegistryIndex {
    by_id: HashMap<AssetId, Arc<AssetRecord>>,
    by_name: HashMap<String, Vec<AssetId>>,
    by_path: HashMap<AssetPath, Vec<AssetId>>,
    // Records replaced by a reload, kept alive until their handles let go.
    retired: HashMap<AssetId, Arc<AssetRecord>>,
}

impl RegistryIndex {
    fn insert(&mut self, record: Arc<AssetRecord>) {
        let id = record.id();
        self.by_name
            .entry(record.name().to_string())
            .or_default()
            .push(id);
        if !record.path().is_empty() {
            self.by_path.entry(record.path().clone()).or_default().push(id);
        }
        self.by_id.insert(id, record);
    }

    fn remove(&mut self, id: AssetId) -> Option<Arc<AssetRecord>> {
        let record = self.by_id.remove(&id)?;
        remove_id(&mut self.by_name, record.name(), id);
        if !record.path().is_empty() {
            remove_id(&mut self.by_path, record.path(), id);
        }
        Some(record)
    }

    fn ids_for_path(&self, path: &AssetPath) -> &[AssetId] {
        self.by_path.get(path).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn remove_id<K, Q>(index: &mut HashMap<K, Vec<AssetId>>, key: &Q, id: AssetId)
where
    K: std::borrow::Borrow<Q> + std::hash::Hash + Eq,
    Q: std::hash::Hash + Eq + ?Sized,
{
    if let Some(ids) = index.get_mut(key) {
        ids.retain(|existing| *existing != id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

/// Every record a server owns, indexed by id, name and path.
///
/// Name and path lookups return records in registration order. Records that
/// were created in memory have no path and are only reachable by id or name.
#[derive(Default)]
pub struct AssetRegistry {
    index: RwLock<RegistryIndex>,
}

impl AssetRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `record` and return the record that now owns its slot.
    ///
    /// If a record with the same path and name is already registered, it is
    /// returned unchanged unless `reload` is set. With `reload` the new record
    /// takes over every index; the old one is retired and keeps serving the
    /// handles that still point at it until they let go.
    pub fn register(&self, record: Arc<AssetRecord>, reload: bool) -> Arc<AssetRecord> {
        let mut index = self.index.write();

        if !record.path().is_empty() {
            let existing = index
                .ids_for_path(record.path())
                .iter()
                .filter_map(|id| index.by_id.get(id))
                .find(|existing| existing.name() == record.name())
                .cloned();

            if let Some(existing) = existing {
                if !reload {
                    return existing;
                }
                if let Some(old) = index.remove(existing.id()) {
                    tracing::debug!("Retiring '{}' ({}) for reload", old.name(), old.path());
                    index.retired.insert(old.id(), old);
                }
            }
        }

        tracing::trace!(
            "Registered '{}' ({}) as {}",
            record.name(),
            record.path(),
            record.id()
        );
        index.insert(Arc::clone(&record));
        record
    }

    /// Remove a record. Fails while any handle references it.
    pub fn unregister(&self, id: AssetId) -> AssetResult<Arc<AssetRecord>> {
        let mut index = self.index.write();
        let record = index
            .by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| AssetError::NotFound {
                path: id.to_string(),
            })?;

        let count = record.reference_count();
        if count > 0 {
            return Err(AssetError::StillReferenced {
                name: record.name().to_string(),
                count,
            });
        }
        index.remove(id);
        Ok(record)
    }

    /// Look up a live record by id.
    pub fn find_by_id(&self, id: AssetId) -> Option<Arc<AssetRecord>> {
        self.index.read().by_id.get(&id).cloned()
    }

    /// The first record registered under `name`.
    pub fn find_by_name(&self, name: &str) -> Option<Arc<AssetRecord>> {
        let index = self.index.read();
        let id = index.by_name.get(name)?.first()?;
        index.by_id.get(id).cloned()
    }

    /// Every live record registered under `name`, in registration order.
    pub fn find_all_by_name(&self, name: &str) -> Vec<Arc<AssetRecord>> {
        let index = self.index.read();
        index
            .by_name
            .get(name)
            .map(|ids| ids.iter().filter_map(|id| index.by_id.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// The first record registered for `path`.
    pub fn find_by_path(&self, path: impl Into<AssetPath>) -> Option<Arc<AssetRecord>> {
        let path = path.into();
        let index = self.index.read();
        let id = index.ids_for_path(&path).first()?;
        index.by_id.get(id).cloned()
    }

    /// Every record sharing `path`, in registration order.
    pub fn records_for_path(&self, path: &AssetPath) -> Vec<Arc<AssetRecord>> {
        let index = self.index.read();
        index
            .ids_for_path(path)
            .iter()
            .filter_map(|id| index.by_id.get(id).cloned())
            .collect()
    }

    /// Check if `id` names a live record.
    pub fn contains(&self, id: AssetId) -> bool {
        self.index.read().by_id.contains_key(&id)
    }

    /// Every live record, in no particular order.
    pub fn all(&self) -> Vec<Arc<AssetRecord>> {
        self.index.read().by_id.values().cloned().collect()
    }

    /// Distinct registered paths.
    pub fn paths(&self) -> Vec<AssetPath> {
        let mut paths: Vec<_> = self.index.read().by_path.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Number of live records. Retired records are not counted.
    pub fn len(&self) -> usize {
        self.index.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of records removed from lookup but still loaded or referenced.
    pub fn retired_len(&self) -> usize {
        self.index.read().retired.len()
    }

    /// Retired records still loaded or referenced.
    pub(crate) fn retired(&self) -> Vec<Arc<AssetRecord>> {
        self.index.read().retired.values().cloned().collect()
    }

    /// Drop retired records that nothing references any more.
    pub fn prune_retired(&self) -> usize {
        let mut index = self.index.write();
        let before = index.retired.len();
        index
            .retired
            .retain(|_, record| record.reference_count() > 0 || !record.state().is_unloaded());
        before - index.retired.len()
    }

    /// Remove every record, live and retired.
    pub(crate) fn drain(&self) -> Vec<Arc<AssetRecord>> {
        let mut index = self.index.write();
        let mut records: Vec<_> = index.by_id.drain().map(|(_, record)| record).collect();
        records.extend(index.retired.drain().map(|(_, record)| record));
        index.by_name.clear();
        index.by_path.clear();
        records
    }
}

impl std::fmt::Debug for AssetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let index = self.index.read();
        f.debug_struct("AssetRegistry")
            .field("records", &index.by_id.len())
            .field("paths", &index.by_path.len())
            .field("retired", &index.retired.len())
            .finish()
    }
}
