//! Lifecycle events and the per-record listener list.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use ember_core::alloc::HashMap;
use parking_lot::Mutex;

use crate::record::AssetRecord;

/// Notifications delivered to a record's listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetEvent {
    /// The payload became available.
    Loaded,
    /// The payload was replaced by a refresh.
    Updated,
    /// The payload was released.
    Unloaded,
}

impl AssetEvent {
    /// Check if this is a load event.
    pub fn is_loaded(&self) -> bool {
        matches!(self, AssetEvent::Loaded)
    }

    /// Check if this is a refresh event.
    pub fn is_updated(&self) -> bool {
        matches!(self, AssetEvent::Updated)
    }

    /// Check if this is an unload event.
    pub fn is_unloaded(&self) -> bool {
        matches!(self, AssetEvent::Unloaded)
    }
}

/// Stable id of a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    /// The raw id. Ids are never reused within one dispatcher.
    pub fn get(&self) -> u64 {
        self.0
    }
}

/// Whether a weak-bound listener's owner was still alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Delivered,
    Expired,
}

type ListenerFn = Arc<dyn Fn(&AssetRecord, AssetEvent) -> Delivery + Send + Sync>;

struct ListenerSlot {
    id: ListenerId,
    callback: ListenerFn,
}

/// Listeners in insertion order.
///
/// Removal leaves a tombstone so other slots keep their index; the list is
/// compacted once tombstones make up half of it.
#[derive(Default)]
struct ListenerList {
    slots: Vec<Option<ListenerSlot>>,
    index: HashMap<ListenerId, usize>,
    tombstones: usize,
}

const COMPACT_THRESHOLD: usize = 16;

impl ListenerList {
    fn push(&mut self, id: ListenerId, callback: ListenerFn) {
        self.index.insert(id, self.slots.len());
        self.slots.push(Some(ListenerSlot { id, callback }));
    }

    fn remove(&mut self, id: ListenerId) -> bool {
        let Some(position) = self.index.remove(&id) else {
            return false;
        };
        self.slots[position] = None;
        self.tombstones += 1;
        if self.tombstones >= COMPACT_THRESHOLD && self.tombstones * 2 >= self.slots.len() {
            self.compact();
        }
        true
    }

    fn compact(&mut self) {
        self.slots.retain(Option::is_some);
        self.index.clear();
        for (position, slot) in self.slots.iter().enumerate() {
            if let Some(slot) = slot {
                self.index.insert(slot.id, position);
            }
        }
        self.tombstones = 0;
    }

    fn get(&self, id: ListenerId) -> Option<ListenerFn> {
        let position = *self.index.get(&id)?;
        self.slots[position].as_ref().map(|slot| Arc::clone(&slot.callback))
    }

    fn snapshot(&self) -> Vec<(ListenerId, ListenerFn)> {
        self.slots
            .iter()
            .flatten()
            .map(|slot| (slot.id, Arc::clone(&slot.callback)))
            .collect()
    }

    fn len(&self) -> usize {
        self.index.len()
    }
}

/// Listeners captured at one moment, delivered to after the capturing lock
/// is released.
pub(crate) struct ListenerSnapshot(Vec<(ListenerId, ListenerFn)>);

/// Ordered listener list for one record.
///
/// Dispatch iterates over a snapshot taken under the lock and invokes the
/// callbacks with the lock released, so a listener may add or remove
/// listeners (including itself) while it runs.
pub struct EventDispatcher {
    listeners: Mutex<ListenerList>,
    next_id: AtomicU64,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    /// An empty dispatcher.
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(ListenerList::default()),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a callback that lives until it is removed.
    pub fn add_listener<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&AssetRecord, AssetEvent) + Send + Sync + 'static,
    {
        let id = self.next_id();
        let callback: ListenerFn = Arc::new(move |record, event| {
            callback(record, event);
            Delivery::Delivered
        });
        self.listeners.lock().push(id, callback);
        id
    }

    /// Register a callback bound to `owner`.
    ///
    /// Only a weak reference to the owner is kept. Once the owner is dropped
    /// the callback is skipped and the entry is pruned on the next dispatch.
    pub fn add_weak_listener<O, F>(&self, owner: &Arc<O>, callback: F) -> ListenerId
    where
        O: Send + Sync + 'static,
        F: Fn(&O, &AssetRecord, AssetEvent) + Send + Sync + 'static,
    {
        let id = self.next_id();
        let owner: Weak<O> = Arc::downgrade(owner);
        let callback: ListenerFn = Arc::new(move |record, event| match owner.upgrade() {
            Some(owner) => {
                callback(&owner, record, event);
                Delivery::Delivered
            }
            None => Delivery::Expired,
        });
        self.listeners.lock().push(id, callback);
        id
    }

    /// Remove a listener. Returns `false` if the id was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.lock().remove(id)
    }

    /// Check if `id` is still registered.
    pub fn contains(&self, id: ListenerId) -> bool {
        self.listeners.lock().index.contains_key(&id)
    }

    /// Number of registered listeners, including weak ones whose owner is gone
    /// but that have not been pruned yet.
    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every listener.
    pub fn clear(&self) {
        let mut listeners = self.listeners.lock();
        *listeners = ListenerList::default();
    }

    /// Deliver `event` to every listener in insertion order.
    ///
    /// Returns the number of listeners that received it. Listeners removed by
    /// an earlier callback in the same dispatch are skipped.
    pub fn dispatch(&self, record: &AssetRecord, event: AssetEvent) -> usize {
        self.dispatch_snapshot(self.snapshot(), record, event)
    }

    /// Capture the current listeners for a later [`Self::dispatch_snapshot`].
    ///
    /// Taken while the caller holds the lock that publishes the state change,
    /// so a listener added after the change is never in the snapshot.
    pub(crate) fn snapshot(&self) -> ListenerSnapshot {
        ListenerSnapshot(self.listeners.lock().snapshot())
    }

    /// Deliver `event` to the listeners captured in `snapshot`.
    ///
    /// Must be called with no record lock held.
    pub(crate) fn dispatch_snapshot(
        &self,
        snapshot: ListenerSnapshot,
        record: &AssetRecord,
        event: AssetEvent,
    ) -> usize {
        let mut delivered = 0;
        let mut expired = Vec::new();

        for (id, callback) in snapshot.0 {
            if !self.contains(id) {
                continue;
            }
            match callback(record, event) {
                Delivery::Delivered => delivered += 1,
                Delivery::Expired => expired.push(id),
            }
        }

        if !expired.is_empty() {
            let mut listeners = self.listeners.lock();
            for id in expired {
                listeners.remove(id);
            }
        }

        delivered
    }

    /// Deliver `event` to a single listener.
    pub fn dispatch_to(&self, id: ListenerId, record: &AssetRecord, event: AssetEvent) -> bool {
        let Some(callback) = self.listeners.lock().get(id) else {
            return false;
        };
        match callback(record, event) {
            Delivery::Delivered => true,
            Delivery::Expired => {
                self.remove_listener(id);
                false
            }
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("listeners", &self.len())
            .finish()
    }
}
