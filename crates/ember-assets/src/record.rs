//! The canonical, reference-counted description of one asset.

use std::any::Any;
use std::fmt;
use std::panic::Location;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::Asset;
use crate::diagnostics::{self, Referrer};
use crate::event::{AssetEvent, EventDispatcher, ListenerId};
use crate::id::{AssetId, AssetType};
use crate::path::AssetPath;
use crate::server::ServerShared;
use crate::state::{AssetVersion, LoadState, RecordFlags};

/// A loaded asset, type-erased. Downcast with [`AssetRecord::payload_as`].
pub type Payload = Arc<dyn Any + Send + Sync>;

/// What a new reference did to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceTransition {
    /// The record was unloaded; this reference latched it and queued a load.
    LoadQueued,
    /// A load is already in flight.
    AlreadyLoading,
    /// The payload is already available.
    AlreadyLoaded,
    /// Nothing can load the record (no server, no loader, or a pinned record
    /// that was released). The reference was still counted.
    Unavailable,
}

/// Mutable lifecycle state, guarded by one lock.
#[derive(Debug, Default)]
struct RecordCore {
    state: LoadState,
    flags: RecordFlags,
    ref_count: u32,
    payload: Option<Payload>,
    unload_queued: bool,
    refresh_queued: bool,
}

/// One named, typed asset.
///
/// The record owns its payload and counts the handles referencing it. The
/// count's edges drive loading: 0->1 queues a load, 1->0 queues an unload.
/// Listeners are guarded separately from the count so that dispatch does not
/// contend with handles acquiring and releasing. No lock is held while a
/// listener runs: a commit captures its listeners under the state lock and
/// delivers after releasing it.
pub struct AssetRecord {
    id: AssetId,
    name: String,
    path: AssetPath,
    extension: Option<String>,
    asset_type: AssetType,
    core: Mutex<RecordCore>,
    dispatcher: EventDispatcher,
    version: AssetVersion,
    server: Weak<ServerShared>,
}

impl AssetRecord {
    pub(crate) fn new(
        name: impl Into<String>,
        path: AssetPath,
        asset_type: AssetType,
        flags: RecordFlags,
        server: Weak<ServerShared>,
    ) -> Self {
        let extension = path.extension();
        Self {
            id: AssetId::new(),
            name: name.into(),
            path,
            extension,
            asset_type,
            core: Mutex::new(RecordCore {
                flags,
                ..RecordCore::default()
            }),
            dispatcher: EventDispatcher::new(),
            version: AssetVersion::new(),
            server,
        }
    }

    /// A record for `T` that belongs to no server.
    ///
    /// Reference transitions on it are counted but never queue jobs. Useful for
    /// exercising listeners and loaders in isolation.
    pub fn detached<T: Asset>(name: impl Into<String>, path: impl Into<AssetPath>) -> Self {
        Self::new(
            name,
            path.into(),
            AssetType::of::<T>(),
            RecordFlags::HAS_METADATA,
            Weak::new(),
        )
    }

    /// Unique id, assigned when the record is built.
    pub fn id(&self) -> AssetId {
        self.id
    }

    /// Registry name the record is looked up by.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path the loader reads from, relative to the asset root.
    pub fn path(&self) -> &AssetPath {
        &self.path
    }

    /// Lower-cased extension without the dot.
    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    /// Payload type the record was registered for.
    pub fn asset_type(&self) -> AssetType {
        self.asset_type
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LoadState {
        self.core.lock().state
    }

    /// State-independent flags. See [`RecordFlags`].
    pub fn flags(&self) -> RecordFlags {
        self.core.lock().flags
    }

    /// Check if the payload is available.
    pub fn is_loaded(&self) -> bool {
        self.state().is_loaded()
    }

    /// Check if the record was built in memory by
    /// [`AssetServer::create_asset`](crate::AssetServer::create_asset).
    ///
    /// Such records are pinned: releasing them never queues an unload.
    pub fn is_manually_created(&self) -> bool {
        self.flags().contains(RecordFlags::MANUALLY_CREATED)
    }

    /// Number of live references from handles and explicit referrers.
    pub fn reference_count(&self) -> u32 {
        self.core.lock().ref_count
    }

    /// Incremented on every `Loaded` or `Updated` commit.
    pub fn version(&self) -> u32 {
        self.version.get()
    }

    /// The type-erased payload, present only while `Loaded`.
    pub fn payload(&self) -> Option<Payload> {
        self.core.lock().payload.clone()
    }

    /// The payload downcast to `T`.
    pub fn payload_as<T: Asset>(&self) -> Option<Arc<T>> {
        self.payload()?.downcast::<T>().ok()
    }

    /// The record's listener list.
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub(crate) fn server(&self) -> Option<Arc<ServerShared>> {
        self.server.upgrade()
    }

    /// Take a reference. The 0->1 edge of an unloaded record queues a load.
    #[track_caller]
    pub fn add_referrer(self: &Arc<Self>) -> ReferenceTransition {
        self.acquire(Referrer::new(None, Location::caller()))
    }

    /// Drop a reference. The 1->0 edge queues an unload.
    ///
    /// Returns `false` without changing anything if the count is already zero,
    /// which is reported as a usage error.
    pub fn remove_referrer(self: &Arc<Self>) -> bool {
        self.release(None)
    }

    pub(crate) fn acquire(self: &Arc<Self>, referrer: Referrer) -> ReferenceTransition {
        let server = self.server();
        let transition = {
            let mut core = self.core.lock();
            core.ref_count += 1;
            match core.state {
                LoadState::Loaded => ReferenceTransition::AlreadyLoaded,
                LoadState::Loading => ReferenceTransition::AlreadyLoading,
                LoadState::Unloaded
                    if server.is_none() || core.flags.contains(RecordFlags::MANUALLY_CREATED) =>
                {
                    ReferenceTransition::Unavailable
                }
                LoadState::Unloaded => {
                    core.state = LoadState::Loading;
                    ReferenceTransition::LoadQueued
                }
            }
        };

        let Some(server) = server else {
            return transition;
        };
        server.diagnostics().track_acquire(self.id, referrer);

        if transition == ReferenceTransition::LoadQueued {
            tracing::trace!("'{}' latched for loading ({})", self.name, self.path);
            return server.enqueue_load(self);
        }
        transition
    }

    pub(crate) fn release(self: &Arc<Self>, handle: Option<u64>) -> bool {
        let server = self.server();
        let needs_unload = {
            let mut core = self.core.lock();
            if core.ref_count == 0 {
                drop(core);
                match &server {
                    Some(server) => server.diagnostics().usage_error(format_args!(
                        "reference count underflow on '{}'",
                        self.name
                    )),
                    None => diagnostics::detached_usage_error(format_args!(
                        "reference count underflow on '{}'",
                        self.name
                    )),
                }
                return false;
            }
            core.ref_count -= 1;

            let unload = core.ref_count == 0
                && server.is_some()
                && !core.flags.contains(RecordFlags::MANUALLY_CREATED)
                && !core.state.is_unloaded()
                && !core.unload_queued;
            if unload {
                core.unload_queued = true;
            }
            unload
        };

        if let Some(server) = server {
            server.diagnostics().track_release(self.id, handle);
            if needs_unload {
                tracing::trace!("'{}' released by its last referrer", self.name);
                server.enqueue_unload(self);
            }
        }
        true
    }

    /// Register a listener for this record's events.
    pub fn add_listener<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&AssetRecord, AssetEvent) + Send + Sync + 'static,
    {
        self.dispatcher.add_listener(callback)
    }

    /// Register a listener that lives only as long as `owner`.
    pub fn add_weak_listener<O, F>(&self, owner: &Arc<O>, callback: F) -> ListenerId
    where
        O: Send + Sync + 'static,
        F: Fn(&O, &AssetRecord, AssetEvent) + Send + Sync + 'static,
    {
        self.dispatcher.add_weak_listener(owner, callback)
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.dispatcher.remove_listener(id)
    }

    /// Register a listener and catch it up if the record is already loaded.
    ///
    /// The listener receives exactly one `Loaded` for the current payload:
    /// either from the in-flight load, or from a catch-up event queued behind
    /// the record's other jobs.
    pub fn subscribe<F>(self: &Arc<Self>, callback: F) -> ListenerId
    where
        F: Fn(&AssetRecord, AssetEvent) + Send + Sync + 'static,
    {
        // A commit captures its listeners under the same lock that publishes
        // `Loaded`. Registering under it too means a listener is either in the
        // commit's snapshot or sees `Loaded` here, never both.
        let (id, loaded) = {
            let core = self.core.lock();
            (self.dispatcher.add_listener(callback), core.state.is_loaded())
        };
        if loaded {
            self.push_loaded(id);
        }
        id
    }

    /// Queue a catch-up `Loaded` for one listener if the record is loaded.
    ///
    /// Returns `true` if an event was queued (or, for a detached record,
    /// delivered). A listener registered before an in-flight load commits
    /// may hear `Loaded` twice; use [`Self::subscribe`] to avoid that.
    pub fn dispatch_if_loaded(self: &Arc<Self>, listener: ListenerId) -> bool {
        if !self.is_loaded() {
            return false;
        }
        self.push_loaded(listener)
    }

    fn push_loaded(self: &Arc<Self>, listener: ListenerId) -> bool {
        match self.server() {
            Some(server) => server.enqueue_push_event(self, listener, AssetEvent::Loaded),
            None => self.dispatcher.dispatch_to(listener, self, AssetEvent::Loaded),
        }
    }
}

/// Lifecycle transitions driven by the job worker and the registry.
///
/// Kept off the public record API: handles only see reference counting and
/// listeners.
pub(crate) trait RecordLifecycle {
    /// Latch an unloaded sibling for a load already queued for its path.
    fn latch_sibling(&self) -> bool;

    /// Drop the latch after a failed load.
    fn abort_load(&self) -> bool;

    /// `Loading -> Loaded`, then dispatch `Loaded`.
    fn commit_load(&self, payload: Payload) -> bool;

    /// Swap the payload of a loaded record, then dispatch `Updated`.
    fn commit_refresh(&self, payload: Payload) -> bool;

    /// Mark a loaded record stale and claim its refresh slot.
    fn begin_refresh(&self) -> bool;

    fn end_refresh(&self);

    /// `Loaded -> Unloaded`, taking the payload.
    ///
    /// The unload target is skipped when re-referenced; siblings are only
    /// released if nothing references them. `forced` ignores the count.
    fn begin_unload(&self, target: bool, forced: bool) -> Option<Payload>;

    fn clear_unload_queued(&self);

    /// Install a payload built in memory.
    fn commit_manual(&self, payload: Payload);

    /// Release a payload outside of the job queue.
    fn take_payload(&self) -> Option<Payload>;
}

impl RecordLifecycle for AssetRecord {
    fn latch_sibling(&self) -> bool {
        let mut core = self.core.lock();
        if core.state.is_unloaded() && !core.flags.contains(RecordFlags::MANUALLY_CREATED) {
            core.state = LoadState::Loading;
            true
        } else {
            false
        }
    }

    fn abort_load(&self) -> bool {
        let mut core = self.core.lock();
        if core.state.is_loading() {
            core.state = LoadState::Unloaded;
            true
        } else {
            false
        }
    }

    fn commit_load(&self, payload: Payload) -> bool {
        let listeners = {
            let mut core = self.core.lock();
            if !core.state.is_loading() {
                return false;
            }
            core.payload = Some(payload);
            core.state = LoadState::Loaded;
            core.flags.remove(RecordFlags::STALE);
            self.dispatcher.snapshot()
        };
        let version = self.version.increment();
        tracing::debug!("Loaded '{}' ({}) v{}", self.name, self.path, version);
        self.dispatcher.dispatch_snapshot(listeners, self, AssetEvent::Loaded);
        true
    }

    fn commit_refresh(&self, payload: Payload) -> bool {
        let listeners = {
            let mut core = self.core.lock();
            core.refresh_queued = false;
            if !core.state.is_loaded() {
                return false;
            }
            core.payload = Some(payload);
            core.flags.remove(RecordFlags::STALE);
            self.dispatcher.snapshot()
        };
        let version = self.version.increment();
        tracing::debug!("Refreshed '{}' ({}) v{}", self.name, self.path, version);
        self.dispatcher.dispatch_snapshot(listeners, self, AssetEvent::Updated);
        true
    }

    fn begin_refresh(&self) -> bool {
        let mut core = self.core.lock();
        if !core.state.is_loaded()
            || core.refresh_queued
            || core.flags.contains(RecordFlags::MANUALLY_CREATED)
        {
            return false;
        }
        core.refresh_queued = true;
        core.flags.insert(RecordFlags::STALE);
        true
    }

    fn end_refresh(&self) {
        self.core.lock().refresh_queued = false;
    }

    fn begin_unload(&self, target: bool, forced: bool) -> Option<Payload> {
        let mut core = self.core.lock();
        if target {
            core.unload_queued = false;
        }
        if !core.state.is_loaded() || (!forced && core.ref_count > 0) {
            return None;
        }
        if !forced && core.flags.contains(RecordFlags::MANUALLY_CREATED) {
            return None;
        }
        core.state = LoadState::Unloaded;
        core.flags.remove(RecordFlags::STALE);
        core.payload.take()
    }

    fn clear_unload_queued(&self) {
        self.core.lock().unload_queued = false;
    }

    fn commit_manual(&self, payload: Payload) {
        {
            let mut core = self.core.lock();
            core.payload = Some(payload);
            core.state = LoadState::Loaded;
            core.flags.insert(RecordFlags::MANUALLY_CREATED);
        }
        self.version.increment();
    }

    fn take_payload(&self) -> Option<Payload> {
        let mut core = self.core.lock();
        core.state = LoadState::Unloaded;
        core.unload_queued = false;
        core.refresh_queued = false;
        core.payload.take()
    }
}

impl fmt::Debug for AssetRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core.lock();
        f.debug_struct("AssetRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("path", &self.path)
            .field("asset_type", &self.asset_type.name())
            .field("state", &core.state)
            .field("flags", &core.flags)
            .field("ref_count", &core.ref_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    struct Mesh(u32);
    impl Asset for Mesh {}

    fn record() -> Arc<AssetRecord> {
        Arc::new(AssetRecord::detached::<Mesh>("cube", "models/cube.mesh"))
    }

    #[test]
    fn test_detached_record_metadata() {
        let record = record();
        assert_eq!(record.name(), "cube");
        assert_eq!(record.path().as_str(), "models/cube.mesh");
        assert_eq!(record.extension(), Some("mesh"));
        assert!(record.asset_type().is::<Mesh>());
        assert!(record.flags().contains(RecordFlags::HAS_METADATA));
        assert_eq!(record.state(), LoadState::Unloaded);
        assert!(record.payload().is_none());
    }

    #[test]
    fn test_concurrent_reference_counting() {
        let record = record();
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let record = Arc::clone(&record);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        record.add_referrer();
                    }
                    for _ in 0..400 {
                        assert!(record.remove_referrer());
                    }
                })
            })
            .collect();
        for handle in threads {
            handle.join().unwrap();
        }
        assert_eq!(record.reference_count(), 8 * 600);
    }

    #[test]
    fn test_underflow_is_refused() {
        let record = record();
        assert!(!record.remove_referrer());
        assert_eq!(record.reference_count(), 0);
    }

    #[test]
    fn test_commit_load_requires_latch() {
        let record = record();
        assert!(!record.commit_load(Arc::new(Mesh(1))));

        assert!(record.latch_sibling());
        assert!(!record.latch_sibling());
        assert!(record.commit_load(Arc::new(Mesh(3))));
        assert_eq!(record.state(), LoadState::Loaded);
        assert_eq!(record.payload_as::<Mesh>().map(|mesh| mesh.0), Some(3));
        assert_eq!(record.version(), 1);
    }

    #[test]
    fn test_payload_present_only_while_loaded() {
        let record = record();
        record.latch_sibling();
        assert!(record.payload().is_none());
        record.commit_load(Arc::new(Mesh(1)));
        assert!(record.payload().is_some());

        assert!(record.begin_unload(true, false).is_some());
        assert_eq!(record.state(), LoadState::Unloaded);
        assert!(record.payload().is_none());
    }

    #[test]
    fn test_referenced_target_is_not_unloaded() {
        let record = record();
        record.latch_sibling();
        record.commit_load(Arc::new(Mesh(1)));
        record.add_referrer();

        assert!(record.begin_unload(true, false).is_none());
        assert!(record.is_loaded());
        assert!(record.begin_unload(true, true).is_some());
    }

    #[test]
    fn test_refresh_keeps_loaded_and_bumps_version() {
        let record = record();
        record.latch_sibling();
        record.commit_load(Arc::new(Mesh(1)));

        assert!(record.begin_refresh());
        assert!(!record.begin_refresh());
        assert!(record.flags().contains(RecordFlags::STALE));
        assert!(record.commit_refresh(Arc::new(Mesh(2))));
        assert!(!record.flags().contains(RecordFlags::STALE));
        assert_eq!(record.payload_as::<Mesh>().map(|mesh| mesh.0), Some(2));
        assert_eq!(record.version(), 2);
    }

    #[test]
    fn test_subscribe_catches_up_detached_record_once() {
        let record = record();
        record.latch_sibling();
        record.commit_load(Arc::new(Mesh(1)));

        let hits = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&hits);
        record.subscribe(move |_, event| seen.lock().push(event));
        assert_eq!(*hits.lock(), vec![AssetEvent::Loaded]);
    }

    #[test]
    fn test_payload_as_wrong_type_is_none() {
        struct Shader;
        impl Asset for Shader {}

        let record = record();
        record.latch_sibling();
        record.commit_load(Arc::new(Mesh(1)));
        assert!(record.payload_as::<Shader>().is_none());
    }
}
