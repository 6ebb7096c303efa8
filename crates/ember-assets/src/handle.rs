//! User-facing handles: typed references that take part in a record's
//! reference count.
//!
//! [`AssetPtr`] is automatic: it references its record for as long as it
//! exists. [`AssetRef`] is manual: the owner calls `load_async`/`load_sync`
//! and must call `unload` before dropping it.

use std::fmt;
use std::panic::Location;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::Asset;
use crate::diagnostics::{self, Referrer};
use crate::event::{AssetEvent, ListenerId};
use crate::id::AssetId;
use crate::job;
use crate::record::{AssetRecord, ReferenceTransition};
use crate::state::{HandleState, LoadState};

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

const DETACHED_POLL: Duration = Duration::from_millis(2);

fn usage_error(record: Option<&AssetRecord>, message: fmt::Arguments<'_>) {
    match record.and_then(AssetRecord::server) {
        Some(server) => server.diagnostics().usage_error(message),
        None => diagnostics::detached_usage_error(message),
    }
}

/// The handle's view of the payload, shared with its record listener.
struct HandleSlot<T> {
    state: Mutex<HandleState<T>>,
    changed: Condvar,
}

impl<T: Asset> HandleSlot<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(HandleState::Unloaded),
            changed: Condvar::new(),
        }
    }

    fn on_event(&self, record: &AssetRecord, event: AssetEvent) {
        let mut state = self.state.lock();
        match event {
            AssetEvent::Loaded | AssetEvent::Updated => {
                // A handle that let go does not pick the payload back up.
                if state.is_unloaded() {
                    return;
                }
                if let Some(payload) = record.payload_as::<T>() {
                    *state = HandleState::Loaded(payload);
                }
            }
            // A pending reload ignores the release of the previous payload.
            AssetEvent::Unloaded => {
                if state.is_loaded() {
                    *state = HandleState::Unloaded;
                }
            }
        }
        self.changed.notify_all();
    }

    fn set(&self, value: HandleState<T>) {
        *self.state.lock() = value;
        self.changed.notify_all();
    }

    fn get(&self) -> Option<Arc<T>> {
        self.state.lock().get_cloned()
    }
}

/// Shared machinery of both handle flavors.
struct HandleCore<T: Asset> {
    id: u64,
    record: Weak<AssetRecord>,
    slot: Arc<HandleSlot<T>>,
    listener: Option<ListenerId>,
    holds_reference: AtomicBool,
}

impl<T: Asset> HandleCore<T> {
    fn new() -> Self {
        Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            record: Weak::new(),
            slot: Arc::new(HandleSlot::new()),
            listener: None,
            holds_reference: AtomicBool::new(false),
        }
    }

    fn record(&self) -> Option<Arc<AssetRecord>> {
        self.record.upgrade()
    }

    /// Point the handle at `record`, dropping any reference to the old one.
    fn attach(&mut self, record: Option<&Arc<AssetRecord>>) -> bool {
        self.release();
        self.detach();

        let Some(record) = record else {
            return false;
        };
        if !record.asset_type().is::<T>() {
            usage_error(
                Some(record),
                format_args!(
                    "handle for {} cannot target '{}' of type {}",
                    T::type_name(),
                    record.name(),
                    record.asset_type().name()
                ),
            );
            return false;
        }

        self.record = Arc::downgrade(record);
        self.listener = Some(record.add_weak_listener(&self.slot, |slot, record, event| {
            slot.on_event(record, event)
        }));
        true
    }

    fn detach(&mut self) {
        if let (Some(record), Some(listener)) = (self.record.upgrade(), self.listener.take()) {
            record.remove_listener(listener);
        }
        self.record = Weak::new();
        self.listener = None;
        self.slot.set(HandleState::Unloaded);
    }

    fn load_async(&self, location: &'static Location<'static>) -> bool {
        let Some(record) = self.record() else {
            usage_error(None, format_args!("load requested on a null {} handle", T::type_name()));
            return false;
        };
        if self.holds_reference.swap(true, Ordering::AcqRel) {
            return true;
        }

        self.slot.set(HandleState::Loading);
        match record.acquire(Referrer::new(Some(self.id), location)) {
            ReferenceTransition::AlreadyLoaded => {
                if let Some(payload) = record.payload_as::<T>() {
                    self.slot.set(HandleState::Loaded(payload));
                }
                true
            }
            ReferenceTransition::LoadQueued | ReferenceTransition::AlreadyLoading => true,
            ReferenceTransition::Unavailable => {
                tracing::warn!("'{}' ({}) cannot be loaded", record.name(), record.path());
                self.release();
                false
            }
        }
    }

    /// Drop the reference if one is held.
    fn release(&self) -> bool {
        if !self.holds_reference.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.slot.set(HandleState::Unloaded);
        if let Some(record) = self.record() {
            record.release(Some(self.id));
        }
        true
    }

    fn unload(&self) -> bool {
        if self.release() {
            return true;
        }
        let record = self.record();
        usage_error(
            record.as_deref(),
            format_args!(
                "unload of {} handle without a prior load",
                record.as_ref().map_or("null", |record| record.name())
            ),
        );
        false
    }

    fn load_sync(
        &self,
        location: &'static Location<'static>,
        deadline: Option<Instant>,
        warn_if_pending: bool,
    ) -> Option<Arc<T>> {
        if job::on_job_thread() {
            let record = self.record();
            usage_error(
                record.as_deref(),
                format_args!("load_sync called from an asset job thread"),
            );
            return self.slot.get();
        }
        if let Some(payload) = self.slot.get() {
            return Some(payload);
        }

        if self.holds_reference.load(Ordering::Acquire) {
            if warn_if_pending {
                tracing::warn!(
                    "load_sync on {} handle #{} while its load is already pending",
                    T::type_name(),
                    self.id
                );
                return self.slot.get();
            }
        } else if !self.load_async(location) {
            return None;
        }
        self.wait(deadline)
    }

    /// Pump-wait until the slot leaves `Loading`.
    ///
    /// Each round makes progress on whatever this thread can run (the
    /// main-thread queue if it owns it, jobs in manual mode), then sleeps on
    /// the slot's condvar for at most one poll interval.
    fn wait(&self, deadline: Option<Instant>) -> Option<Arc<T>> {
        loop {
            {
                let state = self.slot.state.lock();
                match &*state {
                    HandleState::Loaded(payload) => return Some(Arc::clone(payload)),
                    HandleState::Unloaded => return None,
                    HandleState::Loading => {}
                }
            }

            let record = self.record()?;
            match record.state() {
                LoadState::Loaded => {
                    if let Some(payload) = record.payload_as::<T>() {
                        let mut state = self.slot.state.lock();
                        if state.is_loading() {
                            *state = HandleState::Loaded(payload);
                        }
                        continue;
                    }
                }
                // We still hold a reference, so nothing but a failed load
                // that released its latch can put the record back here.
                LoadState::Unloaded => {
                    tracing::warn!("Load of '{}' ({}) failed", record.name(), record.path());
                    self.release();
                    return None;
                }
                LoadState::Loading => {}
            }

            let server = record.server();
            drop(record);
            let progressed = server.as_ref().map_or(0, |server| server.pump());

            let now = Instant::now();
            if deadline.is_some_and(|deadline| now >= deadline) {
                return None;
            }
            if progressed > 0 {
                continue;
            }

            let interval = server
                .as_ref()
                .map_or(DETACHED_POLL, |server| server.wait_poll_interval());
            drop(server);
            let timeout = deadline.map_or(interval, |deadline| {
                interval.min(deadline.saturating_duration_since(now))
            });
            let mut state = self.slot.state.lock();
            if state.is_loading() {
                self.slot.changed.wait_for(&mut state, timeout);
            }
        }
    }

    fn handle_state(&self) -> HandleState<T> {
        self.slot.state.lock().clone()
    }

    fn state(&self) -> LoadState {
        LoadState::from(&*self.slot.state.lock())
    }
}

impl<T: Asset> Drop for HandleCore<T> {
    fn drop(&mut self) {
        if let (Some(record), Some(listener)) = (self.record.upgrade(), self.listener.take()) {
            record.remove_listener(listener);
        }
    }
}

impl<T: Asset> fmt::Debug for HandleCore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id)
            .field("type", &T::type_name())
            .field("record", &self.record().map(|record| record.name().to_string()))
            .field("state", &self.state())
            .finish()
    }
}

macro_rules! impl_handle_accessors {
    ($handle:ident) => {
        impl<T: Asset> $handle<T> {
            /// A handle with no target.
            pub fn null() -> Self {
                Self {
                    core: HandleCore::new(),
                }
            }

            /// Process-unique id of this handle.
            pub fn handle_id(&self) -> u64 {
                self.core.id
            }

            /// The payload, if the handle has it.
            pub fn get(&self) -> Option<Arc<T>> {
                self.core.slot.get()
            }

            /// The handle's view of the load state.
            pub fn state(&self) -> LoadState {
                self.core.state()
            }

            /// A snapshot of the handle's cached state.
            pub fn handle_state(&self) -> HandleState<T> {
                self.core.handle_state()
            }

            /// Check if the payload is available to this handle.
            pub fn is_loaded(&self) -> bool {
                self.state().is_loaded()
            }

            /// `true` if the handle has no live target record.
            pub fn is_null(&self) -> bool {
                self.core.record().is_none()
            }

            /// `true` while the handle counts toward its record's references.
            pub fn holds_reference(&self) -> bool {
                self.core.holds_reference.load(Ordering::Acquire)
            }

            /// The target record, if it is still alive.
            pub fn record(&self) -> Option<Arc<AssetRecord>> {
                self.core.record()
            }

            /// Id of the target record.
            pub fn asset_id(&self) -> Option<AssetId> {
                self.core.record().map(|record| record.id())
            }

            /// The record's version, for change detection.
            pub fn version(&self) -> Option<u32> {
                self.core.record().map(|record| record.version())
            }

            /// Like `load_sync`, but gives up after `timeout` and returns
            /// `None` while the load is still pending.
            #[track_caller]
            pub fn load_sync_timeout(&self, timeout: Duration) -> Option<Arc<T>> {
                self.core
                    .load_sync(Location::caller(), Some(Instant::now() + timeout), false)
            }
        }

        impl<T: Asset> Default for $handle<T> {
            fn default() -> Self {
                Self::null()
            }
        }

        impl<T: Asset> fmt::Debug for $handle<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($handle)).field(&self.core).finish()
            }
        }
    };
}

/// An automatic handle.
///
/// Takes a reference when it is created, cloned or retargeted and gives it
/// back when dropped. The first reference to an unloaded record queues its
/// load.
pub struct AssetPtr<T: Asset> {
    core: HandleCore<T>,
}

impl_handle_accessors!(AssetPtr);

impl<T: Asset> AssetPtr<T> {
    /// Reference `record` and start loading it.
    ///
    /// A record of another type yields a null handle and a usage error.
    #[track_caller]
    pub fn new(record: &Arc<AssetRecord>) -> Self {
        Self::attach(record, Location::caller())
    }

    pub(crate) fn attach(record: &Arc<AssetRecord>, location: &'static Location<'static>) -> Self {
        let mut core = HandleCore::new();
        if core.attach(Some(record)) {
            core.load_async(location);
        }
        Self { core }
    }

    /// Retarget the handle, releasing the old record first.
    ///
    /// Retargeting to the record already held keeps the reference as is.
    #[track_caller]
    pub fn set_asset(&mut self, record: Option<&Arc<AssetRecord>>) -> bool {
        if let (Some(current), Some(record)) = (self.core.record(), record)
            && Arc::ptr_eq(&current, record)
        {
            return true;
        }
        if !self.core.attach(record) {
            return false;
        }
        self.core.load_async(Location::caller());
        true
    }

    /// Block until the payload is available, pumping the main-thread queue
    /// while waiting if this thread owns it.
    ///
    /// Blocks forever if the loader never completes; see
    /// [`load_sync_timeout`](Self::load_sync_timeout).
    #[track_caller]
    pub fn load_sync(&self) -> Option<Arc<T>> {
        self.core.load_sync(Location::caller(), None, false)
    }
}

impl<T: Asset> Clone for AssetPtr<T> {
    #[track_caller]
    fn clone(&self) -> Self {
        match self.core.record() {
            Some(record) => Self::attach(&record, Location::caller()),
            None => Self::null(),
        }
    }
}

impl<T: Asset> Drop for AssetPtr<T> {
    fn drop(&mut self) {
        self.core.release();
    }
}

/// A manual handle.
///
/// Attaching does not reference the record; `load_async`/`load_sync` do, and
/// `unload` gives the reference back. Dropping an `AssetRef` that still holds
/// a reference is a usage error (the reference is released anyway).
pub struct AssetRef<T: Asset> {
    core: HandleCore<T>,
}

impl_handle_accessors!(AssetRef);

impl<T: Asset> AssetRef<T> {
    /// Target `record` without loading it.
    pub fn new(record: &Arc<AssetRecord>) -> Self {
        let mut core = HandleCore::new();
        core.attach(Some(record));
        Self { core }
    }

    /// Retarget the handle. A held reference on the old record is released.
    pub fn set_asset(&mut self, record: Option<&Arc<AssetRecord>>) -> bool {
        self.core.attach(record)
    }

    /// Reference the record, queueing its load if it is the first reference.
    ///
    /// Returns `false` for a null handle or a record that cannot be loaded.
    #[track_caller]
    pub fn load_async(&self) -> bool {
        self.core.load_async(Location::caller())
    }

    /// Load and block until the payload is available.
    ///
    /// If a load requested by this handle is still pending, warns and returns
    /// the current value instead of waiting.
    #[track_caller]
    pub fn load_sync(&self) -> Option<Arc<T>> {
        self.core.load_sync(Location::caller(), None, true)
    }

    /// Give the reference back. Reports a usage error if none is held.
    pub fn unload(&self) -> bool {
        self.core.unload()
    }
}

impl<T: Asset> Drop for AssetRef<T> {
    fn drop(&mut self) {
        if self.core.holds_reference.load(Ordering::Acquire) {
            let record = self.core.record();
            usage_error(
                record.as_deref(),
                format_args!(
                    "AssetRef for '{}' dropped without unload",
                    record.as_ref().map_or("null", |record| record.name())
                ),
            );
            self.core.release();
        }
    }
}
