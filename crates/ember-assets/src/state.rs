//! Lifecycle states, record flags and version tracking.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;

/// Where a record is in its load lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum LoadState {
    /// No payload. A new referrer will queue a load.
    #[default]
    Unloaded,
    /// A load job owns the record. Acts as the latch preventing a second load.
    Loading,
    /// The payload is present and read-only until the next refresh.
    Loaded,
}

impl LoadState {
    /// Check if no payload is present and no load is in flight.
    pub fn is_unloaded(&self) -> bool {
        matches!(self, LoadState::Unloaded)
    }

    /// Check if a load job owns the record.
    pub fn is_loading(&self) -> bool {
        matches!(self, LoadState::Loading)
    }

    /// Check if the payload is present.
    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadState::Loaded)
    }
}

bitflags! {
    /// Flags independent of the load state.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct RecordFlags: u8 {
        /// Path and extension are known even if the record never loaded.
        const HAS_METADATA = 1 << 0;
        /// Built in memory by `create_asset`; never handed to a file loader.
        const MANUALLY_CREATED = 1 << 1;
        /// A refresh was requested and has not committed yet.
        const STALE = 1 << 2;
    }
}

/// The view a handle has of its record's payload.
#[derive(Debug)]
pub enum HandleState<T> {
    /// Nothing requested, or the payload was released.
    Unloaded,
    /// Requested and waiting for the record to finish loading.
    Loading,
    /// The payload is available.
    Loaded(Arc<T>),
}

impl<T> HandleState<T> {
    pub fn is_unloaded(&self) -> bool {
        matches!(self, HandleState::Unloaded)
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, HandleState::Loading)
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, HandleState::Loaded(_))
    }

    /// Get the payload if loaded.
    pub fn get(&self) -> Option<&Arc<T>> {
        match self {
            HandleState::Loaded(asset) => Some(asset),
            _ => None,
        }
    }

    /// Get a clone of the payload Arc if loaded.
    pub fn get_cloned(&self) -> Option<Arc<T>> {
        self.get().cloned()
    }
}

impl<T> Clone for HandleState<T> {
    fn clone(&self) -> Self {
        match self {
            HandleState::Unloaded => HandleState::Unloaded,
            HandleState::Loading => HandleState::Loading,
            HandleState::Loaded(asset) => HandleState::Loaded(Arc::clone(asset)),
        }
    }
}

impl<T> From<&HandleState<T>> for LoadState {
    fn from(state: &HandleState<T>) -> Self {
        match state {
            HandleState::Unloaded => LoadState::Unloaded,
            HandleState::Loading => LoadState::Loading,
            HandleState::Loaded(_) => LoadState::Loaded,
        }
    }
}

/// Version tracker for change detection.
///
/// Starts at 0 and increments on every `Loaded` or `Updated` commit.
#[derive(Debug, Default)]
pub struct AssetVersion {
    value: AtomicU32,
}

impl AssetVersion {
    /// A tracker at version 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current version number.
    pub fn get(&self) -> u32 {
        self.value.load(Ordering::Acquire)
    }

    /// Increment the version and return the new value.
    pub fn increment(&self) -> u32 {
        self.value.fetch_add(1, Ordering::AcqRel) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_state_accessors() {
        let state = HandleState::Loaded(Arc::new(7u32));
        assert!(state.is_loaded());
        assert_eq!(state.get_cloned().as_deref(), Some(&7));
        assert_eq!(LoadState::from(&state), LoadState::Loaded);

        let state: HandleState<u32> = HandleState::Loading;
        assert!(state.get().is_none());
        assert_eq!(LoadState::from(&state), LoadState::Loading);
    }

    #[test]
    fn test_version_increments() {
        let version = AssetVersion::new();
        assert_eq!(version.get(), 0);
        assert_eq!(version.increment(), 1);
        assert_eq!(version.increment(), 2);
        assert_eq!(version.get(), 2);
    }

    #[test]
    fn test_flags_are_independent() {
        let mut flags = RecordFlags::HAS_METADATA;
        flags.insert(RecordFlags::STALE);
        flags.remove(RecordFlags::STALE);
        assert_eq!(flags, RecordFlags::HAS_METADATA);
        assert!(!flags.contains(RecordFlags::MANUALLY_CREATED));
    }
}
