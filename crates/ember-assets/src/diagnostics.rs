//! Usage-error reporting and optional referrer bookkeeping.

use std::fmt;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};

use ember_core::alloc::HashMap;
use parking_lot::Mutex;

use crate::config::AssetConfig;
use crate::id::AssetId;

/// Who took a reference on a record, for leak hunting.
///
/// Only collected in builds with `debug_assertions` when
/// [`AssetConfig::track_referrers`] is set. Nothing in the lifecycle reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Referrer {
    handle: Option<u64>,
    location: &'static Location<'static>,
}

impl Referrer {
    /// A referrer at the caller's location.
    #[track_caller]
    pub fn here() -> Self {
        Self::new(None, Location::caller())
    }

    pub(crate) fn new(handle: Option<u64>, location: &'static Location<'static>) -> Self {
        Self { handle, location }
    }

    /// The handle that took the reference, if it came from one.
    pub fn handle(&self) -> Option<u64> {
        self.handle
    }

    /// Where the reference was taken.
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }
}

impl fmt::Display for Referrer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.handle {
            Some(handle) => write!(f, "handle #{} at {}", handle, self.location),
            None => write!(f, "{}", self.location),
        }
    }
}

/// Shared diagnostics state for one server.
pub(crate) struct Diagnostics {
    usage_errors: AtomicU64,
    break_on_usage_error: bool,
    referrers: Option<Mutex<HashMap<AssetId, Vec<Referrer>>>>,
}

impl Diagnostics {
    pub(crate) fn new(config: &AssetConfig) -> Self {
        let referrers = (cfg!(debug_assertions) && config.track_referrers)
            .then(|| Mutex::new(HashMap::default()));
        Self {
            usage_errors: AtomicU64::new(0),
            break_on_usage_error: config.break_on_usage_error,
            referrers,
        }
    }

    /// Log a programmer mistake and count it.
    ///
    /// With `break_on_usage_error` in a debug build this panics, unless the
    /// thread is already unwinding.
    pub(crate) fn usage_error(&self, message: fmt::Arguments<'_>) {
        self.usage_errors.fetch_add(1, Ordering::Relaxed);
        tracing::error!("Asset usage error: {}", message);
        if self.break_on_usage_error && cfg!(debug_assertions) && !std::thread::panicking() {
            panic!("asset usage error: {}", message);
        }
    }

    pub(crate) fn usage_error_count(&self) -> u64 {
        self.usage_errors.load(Ordering::Relaxed)
    }

    pub(crate) fn track_acquire(&self, record: AssetId, referrer: Referrer) {
        if let Some(referrers) = &self.referrers {
            referrers.lock().entry(record).or_default().push(referrer);
        }
    }

    pub(crate) fn track_release(&self, record: AssetId, handle: Option<u64>) {
        let Some(referrers) = &self.referrers else {
            return;
        };
        let mut referrers = referrers.lock();
        if let Some(list) = referrers.get_mut(&record) {
            let position = list
                .iter()
                .rposition(|referrer| referrer.handle == handle)
                .or_else(|| list.len().checked_sub(1));
            if let Some(position) = position {
                list.swap_remove(position);
            }
            if list.is_empty() {
                referrers.remove(&record);
            }
        }
    }

    pub(crate) fn referrers(&self, record: AssetId) -> Vec<Referrer> {
        self.referrers
            .as_ref()
            .and_then(|referrers| referrers.lock().get(&record).cloned())
            .unwrap_or_default()
    }

    pub(crate) fn forget(&self, record: AssetId) {
        if let Some(referrers) = &self.referrers {
            referrers.lock().remove(&record);
        }
    }
}

/// Report a usage error on a record that has no server to count it.
pub(crate) fn detached_usage_error(message: fmt::Arguments<'_>) {
    tracing::error!("Asset usage error (detached record): {}", message);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracking_config() -> AssetConfig {
        AssetConfig::manual()
            .with_track_referrers(true)
            .with_break_on_usage_error(false)
    }

    #[test]
    fn test_usage_errors_are_counted() {
        let diagnostics = Diagnostics::new(&tracking_config());
        diagnostics.usage_error(format_args!("first"));
        diagnostics.usage_error(format_args!("second"));
        assert_eq!(diagnostics.usage_error_count(), 2);
    }

    #[test]
    #[should_panic(expected = "asset usage error")]
    #[cfg(debug_assertions)]
    fn test_usage_error_breaks_in_debug() {
        let diagnostics = Diagnostics::new(&AssetConfig::manual().with_break_on_usage_error(true));
        diagnostics.usage_error(format_args!("boom"));
    }

    #[test]
    #[cfg(debug_assertions)]
    fn test_referrers_follow_acquire_and_release() {
        let diagnostics = Diagnostics::new(&tracking_config());
        let id = AssetId::new();

        diagnostics.track_acquire(id, Referrer::new(Some(1), Location::caller()));
        diagnostics.track_acquire(id, Referrer::new(Some(2), Location::caller()));
        assert_eq!(diagnostics.referrers(id).len(), 2);

        diagnostics.track_release(id, Some(1));
        let left = diagnostics.referrers(id);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].handle(), Some(2));

        diagnostics.track_release(id, Some(2));
        assert!(diagnostics.referrers(id).is_empty());
    }

    #[test]
    fn test_tracking_disabled_collects_nothing() {
        let diagnostics = Diagnostics::new(&tracking_config().with_track_referrers(false));
        let id = AssetId::new();
        diagnostics.track_acquire(id, Referrer::here());
        assert!(diagnostics.referrers(id).is_empty());
    }
}
