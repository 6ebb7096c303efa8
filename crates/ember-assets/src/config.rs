//! Configuration for the asset server.

use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding [`AssetConfig::worker_threads`].
pub const WORKERS_ENV: &str = "EMBER_ASSET_WORKERS";
/// Environment variable overriding [`AssetConfig::asset_root`].
pub const ROOT_ENV: &str = "EMBER_ASSET_ROOT";

/// Settings for an [`AssetServer`](crate::AssetServer).
#[derive(Debug, Clone)]
pub struct AssetConfig {
    /// Number of background job workers. `0` selects manual mode: jobs only
    /// run when the owner calls `run_pending_jobs` or pumps in a wait.
    pub worker_threads: usize,
    /// Worker threads are named `<prefix>-<index>`.
    pub thread_name_prefix: String,
    /// Directory that relative asset paths are read from.
    pub asset_root: PathBuf,
    /// Timed wait used between pump attempts on the owning thread.
    pub wait_poll_interval: Duration,
    /// Panic on usage errors. Ignored in release builds.
    pub break_on_usage_error: bool,
    /// Record which call sites reference each path. Debug builds only.
    pub track_referrers: bool,
}

/// `max(1, cpus - 1)`, leaving one core for the owning thread.
pub fn default_worker_threads() -> usize {
    num_cpus::get().saturating_sub(1).max(1)
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            thread_name_prefix: "ember-asset".to_string(),
            asset_root: PathBuf::from("."),
            wait_poll_interval: Duration::from_millis(2),
            break_on_usage_error: cfg!(debug_assertions),
            track_referrers: cfg!(debug_assertions),
        }
    }
}

impl AssetConfig {
    /// Default settings with no background workers.
    pub fn manual() -> Self {
        Self {
            worker_threads: 0,
            ..Self::default()
        }
    }

    /// Defaults overlaid with [`WORKERS_ENV`] and [`ROOT_ENV`].
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = std::env::var(WORKERS_ENV) {
            match value.trim().parse::<usize>() {
                Ok(workers) => config.worker_threads = workers,
                Err(e) => tracing::warn!("Ignoring {}={:?}: {}", WORKERS_ENV, value, e),
            }
        }

        if let Ok(root) = std::env::var(ROOT_ENV) {
            config.asset_root = PathBuf::from(root);
        }

        config
    }

    /// Number of background workers. `0` selects manual mode.
    pub fn with_worker_threads(mut self, workers: usize) -> Self {
        self.worker_threads = workers;
        self
    }

    /// Prefix for worker thread names; workers are suffixed with their index.
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Directory that asset paths are resolved against.
    pub fn with_asset_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.asset_root = root.into();
        self
    }

    /// How long a blocking wait sleeps between checks for progress.
    pub fn with_wait_poll_interval(mut self, interval: Duration) -> Self {
        self.wait_poll_interval = interval;
        self
    }

    /// Panic on usage errors (debug builds only) instead of logging them.
    pub fn with_break_on_usage_error(mut self, enabled: bool) -> Self {
        self.break_on_usage_error = enabled;
        self
    }

    /// Record the call site of every reference. Ignored in release builds.
    pub fn with_track_referrers(mut self, enabled: bool) -> Self {
        self.track_referrers = enabled;
        self
    }

    /// Returns `true` when no background workers are spawned.
    pub fn is_manual(&self) -> bool {
        self.worker_threads == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AssetConfig::default();
        assert!(config.worker_threads >= 1);
        assert!(config.worker_threads <= num_cpus::get());
        assert!(!config.is_manual());
        assert_eq!(config.asset_root, PathBuf::from("."));
    }

    #[test]
    fn test_builder() {
        let config = AssetConfig::manual()
            .with_asset_root("assets")
            .with_thread_name_prefix("loader")
            .with_break_on_usage_error(false);
        assert!(config.is_manual());
        assert_eq!(config.asset_root, PathBuf::from("assets"));
        assert_eq!(config.thread_name_prefix, "loader");
        assert!(!config.break_on_usage_error);
    }
}
