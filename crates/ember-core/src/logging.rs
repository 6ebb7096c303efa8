//! Logging setup based on `tracing-subscriber`.
//!
//! `RUST_LOG` always wins over the filter passed in code.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::prelude::*;

/// Default filter used by [`init`].
pub const DEFAULT_FILTER: &str = "info,ember_assets=debug";

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber with [`DEFAULT_FILTER`].
///
/// # Panics
///
/// Panics if a global subscriber is already installed.
pub fn init() {
    init_with_filter(DEFAULT_FILTER);
}

/// Install the global subscriber with a custom default filter.
///
/// # Panics
///
/// Panics if a global subscriber is already installed.
pub fn init_with_filter(filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(filter))
        .with_thread_names(true)
        .init();
}

/// Like [`init_with_filter`], but returns an error instead of panicking when a
/// subscriber is already installed. Tests call this from every case.
pub fn try_init_with_filter(filter: &str) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter(filter))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_names(true)
                .with_test_writer(),
        )
        .try_init()
}

/// [`try_init_with_filter`] with [`DEFAULT_FILTER`].
pub fn try_init() -> Result<(), TryInitError> {
    try_init_with_filter(DEFAULT_FILTER)
}
