//! Test utilities for Ember.
//!
//! Provides a mock graphics context that records every call together with
//! the thread that made it, so tests can assert that graphics work only
//! happens on the owning thread.

pub mod mock_graphics;

pub use mock_graphics::{GpuCall, MockGraphicsContext, RecordedCall};
