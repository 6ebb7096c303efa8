//! Ember Core
//!
//! Shared utilities for the Ember engine crates: hash collections, logging
//! setup and profiling hooks.

pub mod alloc;
pub mod logging;
pub mod profiling;
