//! Logging utilities for the storage engine.
//!
//! Provides helpers for initializing tracing subscribers. Instrumentation at
//! the call sites themselves (index splits, catalog re-hydration, statement
//! dispatch) uses `tracing::{trace,debug,info,warn}!` directly and is a
//! no-op unless a subscriber is installed — these helpers just make
//! installing one convenient.

#[cfg(feature = "logging")]
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize logging with default settings.
///
/// # Environment Variables
/// - `RUST_LOG` - Log level filter (default: "info")
///
/// # Example
/// ```rust
/// reldb_core::logging::init();
/// ```
#[cfg(feature = "logging")]
pub fn init() {
    init_with_level("info")
}

/// Initialize logging with a specific level.
///
/// # Arguments
/// * `level` - Log level (trace, debug, info, warn, error)
///
/// # Example
/// ```rust
/// reldb_core::logging::init_with_level("debug");
/// ```
#[cfg(feature = "logging")]
pub fn init_with_level(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .init();
}

/// Initialize logging for tests.
///
/// Uses a test-capture writer so output interleaves correctly with the test
/// harness.
#[cfg(feature = "logging")]
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

// Stub implementations when the logging feature is disabled, so the public
// API surface is present either way.
#[cfg(not(feature = "logging"))]
pub fn init() {}

#[cfg(not(feature = "logging"))]
pub fn init_with_level(_level: &str) {}

#[cfg(not(feature = "logging"))]
pub fn init_test() {}
