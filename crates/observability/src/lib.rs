//! Tracing/logging setup shared across the workspace.

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Plain-text tracing for test runs, filtered via `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_test_tracing() {
    tracing::init_for_tests();
}

/// Tracing configuration (filters, layers).
pub mod tracing;
