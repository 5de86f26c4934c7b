//! Process-wide tracing setup shared by binaries and tests.

/// Initialize process-wide logging (JSON, filtered by `RUST_LOG`, default `info`).
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init();
}

/// Compact, test-captured logging. Safe to call from every test.
pub fn init_for_tests() {
    tracing::init_for_tests();
}

/// Subscriber configuration (filters, formatting).
pub mod tracing;
