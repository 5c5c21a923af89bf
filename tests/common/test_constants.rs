//! Shared constants for integration tests.
//!
//! Integration tests are compiled as separate crates (one per top-level file in
//! `tests/`). Placing shared constants under `tests/common/` avoids creating an
//! additional integration test binary while still allowing reuse via:
//!
//! ```rust
//! #[path = "common/test_constants.rs"]
//! mod test_constants;
//! ```

/// Project used by tests that never reach the provider.
pub const TEST_PROJECT: &str = "buildvm-test";

/// Default machine type applied when no override is provided.
pub const DEFAULT_MACHINE_TYPE: &str = "n1-standard-1";
