//! # mip6-core Test Suite
//!
//! Unified test crate containing:
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/      # Cross-table flows
//!     ├── flows.rs        # mobile node <-> home agent exchanges
//!     ├── concurrency.rs  # tables hammered from many threads
//!     └── runtime.rs      # tokio timer runtime end to end
//! tests/benches/
//! └── table_benchmarks.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p mip6-tests
//!
//! # By category
//! cargo test -p mip6-tests integration::flows
//!
//! # Benchmarks
//! cargo bench -p mip6-tests
//! ```

#![allow(dead_code)]

pub mod integration;

/// Route `tracing` output to the test harness. Safe to call repeatedly.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
