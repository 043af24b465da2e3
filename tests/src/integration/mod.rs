//! # Integration Tests
//!
//! Two cores talking to each other through the option scheduler, and the
//! tables under concurrent load.

pub mod concurrency;
pub mod flows;
pub mod runtime;
