//! # Service Layer
//!
//! The three lock-protected tables and the facade that ties them together.
//!
//! - [`BindingCache`]: home agent / correspondent bindings
//! - [`BindingLedger`]: mobile node's sent updates and their acknowledgements
//! - [`OptionScheduler`]: per-peer coalescing of outgoing options
//! - [`MobilityCore`]: message flows and timer dispatch

mod binding_cache;
mod binding_ledger;
mod mobility_core;
mod scheduler;

pub use binding_cache::{
    BindingCache, CacheAddOutcome, CacheStats, CacheSweep, CacheUpdate, RefreshRequest,
};
pub use binding_ledger::{
    AckOutcome, BindingLedger, LedgerAddOutcome, LedgerSweep, LedgerTiming, LedgerUpdate,
};
pub use mobility_core::{MobilityCore, MobilityPorts, ShutdownReport, TableId, TableTimers};
pub use scheduler::{DrainedOptions, OptionScheduler, SchedulerStats, SchedulerSweep};
