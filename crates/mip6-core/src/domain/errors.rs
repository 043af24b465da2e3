//! Error types for the mobility core.
//!
//! Nothing here is fatal: every failure is returned to the caller, which is
//! expected to retry later or let the protocol's own retransmission recover.

use std::net::Ipv6Addr;

use thiserror::Error;

use super::config::ConfigError;
use super::entities::BindingKind;
use super::value_objects::Timestamp;

/// Failure of an external resource call (tunnel, route, address defense).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("tunnel {local} -> {remote} could not be created: {reason}")]
    Tunnel {
        remote: Ipv6Addr,
        local: Ipv6Addr,
        reason: String,
    },

    #[error("route to {dest}/{prefix_len} via {via} could not be added: {reason}")]
    Route {
        dest: Ipv6Addr,
        prefix_len: u8,
        via: Ipv6Addr,
        reason: String,
    },

    #[error("address {addr}/{prefix_len} could not be defended: {reason}")]
    Defense {
        addr: Ipv6Addr,
        prefix_len: u8,
        reason: String,
    },
}

/// Binding cache errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingCacheError {
    #[error("binding cache full (capacity {capacity})")]
    Full { capacity: usize },

    #[error("no binding for {home}")]
    NotFound { home: Ipv6Addr },

    #[error("binding for {home} is {actual}, not in the requested kinds")]
    KindMismatch { home: Ipv6Addr, actual: BindingKind },

    #[error("resource setup failed: {0}")]
    Resource(#[from] ResourceError),
}

/// Binding update list errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("binding update list full (capacity {capacity})")]
    Full { capacity: usize },

    #[error("no binding update list entry for {peer}")]
    NotFound { peer: Ipv6Addr },

    #[error("sends to {peer} suppressed until {until}")]
    PeerRejected { peer: Ipv6Addr, until: Timestamp },

    #[error("update to {peer} rate limited until {retry_at}")]
    RateLimited { peer: Ipv6Addr, retry_at: Timestamp },

    #[error("resource setup failed: {0}")]
    Resource(#[from] ResourceError),
}

/// Option scheduler errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("option queue full (capacity {capacity})")]
    Full { capacity: usize },
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum MobilityError {
    #[error(transparent)]
    Cache(#[from] BindingCacheError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result alias for crate-level operations.
pub type MobilityResult<T> = Result<T, MobilityError>;
