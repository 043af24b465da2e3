//! # Mobile IPv6 Binding Core
//!
//! The binding state machinery of a Mobile IPv6 node, independent of the
//! packet path:
//!
//! - **Binding cache**: home address → care-of address, kept by home agents
//!   and correspondent nodes, with the tunnels, routes and address defense
//!   each binding needs.
//! - **Binding update list**: the updates a mobile node has sent, their
//!   acknowledgement state, retransmission back-off and refresh schedule.
//! - **Option scheduler**: coalesces update, acknowledgement and request
//!   options per destination so they can ride on one message, forcing a
//!   carrier when an option's delay runs out.
//!
//! All three are built on an indexed expiry table over a fixed-capacity slab.
//!
//! ## Architecture
//!
//! - **Domain Layer:** tables, entries, sequence arithmetic, rate limit, config
//! - **Ports Layer:** inbound API traits, outbound host traits
//! - **Service Layer:** lock-protected tables and the [`MobilityCore`] facade
//! - **Adapters Layer:** wire codec, logging adapters, tokio timer runtime
//!
//! ## Example
//!
//! ```rust
//! use mip6_core::{HashList, IterAction, Timestamp};
//!
//! let mut table: HashList<u32, Timestamp, &str> = HashList::new(4, 8);
//! table.add(7, Timestamp::from_secs(30), "late").unwrap();
//! table.add(3, Timestamp::from_secs(10), "early").unwrap();
//!
//! assert_eq!(table.next_deadline(), Some(Timestamp::from_secs(10)));
//! let mut order = Vec::new();
//! table.iterate(|key, _, _| {
//!     order.push(*key);
//!     IterAction::Continue
//! });
//! assert_eq!(order, vec![3, 7]);
//! ```

// =============================================================================
// CORE MODULES
// =============================================================================

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

/// Test doubles for every outbound port, plus a wired-up core.
/// Requires feature: `test-utils`
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// =============================================================================
// RE-EXPORTS
// =============================================================================

// Domain
pub use domain::{
    binding_auth_fields, AckOption, AckStatus, BindingCacheEntry, BindingKind, IncomingUpdate,
    KindMask, LedgerCallback, LedgerEntry, LedgerFlags, LedgerState, MobilityOption,
    OptionKind, OutgoingUpdate, ReceivedAck, RequestOption, SequenceCounter, SequenceNumber,
    SubOption, Timestamp, UpdateOption,
};

// Building blocks
pub use domain::{FoldKey, HashList, HashListError, IterAction, SlabPool, SlotId};

// Configuration
pub use domain::{
    CacheConfig, ConfigError, LedgerConfig, MobilityConfig, RateLimitConfig, SchedulerConfig,
};

// Errors
pub use domain::{
    BindingCacheError, LedgerError, MobilityError, MobilityResult, ResourceError, SchedulerError,
};

// Port traits
pub use ports::{
    AddressDefense, Authenticator, BindingReceiver, CallbackVerdict, CarrierTransmitter,
    CodecError, DeadlineTimer, LedgerCallbackHandler, MobileNodeApi, OptionCodec, TimeSource,
    TransmitError, TunnelManager,
};

// Service
pub use service::{
    AckOutcome, BindingCache, BindingLedger, MobilityCore, MobilityPorts, OptionScheduler,
    ShutdownReport, TableId, TableTimers,
};

#[cfg(feature = "runtime")]
pub use adapters::{HostPorts, MobilityRuntime, TokioClock};
