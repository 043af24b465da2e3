//! # Driven Ports (Outbound SPI)
//!
//! Interfaces the mobility core requires the host to implement. Apart from
//! [`LedgerCallbackHandler::next_sequence`], none of them is ever called while
//! a table lock is held, so implementations are free to block, take their own
//! locks, or call back into the core.

use std::net::Ipv6Addr;

use thiserror::Error;

use crate::domain::{
    LedgerCallback, LedgerEntry, MobilityOption, ResourceError, SequenceNumber, Timestamp,
};

/// Tunnel device and route management.
///
/// Home registrations on the home agent side tunnel traffic for the home
/// address to the care-of address; on the mobile node side the tunnel points
/// at the home agent.
pub trait TunnelManager: Send + Sync {
    /// Create (or take a reference on) the tunnel `local -> remote`.
    fn create_tunnel(&self, remote: Ipv6Addr, local: Ipv6Addr) -> Result<(), ResourceError>;

    /// Drop the tunnel `local -> remote`.
    fn destroy_tunnel(&self, remote: Ipv6Addr, local: Ipv6Addr);

    /// Route `dest/prefix_len` through the tunnel towards `via`, sourced from `from`.
    fn add_route(
        &self,
        dest: Ipv6Addr,
        prefix_len: u8,
        via: Ipv6Addr,
        from: Ipv6Addr,
    ) -> Result<(), ResourceError>;

    fn remove_route(&self, dest: Ipv6Addr, prefix_len: u8, via: Ipv6Addr, from: Ipv6Addr);
}

/// Proxy neighbour discovery for home addresses of registered mobile nodes.
pub trait AddressDefense: Send + Sync {
    fn defend(&self, addr: Ipv6Addr, prefix_len: u8) -> Result<(), ResourceError>;

    fn withdraw(&self, addr: Ipv6Addr, prefix_len: u8);
}

/// Errors from option encoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The option does not fit the space left in the buffer.
    #[error("option does not fit: need {needed} bytes, {available} available")]
    DoesNotFit { needed: usize, available: usize },
}

/// Wire encoding of mobility options.
pub trait OptionCodec: Send + Sync {
    /// Encode `option` into `buffer` starting at `offset`, returning the offset
    /// just past the encoded bytes. Must leave `buffer` untouched on error.
    fn encode(
        &self,
        buffer: &mut [u8],
        offset: usize,
        option: &MobilityOption,
    ) -> Result<usize, CodecError>;
}

/// Signing and verification of binding messages.
///
/// When configured, the core signs the updates and acknowledgements it builds
/// and attaches the result as a [`SubOption::AUTH_DATA`] sub-option.
/// Verifying incoming messages is left to the caller that decodes them.
///
/// [`SubOption::AUTH_DATA`]: crate::domain::SubOption::AUTH_DATA
pub trait Authenticator: Send + Sync {
    fn sign(&self, fields: &[u8]) -> Vec<u8>;

    fn verify(&self, fields: &[u8], auth: &[u8]) -> bool;
}

/// Errors from carrier transmission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransmitError {
    #[error("no route to {dst}")]
    NoRoute { dst: Ipv6Addr },

    #[error("transmit failed: {0}")]
    Failed(String),
}

/// Outgoing packet path.
pub trait CarrierTransmitter: Send + Sync {
    /// Send an otherwise empty message from `src` to `dst`. The transmit path
    /// calls back into [`OptionScheduler::drain_for`] to fill it.
    ///
    /// [`OptionScheduler::drain_for`]: crate::service::OptionScheduler::drain_for
    fn send_carrier(&self, src: Ipv6Addr, dst: Ipv6Addr) -> Result<(), TransmitError>;
}

/// Source of the current time.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// One-shot deadline timer owned by a table.
pub trait DeadlineTimer: Send + Sync {
    /// Fire once at `deadline`, replacing any earlier arming. `None` disarms.
    fn arm(&self, deadline: Option<Timestamp>);
}

/// Decision returned by a ledger callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackVerdict {
    /// Resend under a fresh sequence number; back off and call again.
    KeepTrying,
    /// Nothing more to send; keep the entry until it expires.
    Done,
    /// Drop the entry now.
    Remove,
}

/// Mobile node logic invoked when a ledger entry's callback falls due.
///
/// A resend takes three calls. `on_callback` decides with no lock held and
/// must not send anything. If the entry is unchanged by then,
/// `next_sequence` is called under the ledger write lock and the sequence is
/// recorded with the backoff. `resend` finally runs with the lock released,
/// given the entry exactly as recorded.
pub trait LedgerCallbackHandler: Send + Sync {
    fn on_callback(&self, callback: LedgerCallback, entry: &LedgerEntry) -> CallbackVerdict;

    /// Sequence number for the resend of `entry`. Keep it cheap; the ledger
    /// is locked.
    fn next_sequence(&self, entry: &LedgerEntry) -> SequenceNumber;

    fn resend(&self, callback: LedgerCallback, entry: &LedgerEntry);
}
