//! Inbound ports (API) of the mobility core.

use std::net::Ipv6Addr;

use crate::domain::{
    AckStatus, BindingCacheEntry, IncomingUpdate, MobilityResult, OutgoingUpdate, ReceivedAck,
    SequenceNumber,
};
use crate::service::AckOutcome;

/// Mobile node side: sending updates and consuming their acknowledgements.
pub trait MobileNodeApi: Send + Sync {
    /// Record and queue a binding update to `update.peer_addr`.
    ///
    /// # Returns
    /// The sequence number the update went out with.
    ///
    /// # Errors
    /// `PeerRejected` while the peer's rejection cooldown runs, `RateLimited`
    /// when the send-rate policy holds the update back, or a capacity error.
    fn send_binding_update(&self, update: OutgoingUpdate) -> MobilityResult<SequenceNumber>;

    /// Apply a binding acknowledgement from a peer.
    fn receive_binding_ack(&self, ack: ReceivedAck) -> AckOutcome;
}

/// Home agent / correspondent side: accepting updates from mobile nodes.
pub trait BindingReceiver: Send + Sync {
    /// Apply a received binding update and queue the acknowledgement if one
    /// is owed.
    ///
    /// # Returns
    /// The status the acknowledgement carries (or would carry).
    fn receive_binding_update(&self, incoming: IncomingUpdate) -> MobilityResult<AckStatus>;

    /// Current binding for `home`, marking it used.
    fn lookup_binding(&self, home: &Ipv6Addr) -> Option<BindingCacheEntry>;
}
