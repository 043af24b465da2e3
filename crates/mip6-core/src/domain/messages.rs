//! Decoded binding messages as they cross the core's inbound API.

use std::net::Ipv6Addr;

use super::entities::{BindingKind, LedgerFlags};
use super::options::{AckStatus, UpdateOption};
use super::value_objects::SequenceNumber;

/// A binding update the mobile node wants to send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingUpdate {
    pub peer_addr: Ipv6Addr,
    pub home_addr: Ipv6Addr,
    pub care_of_addr: Ipv6Addr,
    /// Requested lifetime in seconds; zero deregisters.
    pub lifetime: u32,
    pub prefix_len: u8,
    pub flags: LedgerFlags,
}

impl OutgoingUpdate {
    pub fn is_deregistration(&self) -> bool {
        self.lifetime == 0 || self.flags.deregistering()
    }
}

/// A binding update received from a mobile node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncomingUpdate {
    pub ifindex: u32,
    /// Our address the update was sent to.
    pub anchor_addr: Ipv6Addr,
    pub home_addr: Ipv6Addr,
    pub care_of_addr: Ipv6Addr,
    pub update: UpdateOption,
}

impl IncomingUpdate {
    /// Cache kind the update asks for.
    pub fn kind(&self) -> BindingKind {
        if self.update.flags.home_registration() {
            BindingKind::HomeRegistration
        } else {
            BindingKind::Cache
        }
    }

    pub fn is_deregistration(&self) -> bool {
        self.update.lifetime == 0 || self.update.flags.deregistering()
    }

    pub fn single_address(&self) -> bool {
        self.update.flags.contains(LedgerFlags::SINGLE_ADDRESS)
    }
}

/// Fields of a received binding acknowledgement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReceivedAck {
    pub peer_addr: Ipv6Addr,
    pub sequence: SequenceNumber,
    pub status: AckStatus,
    /// Granted lifetime in seconds.
    pub lifetime: u32,
    /// Suggested refresh interval in seconds; zero if none.
    pub refresh: u32,
}

/// Bytes covered by a binding authorization signature: home address,
/// care-of address, sequence number and lifetime.
pub fn binding_auth_fields(
    home: Ipv6Addr,
    care_of: Ipv6Addr,
    sequence: SequenceNumber,
    lifetime: u32,
) -> Vec<u8> {
    let mut fields = Vec::with_capacity(16 + 16 + 1 + 4);
    fields.extend_from_slice(&home.octets());
    fields.extend_from_slice(&care_of.octets());
    fields.push(sequence.value());
    fields.extend_from_slice(&lifetime.to_be_bytes());
    fields
}
