//! Mobility options queued by the option scheduler.
//!
//! The byte layout of each option belongs to the codec port; these types only
//! carry the fields. Sub-options (authentication data, unique identifiers,
//! alternate care-of addresses) are opaque `(type, bytes)` pairs.

use std::net::Ipv6Addr;

use super::entities::LedgerFlags;
use super::value_objects::{FoldKey, SequenceNumber, Timestamp};

/// Kind of mobility option.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OptionKind {
    Update,
    Ack,
    Request,
}

impl OptionKind {
    /// Drain order: at most one of each per outgoing message.
    pub const ALL: [OptionKind; 3] = [OptionKind::Update, OptionKind::Ack, OptionKind::Request];
}

/// Opaque sub-option carried through untouched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubOption {
    pub kind: u8,
    pub data: Vec<u8>,
}

impl SubOption {
    /// Binding authorization data.
    pub const AUTH_DATA: u8 = 5;

    pub fn new(kind: u8, data: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            data: data.into(),
        }
    }
}

/// Binding update fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateOption {
    pub sequence: SequenceNumber,
    /// Requested lifetime in seconds.
    pub lifetime: u32,
    pub flags: LedgerFlags,
    pub prefix_len: u8,
    pub sub_options: Vec<SubOption>,
}

/// Binding acknowledgement status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AckStatus(pub u8);

impl AckStatus {
    pub const ACCEPTED: AckStatus = AckStatus(0);
    pub const REASON_UNSPECIFIED: AckStatus = AckStatus(128);
    pub const INSUFFICIENT_RESOURCES: AckStatus = AckStatus(130);
    pub const HOME_REGISTRATION_NOT_SUPPORTED: AckStatus = AckStatus(131);
    pub const SEQUENCE_OUT_OF_WINDOW: AckStatus = AckStatus(135);

    /// Values below 128 accept the update.
    pub fn is_accepted(&self) -> bool {
        self.0 < 128
    }
}

/// Binding acknowledgement fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AckOption {
    pub status: AckStatus,
    pub sequence: SequenceNumber,
    /// Granted lifetime in seconds.
    pub lifetime: u32,
    /// Suggested refresh interval in seconds.
    pub refresh: u32,
    pub sub_options: Vec<SubOption>,
}

/// Binding request fields.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestOption {
    pub sub_options: Vec<SubOption>,
}

/// A queued option body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MobilityOption {
    Update(UpdateOption),
    Ack(AckOption),
    Request(RequestOption),
}

impl MobilityOption {
    pub fn kind(&self) -> OptionKind {
        match self {
            MobilityOption::Update(_) => OptionKind::Update,
            MobilityOption::Ack(_) => OptionKind::Ack,
            MobilityOption::Request(_) => OptionKind::Request,
        }
    }

    pub fn sub_options(&self) -> &[SubOption] {
        match self {
            MobilityOption::Update(u) => &u.sub_options,
            MobilityOption::Ack(a) => &a.sub_options,
            MobilityOption::Request(r) => &r.sub_options,
        }
    }
}

/// Identity of a pending option: one per source, destination and kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OptionKey {
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
    pub kind: OptionKind,
}

impl FoldKey for OptionKey {
    fn fold(&self) -> u32 {
        // Destination dominates; pending options cluster per peer.
        self.dst.fold() ^ self.src.fold().rotate_left(7) ^ self.kind as u32
    }
}

/// Scheduler-resident pending option.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingOption {
    pub option: MobilityOption,
    pub enqueued_at: Timestamp,
}
