//! # Core Domain Entities
//!
//! - [`BindingCacheEntry`]: home address → care-of address mapping held by a
//!   home agent or correspondent node
//! - [`LedgerEntry`]: an outgoing binding update and its acknowledgement state
//! - [`BindingKind`], [`KindMask`], [`LedgerFlags`], [`LedgerState`],
//!   [`LedgerCallback`]

use std::fmt;
use std::net::Ipv6Addr;
use std::ops::BitOr;
use std::sync::atomic::{AtomicU64, Ordering};

use super::rate_limit::SendRateState;
use super::value_objects::{SequenceNumber, Timestamp};

// =============================================================================
// BINDING CACHE
// =============================================================================

/// Kind of binding cache entry.
///
/// `Cache` entries are soft: they may be evicted to make room for a home
/// registration. `HomeRegistration` entries own tunnel, route and address
/// defense resources. `Temporary` entries are created on behalf of a mobile
/// node that has not registered yet and are never evicted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindingKind {
    Cache,
    HomeRegistration,
    Temporary,
}

impl BindingKind {
    const fn bit(self) -> u8 {
        match self {
            BindingKind::Cache => 0b001,
            BindingKind::HomeRegistration => 0b010,
            BindingKind::Temporary => 0b100,
        }
    }
}

impl fmt::Display for BindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingKind::Cache => write!(f, "cache"),
            BindingKind::HomeRegistration => write!(f, "home-registration"),
            BindingKind::Temporary => write!(f, "temporary"),
        }
    }
}

/// Set of [`BindingKind`]s accepted by a delete.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct KindMask(u8);

impl KindMask {
    pub const NONE: KindMask = KindMask(0);
    pub const CACHE: KindMask = KindMask(BindingKind::Cache.bit());
    pub const HOME_REGISTRATION: KindMask = KindMask(BindingKind::HomeRegistration.bit());
    pub const TEMPORARY: KindMask = KindMask(BindingKind::Temporary.bit());
    pub const ANY: KindMask = KindMask(0b111);

    pub fn contains(&self, kind: BindingKind) -> bool {
        self.0 & kind.bit() != 0
    }
}

impl From<BindingKind> for KindMask {
    fn from(kind: BindingKind) -> Self {
        KindMask(kind.bit())
    }
}

impl BitOr for KindMask {
    type Output = KindMask;

    fn bitor(self, rhs: KindMask) -> KindMask {
        KindMask(self.0 | rhs.0)
    }
}

/// Snapshot of a binding cache entry, copied out of the table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindingCacheEntry {
    pub home_addr: Ipv6Addr,
    pub care_of_addr: Ipv6Addr,
    /// Our address used toward the mobile node.
    pub anchor_addr: Ipv6Addr,
    pub ifindex: u32,
    pub prefix_len: u8,
    pub single_address: bool,
    pub kind: BindingKind,
    pub sequence: SequenceNumber,
    pub expiry: Timestamp,
    /// When to solicit a fresh binding update, if at all.
    pub refresh_request_deadline: Option<Timestamp>,
    pub last_used: Timestamp,
}

impl BindingCacheEntry {
    /// Order key inside the table: whichever of expiry and refresh deadline
    /// comes first.
    pub fn next_event(&self) -> Timestamp {
        match self.refresh_request_deadline {
            Some(deadline) => deadline.min(self.expiry),
            None => self.expiry,
        }
    }

    /// True if the tunnel/route resources of `self` and `other` differ.
    pub fn tunnel_fields_differ(&self, other: &BindingCacheEntry) -> bool {
        self.care_of_addr != other.care_of_addr
            || self.anchor_addr != other.anchor_addr
            || self.ifindex != other.ifindex
            || self.prefix_len != other.prefix_len
            || self.single_address != other.single_address
    }
}

/// Table-resident form of a cache entry. `last_used` is atomic so lookups
/// can mark use under the read lock.
#[derive(Debug)]
pub(crate) struct CacheRecord {
    pub entry: BindingCacheEntry,
    pub last_used: AtomicU64,
}

impl CacheRecord {
    pub fn new(entry: BindingCacheEntry) -> Self {
        let last_used = AtomicU64::new(entry.last_used.as_millis());
        Self { entry, last_used }
    }

    pub fn touch(&self, now: Timestamp) {
        self.last_used.fetch_max(now.as_millis(), Ordering::Relaxed);
    }

    pub fn last_used(&self) -> Timestamp {
        Timestamp::from_millis(self.last_used.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> BindingCacheEntry {
        let mut entry = self.entry.clone();
        entry.last_used = self.last_used();
        entry
    }
}

// =============================================================================
// BINDING UPDATE LIST (LEDGER)
// =============================================================================

/// Flags carried by an outgoing binding update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct LedgerFlags(u8);

impl LedgerFlags {
    pub const NONE: LedgerFlags = LedgerFlags(0);
    pub const ACK_REQUIRED: LedgerFlags = LedgerFlags(0x80);
    pub const HOME_REGISTRATION: LedgerFlags = LedgerFlags(0x40);
    pub const SINGLE_ADDRESS: LedgerFlags = LedgerFlags(0x20);
    pub const DEREGISTERING: LedgerFlags = LedgerFlags(0x10);

    pub const fn bits(&self) -> u8 {
        self.0
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0xF0)
    }

    pub fn contains(&self, other: LedgerFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn ack_required(&self) -> bool {
        self.contains(Self::ACK_REQUIRED)
    }

    pub fn home_registration(&self) -> bool {
        self.contains(Self::HOME_REGISTRATION)
    }

    pub fn deregistering(&self) -> bool {
        self.contains(Self::DEREGISTERING)
    }
}

impl BitOr for LedgerFlags {
    type Output = LedgerFlags;

    fn bitor(self, rhs: LedgerFlags) -> LedgerFlags {
        LedgerFlags(self.0 | rhs.0)
    }
}

/// Acknowledgement state of a ledger entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedgerState {
    AwaitingAck,
    Acknowledged,
    /// The peer refused the update or does not support the protocol.
    Rejected,
}

/// What to do when a ledger entry's `callback_time` arrives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedgerCallback {
    /// No acknowledgement yet: resend the update.
    Retransmit,
    /// Binding about to lapse: send a fresh update.
    Refresh,
    /// Lifetime (or rejection cooldown) over: drop the entry.
    Expire,
}

/// Snapshot of a binding update list entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerEntry {
    pub peer_addr: Ipv6Addr,
    pub home_addr: Ipv6Addr,
    pub care_of_addr: Ipv6Addr,
    pub sequence: SequenceNumber,
    /// Requested lifetime in seconds.
    pub lifetime: u32,
    pub prefix_len: u8,
    pub flags: LedgerFlags,
    pub state: LedgerState,
    pub expire: Timestamp,
    /// Current retransmission delay in milliseconds.
    pub delay: u64,
    /// Retransmission delay ceiling in milliseconds.
    pub max_delay: u64,
    pub callback: LedgerCallback,
    pub callback_time: Timestamp,
    pub rate: SendRateState,
    /// Bumped on every mutation; lets in-flight callbacks detect staleness.
    pub version: u64,
}

impl LedgerEntry {
    pub fn is_home_registration(&self) -> bool {
        self.flags.home_registration()
    }
}
