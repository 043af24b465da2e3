//! Value objects shared by every table: timestamps and modular sequence numbers.

use std::fmt;
use std::net::Ipv6Addr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

/// Monotonic timestamp in milliseconds.
///
/// The origin is whatever the [`TimeSource`](crate::ports::TimeSource) in use
/// chooses; only differences between timestamps from the same source are
/// meaningful.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Timestamp zero.
    pub const ZERO: Timestamp = Timestamp(0);

    /// Create a timestamp from milliseconds.
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Create a timestamp from seconds.
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1_000))
    }

    /// Milliseconds since the time source origin.
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Add a duration (saturating).
    pub fn saturating_add(&self, duration: Duration) -> Self {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(millis))
    }

    /// Add milliseconds (saturating).
    pub fn add_millis(&self, millis: u64) -> Self {
        Self(self.0.saturating_add(millis))
    }

    /// Subtract milliseconds (saturating at zero).
    pub fn sub_millis(&self, millis: u64) -> Self {
        Self(self.0.saturating_sub(millis))
    }

    /// Time elapsed since `earlier`, zero if `earlier` is in the future.
    pub fn saturating_since(&self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }

    /// Duration until `later`, zero if `later` already passed.
    pub fn until(&self, later: Timestamp) -> Duration {
        Duration::from_millis(later.0.saturating_sub(self.0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// 8-bit binding update sequence number with modular ordering.
///
/// `a` is newer than `b` iff `(a - b) mod 256` lies in `(0, 128)`. Half of the
/// number space is "ahead" of any value; the other half (and equality) is not.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SequenceNumber(pub u8);

impl SequenceNumber {
    /// Half the sequence space; the comparison window.
    pub const WINDOW: u8 = 128;

    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    pub const fn value(&self) -> u8 {
        self.0
    }

    /// True if `self` is strictly newer than `other` under wraparound.
    pub fn is_newer_than(&self, other: SequenceNumber) -> bool {
        let diff = self.0.wrapping_sub(other.0);
        diff != 0 && diff < Self::WINDOW
    }

    /// The following sequence number.
    pub fn next(&self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sequence counter shared by all outgoing binding updates of one core.
///
/// Lock-free; `next` and `advance_past` may race freely from any context.
#[derive(Debug, Default)]
pub struct SequenceCounter {
    current: AtomicU8,
}

impl SequenceCounter {
    /// Create a counter whose first `next()` returns `start + 1`.
    pub fn new(start: u8) -> Self {
        Self {
            current: AtomicU8::new(start),
        }
    }

    /// Last value handed out.
    pub fn current(&self) -> SequenceNumber {
        SequenceNumber(self.current.load(Ordering::Acquire))
    }

    /// Increment (wrapping) and return the new value.
    pub fn next(&self) -> SequenceNumber {
        let previous = self.current.fetch_add(1, Ordering::AcqRel);
        SequenceNumber(previous.wrapping_add(1))
    }

    /// Move the counter so that the next value is newer than `observed`.
    ///
    /// Never moves the counter backwards: if the current value is already
    /// newer than (or equal to) `observed`, nothing changes.
    pub fn advance_past(&self, observed: SequenceNumber) {
        let mut current = self.current.load(Ordering::Acquire);
        loop {
            if !observed.is_newer_than(SequenceNumber(current)) {
                return;
            }
            match self.current.compare_exchange_weak(
                current,
                observed.0,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

/// Fixed-width identity that can be XOR-folded into a bucket index.
pub trait FoldKey: Eq + Clone {
    /// Fold the key into 32 bits.
    fn fold(&self) -> u32;
}

impl FoldKey for Ipv6Addr {
    fn fold(&self) -> u32 {
        fold_ipv6(self)
    }
}

impl FoldKey for u32 {
    fn fold(&self) -> u32 {
        *self
    }
}

/// XOR of the four 32-bit words of an IPv6 address.
pub fn fold_ipv6(addr: &Ipv6Addr) -> u32 {
    addr.octets()
        .chunks_exact(4)
        .map(|w| u32::from_be_bytes([w[0], w[1], w[2], w[3]]))
        .fold(0, |acc, word| acc ^ word)
}
