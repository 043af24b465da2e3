//! Binding update send-rate limiting.
//!
//! A mobile node may send a burst of updates to a peer at the fast interval;
//! once `max_fast_sends` consecutive updates have gone out for an unchanged
//! care-of address, further updates are spaced by the slow interval. A home
//! registration or a care-of address change starts a new burst and is never
//! held back.

use std::net::Ipv6Addr;

use super::config::RateLimitConfig;
use super::value_objects::Timestamp;

/// Per-peer send history kept on the ledger entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SendRateState {
    pub consecutive_fast_sends: u32,
    pub last_send: Option<Timestamp>,
    pub last_sent_coa: Option<Ipv6Addr>,
}

/// Outcome of a rate-limit check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    /// Suppressed; the next send is permitted at this time.
    NotYet(Timestamp),
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed)
    }
}

impl SendRateState {
    /// Decide whether an update for `coa` may go out at `now`, recording the
    /// send when it may.
    pub fn check_and_record(
        &mut self,
        coa: Ipv6Addr,
        home_registration: bool,
        now: Timestamp,
        config: &RateLimitConfig,
    ) -> RateDecision {
        let coa_changed = self.last_sent_coa != Some(coa);
        if home_registration || coa_changed || self.last_send.is_none() {
            self.consecutive_fast_sends = 1;
            self.last_send = Some(now);
            self.last_sent_coa = Some(coa);
            return RateDecision::Allowed;
        }

        let interval = if self.consecutive_fast_sends < config.max_fast_sends {
            config.fast_interval_ms
        } else {
            config.slow_interval_ms
        };
        let earliest = self
            .last_send
            .map_or(now, |last| last.add_millis(interval));
        if now < earliest {
            return RateDecision::NotYet(earliest);
        }

        self.consecutive_fast_sends = self.consecutive_fast_sends.saturating_add(1);
        self.last_send = Some(now);
        RateDecision::Allowed
    }
}
