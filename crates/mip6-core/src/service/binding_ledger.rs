//! # Binding Ledger
//!
//! Mobile node side list of binding updates sent to each peer, with their
//! acknowledgement state, retransmission backoff and send-rate history.
//!
//! Callbacks are delivered in phases. Due entries are copied out under the
//! read lock and handed to a [`LedgerCallbackHandler`] with no lock held; the
//! verdicts are then applied under the write lock, but only to entries whose
//! `version` still matches the copy. Anything that deleted or changed the
//! entry in between wins. A resend takes its sequence number while the write
//! lock confirms the version, and is queued from the recorded copy after the
//! lock is released.

use std::net::Ipv6Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::domain::{
    AckStatus, HashList, LedgerCallback, LedgerConfig, LedgerEntry, LedgerError, LedgerFlags,
    LedgerState, OutgoingUpdate, RateDecision, RateLimitConfig, ReceivedAck, ResourceError,
    SendRateState, SequenceNumber, Timestamp,
};
use crate::ports::{CallbackVerdict, DeadlineTimer, LedgerCallbackHandler, TimeSource, TunnelManager};

type LedgerTable = HashList<Ipv6Addr, Timestamp, LedgerEntry>;

/// Everything [`BindingLedger::add`] records for a peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerUpdate {
    pub peer_addr: Ipv6Addr,
    pub home_addr: Ipv6Addr,
    pub care_of_addr: Ipv6Addr,
    pub sequence: SequenceNumber,
    pub lifetime: u32,
    pub prefix_len: u8,
    pub flags: LedgerFlags,
    pub callback: LedgerCallback,
    /// Milliseconds from now until `callback` fires.
    pub callback_delay_ms: u64,
    pub state: LedgerState,
    pub min_retry_ms: u64,
    pub max_retry_ms: u64,
}

impl LedgerUpdate {
    /// Derive the ledger record for a freshly sent update: retransmit after
    /// the initial delay if an acknowledgement is required, otherwise just
    /// expire with the lifetime.
    pub fn for_outgoing(
        update: &OutgoingUpdate,
        sequence: SequenceNumber,
        config: &LedgerConfig,
    ) -> Self {
        let (state, callback, callback_delay_ms) = if update.flags.ack_required() {
            (
                LedgerState::AwaitingAck,
                LedgerCallback::Retransmit,
                config.initial_retry_ms,
            )
        } else {
            (
                LedgerState::Acknowledged,
                LedgerCallback::Expire,
                u64::from(update.lifetime) * 1_000,
            )
        };
        Self {
            peer_addr: update.peer_addr,
            home_addr: update.home_addr,
            care_of_addr: update.care_of_addr,
            sequence,
            lifetime: update.lifetime,
            prefix_len: update.prefix_len,
            flags: update.flags,
            callback,
            callback_delay_ms,
            state,
            min_retry_ms: config.initial_retry_ms,
            max_retry_ms: config.max_retry_ms,
        }
    }
}

/// Result of [`BindingLedger::add`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedgerAddOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Result of [`BindingLedger::acknowledge`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckOutcome {
    /// No entry, or the acknowledgement is for another sequence number.
    Ignored,
    Accepted,
    /// The peer saw a sequence number ahead of ours; the sender should move
    /// its counter past `peer_sequence` and keep retransmitting.
    OutOfWindow { peer_sequence: SequenceNumber },
    Rejected { status: AckStatus },
}

/// The fields of a ledger entry [`BindingLedger::modify`] may change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LedgerTiming {
    pub state: LedgerState,
    pub callback: LedgerCallback,
    pub callback_time: Timestamp,
    pub expire: Timestamp,
    pub delay: u64,
}

impl LedgerTiming {
    fn of(entry: &LedgerEntry) -> Self {
        Self {
            state: entry.state,
            callback: entry.callback,
            callback_time: entry.callback_time,
            expire: entry.expire,
            delay: entry.delay,
        }
    }

    fn apply(self, entry: &mut LedgerEntry) {
        entry.state = self.state;
        entry.callback = self.callback;
        entry.callback_time = self.callback_time;
        entry.expire = self.expire;
        entry.delay = self.delay.min(entry.max_delay);
    }
}

/// What a timer pass did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LedgerSweep {
    pub fired: usize,
    /// Resends queued under a freshly recorded sequence number.
    pub resent: usize,
    pub removed: Vec<Ipv6Addr>,
    /// Verdicts dropped because the entry changed while the handler ran.
    pub stale: usize,
    pub next_deadline: Option<Timestamp>,
}

/// Binding update list.
pub struct BindingLedger {
    config: LedgerConfig,
    rate_limit: RateLimitConfig,
    table: RwLock<LedgerTable>,
    reconfigure: Mutex<()>,
    tunnels: Arc<dyn TunnelManager>,
    clock: Arc<dyn TimeSource>,
    timer: Arc<dyn DeadlineTimer>,
    versions: AtomicU64,
}

impl BindingLedger {
    pub fn new(
        config: LedgerConfig,
        rate_limit: RateLimitConfig,
        tunnels: Arc<dyn TunnelManager>,
        clock: Arc<dyn TimeSource>,
        timer: Arc<dyn DeadlineTimer>,
    ) -> Self {
        Self {
            table: RwLock::new(HashList::new(config.capacity, config.buckets)),
            config,
            rate_limit,
            reconfigure: Mutex::new(()),
            tunnels,
            clock,
            timer,
            versions: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Record an update sent to `peer_addr`, creating the entry or replacing
    /// it if `sequence` is newer than the stored one.
    ///
    /// A home registration owns a tunnel to the home agent from the care-of
    /// address; it is rebuilt when the care-of address changes.
    pub fn add(&self, update: LedgerUpdate) -> Result<LedgerAddOutcome, LedgerError> {
        let now = self.clock.now();
        let peer = update.peer_addr;
        let _guard = self.reconfigure.lock();

        let (existing, full) = {
            let table = self.table.read();
            (table.get(&peer).cloned(), table.is_full())
        };

        let Some(current) = existing else {
            if full {
                return Err(LedgerError::Full {
                    capacity: self.config.capacity,
                });
            }
            let mut rate = SendRateState::default();
            rate.check_and_record(
                update.care_of_addr,
                update.flags.home_registration(),
                now,
                &self.rate_limit,
            );
            let entry = self.build_entry(&update, rate, now);
            if entry.is_home_registration() {
                self.setup(&entry)?;
            }

            let inserted = {
                let mut table = self.table.write();
                table
                    .add(peer, entry.callback_time, entry.clone())
                    .map(|()| table.next_deadline())
            };
            return match inserted {
                Ok(next) => {
                    self.timer.arm(next);
                    debug!(
                        peer = %peer,
                        coa = %entry.care_of_addr,
                        seq = %entry.sequence,
                        callback = ?entry.callback,
                        "Created ledger entry"
                    );
                    Ok(LedgerAddOutcome::Created)
                }
                Err(_) => {
                    if entry.is_home_registration() {
                        self.teardown(&entry);
                    }
                    Err(LedgerError::Full {
                        capacity: self.config.capacity,
                    })
                }
            };
        };

        if !update.sequence.is_newer_than(current.sequence) {
            debug!(
                peer = %peer,
                stored = %current.sequence,
                offered = %update.sequence,
                "Ignoring stale ledger update"
            );
            return Ok(LedgerAddOutcome::Unchanged);
        }

        let entry = self.build_entry(&update, current.rate, now);
        let was_home = current.is_home_registration();
        let is_home = entry.is_home_registration();
        let tunnel_change =
            was_home != is_home || (was_home && current.care_of_addr != entry.care_of_addr);

        if tunnel_change {
            if was_home {
                self.teardown(&current);
            }
            if is_home {
                if let Err(err) = self.setup(&entry) {
                    warn!(peer = %peer, error = %err, "Ledger update rolled back");
                    if was_home {
                        if let Err(restore) = self.setup(&current) {
                            error!(peer = %peer, error = %restore, "Failed to restore home tunnel");
                        }
                    }
                    return Err(err.into());
                }
            }
        }

        let next = {
            let mut table = self.table.write();
            if let Some(slot) = table.get_mut(&peer) {
                *slot = entry.clone();
            }
            table.reschedule(&peer, entry.callback_time);
            table.next_deadline()
        };
        self.timer.arm(next);
        debug!(
            peer = %peer,
            coa = %entry.care_of_addr,
            seq = %entry.sequence,
            tunnel_changed = tunnel_change,
            "Updated ledger entry"
        );
        Ok(LedgerAddOutcome::Updated)
    }

    pub fn get(&self, peer: &Ipv6Addr) -> Option<LedgerEntry> {
        self.table.read().get(peer).cloned()
    }

    /// Adjust the timing of an entry under the write lock and re-order it by
    /// its (possibly changed) `callback_time`. Addresses, flags and sequence
    /// only change through [`BindingLedger::add`], which keeps the home tunnel
    /// in step.
    pub fn modify<F>(&self, peer: &Ipv6Addr, f: F) -> Result<LedgerEntry, LedgerError>
    where
        F: FnOnce(&mut LedgerTiming),
    {
        let version = self.next_version();
        let (updated, next) = {
            let mut table = self.table.write();
            let entry = table
                .get_mut(peer)
                .ok_or(LedgerError::NotFound { peer: *peer })?;
            let mut timing = LedgerTiming::of(entry);
            f(&mut timing);
            timing.apply(entry);
            entry.version = version;
            let updated = entry.clone();
            table.reschedule(peer, updated.callback_time);
            (updated, table.next_deadline())
        };
        self.timer.arm(next);
        Ok(updated)
    }

    /// Remove the entry for `peer`, tearing down its home tunnel if any.
    pub fn delete(&self, peer: &Ipv6Addr) -> Result<LedgerEntry, LedgerError> {
        let _guard = self.reconfigure.lock();
        let (removed, next) = {
            let mut table = self.table.write();
            let removed = table
                .delete(peer)
                .ok_or(LedgerError::NotFound { peer: *peer })?;
            (removed, table.next_deadline())
        };
        self.timer.arm(next);
        if removed.is_home_registration() {
            self.teardown(&removed);
        }
        debug!(peer = %peer, "Deleted ledger entry");
        Ok(removed)
    }

    /// Apply a binding acknowledgement.
    pub fn acknowledge(&self, ack: ReceivedAck) -> AckOutcome {
        let now = self.clock.now();
        let peer = ack.peer_addr;
        let version = self.next_version();

        let (outcome, next) = {
            let mut table = self.table.write();
            let Some(entry) = table.get_mut(&peer) else {
                return AckOutcome::Ignored;
            };

            // The peer reports its own last-seen sequence number here, so the
            // match against ours is skipped.
            if ack.status == AckStatus::SEQUENCE_OUT_OF_WINDOW {
                return AckOutcome::OutOfWindow {
                    peer_sequence: ack.sequence,
                };
            }
            if entry.sequence != ack.sequence {
                debug!(
                    peer = %peer,
                    expected = %entry.sequence,
                    received = %ack.sequence,
                    "Ignoring acknowledgement for another sequence"
                );
                return AckOutcome::Ignored;
            }

            let outcome = if ack.status.is_accepted() {
                self.apply_accepted(entry, &ack, now);
                AckOutcome::Accepted
            } else {
                entry.state = LedgerState::Rejected;
                entry.callback = LedgerCallback::Expire;
                entry.callback_time = now.add_millis(self.config.reject_cooldown_ms);
                AckOutcome::Rejected { status: ack.status }
            };
            entry.version = version;
            let callback_time = entry.callback_time;
            table.reschedule(&peer, callback_time);
            (outcome, table.next_deadline())
        };
        self.timer.arm(next);

        match outcome {
            AckOutcome::Rejected { status } => {
                info!(peer = %peer, status = status.0, "Binding update rejected")
            }
            _ => debug!(peer = %peer, seq = %ack.sequence, "Binding update acknowledged"),
        }
        outcome
    }

    /// Mark `peer` as refusing updates for the rejection cooldown.
    ///
    /// Idempotent: rejecting an already rejected peer does not extend the
    /// cooldown.
    pub fn reject(&self, peer: &Ipv6Addr) -> Result<Timestamp, LedgerError> {
        let now = self.clock.now();
        let version = self.next_version();

        let (until, next) = {
            let mut table = self.table.write();
            let entry = table
                .get_mut(peer)
                .ok_or(LedgerError::NotFound { peer: *peer })?;
            if entry.state == LedgerState::Rejected {
                return Ok(entry.callback_time);
            }
            entry.state = LedgerState::Rejected;
            entry.callback = LedgerCallback::Expire;
            entry.callback_time = now.add_millis(self.config.reject_cooldown_ms);
            entry.version = version;
            let until = entry.callback_time;
            table.reschedule(peer, until);
            (until, table.next_deadline())
        };
        self.timer.arm(next);
        info!(peer = %peer, until = %until, "Peer rejected binding updates");
        Ok(until)
    }

    /// False while `peer` is in its rejection cooldown.
    pub fn may_send(&self, peer: &Ipv6Addr) -> bool {
        self.rejected_until(peer).is_none()
    }

    pub fn rejected_until(&self, peer: &Ipv6Addr) -> Option<Timestamp> {
        self.table
            .read()
            .get(peer)
            .filter(|e| e.state == LedgerState::Rejected)
            .map(|e| e.callback_time)
    }

    /// Check the send-rate policy for an update to `peer` with care-of
    /// address `coa`, recording the send if it is allowed. Peers with no
    /// entry are always allowed; their history starts when the entry is
    /// created.
    pub fn rate_limit(
        &self,
        peer: &Ipv6Addr,
        coa: Ipv6Addr,
        home_registration: bool,
    ) -> RateDecision {
        let now = self.clock.now();
        let mut table = self.table.write();
        match table.get_mut(peer) {
            Some(entry) => entry
                .rate
                .check_and_record(coa, home_registration, now, &self.rate_limit),
            None => RateDecision::Allowed,
        }
    }

    /// Run due callbacks.
    ///
    /// `Expire` entries are removed without consulting `handler` beyond a
    /// notification. For `Retransmit` and `Refresh` the handler's verdict
    /// decides: `KeepTrying` records a new sequence and backs off, `Done`
    /// leaves the entry to expire, `Remove` drops it.
    pub fn on_timer(&self, handler: &dyn LedgerCallbackHandler) -> LedgerSweep {
        let now = self.clock.now();

        let due: Vec<LedgerEntry> = self
            .table
            .read()
            .iter()
            .take_while(|(_, order, _)| *order <= now)
            .map(|(_, _, entry)| entry.clone())
            .collect();

        let verdicts: Vec<(LedgerEntry, CallbackVerdict)> = due
            .into_iter()
            .map(|entry| {
                let verdict = handler.on_callback(entry.callback, &entry);
                let verdict = match entry.callback {
                    LedgerCallback::Expire => CallbackVerdict::Remove,
                    _ => verdict,
                };
                (entry, verdict)
            })
            .collect();

        let mut sweep = LedgerSweep {
            fired: verdicts.len(),
            ..LedgerSweep::default()
        };
        let _guard = self.reconfigure.lock();
        let mut removed = Vec::new();
        let mut resends = Vec::new();

        let next = {
            let mut table = self.table.write();
            for (snapshot, verdict) in verdicts {
                let peer = snapshot.peer_addr;
                let Some(entry) = table.get_mut(&peer) else {
                    sweep.stale += 1;
                    continue;
                };
                if entry.version != snapshot.version {
                    debug!(peer = %peer, callback = ?snapshot.callback, "Dropping stale callback");
                    sweep.stale += 1;
                    continue;
                }

                match verdict {
                    CallbackVerdict::Remove => {
                        if let Some(entry) = table.delete(&peer) {
                            removed.push(entry);
                        }
                        continue;
                    }
                    CallbackVerdict::Done => {
                        entry.callback = LedgerCallback::Expire;
                        entry.callback_time = entry.expire;
                    }
                    CallbackVerdict::KeepTrying => {
                        entry.sequence = handler.next_sequence(entry);
                        if entry.callback == LedgerCallback::Refresh && entry.flags.ack_required()
                        {
                            entry.state = LedgerState::AwaitingAck;
                        }
                        back_off(entry, now);
                    }
                }
                entry.version = self.next_version();
                if verdict == CallbackVerdict::KeepTrying {
                    resends.push((snapshot.callback, entry.clone()));
                }
                let callback_time = entry.callback_time;
                table.reschedule(&peer, callback_time);
            }
            table.next_deadline()
        };
        self.timer.arm(next);

        for (callback, entry) in &resends {
            handler.resend(*callback, entry);
        }
        for entry in &removed {
            if entry.is_home_registration() {
                self.teardown(entry);
            }
            debug!(peer = %entry.peer_addr, "Ledger entry removed");
        }
        sweep.resent = resends.len();
        sweep.removed = removed.into_iter().map(|e| e.peer_addr).collect();
        sweep.next_deadline = next;
        sweep
    }

    /// Remove every entry, tearing down all home tunnels.
    pub fn flush(&self) -> usize {
        let _guard = self.reconfigure.lock();
        let drained = self.table.write().drain();
        self.timer.arm(None);
        for (_, _, entry) in &drained {
            if entry.is_home_registration() {
                self.teardown(entry);
            }
        }
        info!(count = drained.len(), "Binding update list flushed");
        drained.len()
    }

    /// All entries, soonest callback first.
    pub fn snapshot(&self) -> Vec<LedgerEntry> {
        self.table
            .read()
            .iter()
            .map(|(_, _, entry)| entry.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.table.read().next_deadline()
    }

    fn next_version(&self) -> u64 {
        self.versions.fetch_add(1, Ordering::Relaxed)
    }

    fn build_entry(
        &self,
        update: &LedgerUpdate,
        rate: SendRateState,
        now: Timestamp,
    ) -> LedgerEntry {
        LedgerEntry {
            peer_addr: update.peer_addr,
            home_addr: update.home_addr,
            care_of_addr: update.care_of_addr,
            sequence: update.sequence,
            lifetime: update.lifetime,
            prefix_len: update.prefix_len,
            flags: update.flags,
            state: update.state,
            expire: now.add_millis(u64::from(update.lifetime) * 1_000),
            delay: update.min_retry_ms,
            max_delay: update.max_retry_ms.max(update.min_retry_ms),
            callback: update.callback,
            callback_time: now.add_millis(update.callback_delay_ms),
            rate,
            version: self.next_version(),
        }
    }

    fn apply_accepted(&self, entry: &mut LedgerEntry, ack: &ReceivedAck, now: Timestamp) {
        entry.state = LedgerState::Acknowledged;
        entry.delay = self.config.initial_retry_ms.min(entry.max_delay);

        if entry.is_home_registration() && !entry.flags.deregistering() && ack.lifetime > 0 {
            let lifetime_ms = u64::from(ack.lifetime) * 1_000;
            let mut refresh_ms = lifetime_ms * u64::from(self.config.refresh_percent) / 100;
            if ack.refresh > 0 {
                refresh_ms = refresh_ms.min(u64::from(ack.refresh) * 1_000);
            }
            entry.expire = now.add_millis(lifetime_ms);
            entry.callback = LedgerCallback::Refresh;
            entry.callback_time = now.add_millis(refresh_ms);
        } else if entry.flags.deregistering() || ack.lifetime == 0 {
            entry.callback = LedgerCallback::Expire;
            entry.callback_time = now;
        } else {
            entry.callback = LedgerCallback::Expire;
            entry.callback_time = entry.expire;
        }
    }

    fn setup(&self, entry: &LedgerEntry) -> Result<(), ResourceError> {
        self.tunnels
            .create_tunnel(entry.peer_addr, entry.care_of_addr)
    }

    fn teardown(&self, entry: &LedgerEntry) {
        self.tunnels
            .destroy_tunnel(entry.peer_addr, entry.care_of_addr);
    }
}

/// Double the retransmission delay up to the ceiling. Correspondent entries
/// give up once the ceiling is reached and wait out their lifetime; home
/// registrations keep retrying at the ceiling.
fn back_off(entry: &mut LedgerEntry, now: Timestamp) {
    if !entry.is_home_registration() && entry.delay >= entry.max_delay {
        entry.callback = LedgerCallback::Expire;
        entry.callback_time = entry.expire;
        return;
    }
    entry.delay = entry.delay.saturating_mul(2).min(entry.max_delay);
    entry.callback_time = now.add_millis(entry.delay);
}
