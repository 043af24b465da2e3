//! # Option Scheduler
//!
//! Coalesces binding updates, acknowledgements and requests bound for the
//! same peer so they can share one outgoing message. Each queued option has a
//! deadline (`now + max_delay`); whatever outgoing packet is built first for
//! the pair picks the options up through [`OptionScheduler::drain_for`]. When a
//! deadline passes with the option still queued, the scheduler forces an empty
//! carrier message out through the [`CarrierTransmitter`], whose transmit path
//! drains it.
//!
//! Delivery is best effort: a carrier that makes no progress drops the
//! overdue options of its pair. Lost updates are recovered by the ledger's
//! retransmission.

use std::net::Ipv6Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::domain::{
    AckOption, HashList, IterAction, MobilityOption, OptionKey, OptionKind, PendingOption,
    RequestOption, SchedulerConfig, SchedulerError, Timestamp, UpdateOption,
};
use crate::ports::{CarrierTransmitter, DeadlineTimer, OptionCodec, TimeSource, TransmitError};

type OptionTable = HashList<OptionKey, Timestamp, PendingOption>;

/// Largest destination options header: 8-bit length in 8-octet units.
pub const MAX_OPTIONS_LEN: usize = 2048;

/// Options drained into one outgoing message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DrainedOptions {
    /// Encoded option bytes, in drain order.
    pub bytes: Vec<u8>,
    pub kinds: Vec<OptionKind>,
}

impl DrainedOptions {
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

/// What a deadline pass did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SchedulerSweep {
    pub carriers: usize,
    pub dropped: usize,
    pub next_deadline: Option<Timestamp>,
}

/// Scheduler counters.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    pub enqueued: AtomicU64,
    pub superseded: AtomicU64,
    pub drained: AtomicU64,
    pub carriers: AtomicU64,
    pub dropped: AtomicU64,
}

/// Pending option queue.
pub struct OptionScheduler {
    config: SchedulerConfig,
    table: RwLock<OptionTable>,
    codec: Arc<dyn OptionCodec>,
    transmitter: Arc<dyn CarrierTransmitter>,
    clock: Arc<dyn TimeSource>,
    timer: Arc<dyn DeadlineTimer>,
    stats: SchedulerStats,
}

impl OptionScheduler {
    pub fn new(
        config: SchedulerConfig,
        codec: Arc<dyn OptionCodec>,
        transmitter: Arc<dyn CarrierTransmitter>,
        clock: Arc<dyn TimeSource>,
        timer: Arc<dyn DeadlineTimer>,
    ) -> Self {
        Self {
            table: RwLock::new(HashList::new(config.capacity, config.buckets)),
            config,
            codec,
            transmitter,
            clock,
            timer,
            stats: SchedulerStats::default(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn enqueue_update(
        &self,
        src: Ipv6Addr,
        dst: Ipv6Addr,
        update: UpdateOption,
        max_delay_ms: u64,
    ) -> Result<(), SchedulerError> {
        self.enqueue(src, dst, MobilityOption::Update(update), max_delay_ms)
    }

    pub fn enqueue_ack(
        &self,
        src: Ipv6Addr,
        dst: Ipv6Addr,
        ack: AckOption,
        max_delay_ms: u64,
    ) -> Result<(), SchedulerError> {
        self.enqueue(src, dst, MobilityOption::Ack(ack), max_delay_ms)
    }

    pub fn enqueue_request(
        &self,
        src: Ipv6Addr,
        dst: Ipv6Addr,
        request: RequestOption,
        max_delay_ms: u64,
    ) -> Result<(), SchedulerError> {
        self.enqueue(src, dst, MobilityOption::Request(request), max_delay_ms)
    }

    /// Queue `option` for `dst`. A queued option of the same kind for the same
    /// pair is replaced; the earlier of the two deadlines is kept. With
    /// `max_delay_ms == 0` a carrier goes out straight away.
    pub fn enqueue(
        &self,
        src: Ipv6Addr,
        dst: Ipv6Addr,
        option: MobilityOption,
        max_delay_ms: u64,
    ) -> Result<(), SchedulerError> {
        let now = self.clock.now();
        let kind = option.kind();
        let key = OptionKey { src, dst, kind };
        let deadline = now.add_millis(max_delay_ms);
        let pending = PendingOption {
            option,
            enqueued_at: now,
        };

        let next = {
            let mut table = self.table.write();
            match table.order_of(&key) {
                Some(existing) => {
                    if let Some(slot) = table.get_mut(&key) {
                        *slot = pending;
                    }
                    table.reschedule(&key, existing.min(deadline));
                    self.stats.superseded.fetch_add(1, Ordering::Relaxed);
                }
                None => {
                    table
                        .add(key, deadline, pending)
                        .map_err(|_| SchedulerError::Full {
                            capacity: self.config.capacity,
                        })?;
                }
            }
            table.next_deadline()
        };
        self.timer.arm(next);
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        debug!(src = %src, dst = %dst, kind = ?kind, deadline = %deadline, "Option queued");

        if max_delay_ms == 0 {
            if let Err(err) = self.send_carrier(src, dst) {
                warn!(src = %src, dst = %dst, error = %err, "Immediate carrier failed");
            }
        }
        Ok(())
    }

    /// Take at most one queued option of each kind for `(src, dst)`, updates
    /// first, then acknowledgements, then requests, encoding each while the
    /// total stays within `budget` bytes. Options that do not fit stay queued.
    /// Budgets above [`MAX_OPTIONS_LEN`] are capped to it.
    pub fn drain_for(&self, src: Ipv6Addr, dst: Ipv6Addr, budget: usize) -> DrainedOptions {
        let candidates: Vec<(OptionKey, PendingOption)> = {
            let table = self.table.read();
            OptionKind::ALL
                .iter()
                .map(|&kind| OptionKey { src, dst, kind })
                .filter_map(|key| table.get(&key).map(|p| (key, p.clone())))
                .collect()
        };
        if candidates.is_empty() {
            return DrainedOptions::default();
        }

        let mut buffer = vec![0u8; budget.min(MAX_OPTIONS_LEN)];
        let mut offset = 0;
        let mut encoded = Vec::with_capacity(candidates.len());
        for (key, pending) in candidates {
            match self.codec.encode(&mut buffer, offset, &pending.option) {
                Ok(end) => {
                    offset = end;
                    encoded.push((key, pending));
                }
                Err(err) => {
                    debug!(dst = %dst, kind = ?key.kind, error = %err, "Option left queued");
                }
            }
        }
        buffer.truncate(offset);

        // An option superseded while we encoded stays queued for the next
        // message.
        let next = {
            let mut table = self.table.write();
            for (key, pending) in &encoded {
                if table.get(key) == Some(pending) {
                    table.delete(key);
                }
            }
            table.next_deadline()
        };
        self.timer.arm(next);
        self.stats
            .drained
            .fetch_add(encoded.len() as u64, Ordering::Relaxed);

        DrainedOptions {
            bytes: buffer,
            kinds: encoded.into_iter().map(|(key, _)| key.kind).collect(),
        }
    }

    /// Force carriers out for every pair with an overdue option.
    pub fn on_timer(&self) -> SchedulerSweep {
        let now = self.clock.now();

        let mut pairs: Vec<(Ipv6Addr, Ipv6Addr)> = Vec::new();
        for (key, _, _) in self.table.read().iter().take_while(|(_, o, _)| *o <= now) {
            if !pairs.contains(&(key.src, key.dst)) {
                pairs.push((key.src, key.dst));
            }
        }

        let mut sweep = SchedulerSweep::default();
        for (src, dst) in pairs {
            let before = self.overdue_for(src, dst, now);
            let sent = self.send_carrier(src, dst);
            sweep.carriers += 1;
            let after = self.overdue_for(src, dst, now);

            let stalled = match &sent {
                Ok(()) => after >= before,
                Err(_) => true,
            };
            if stalled && after > 0 {
                let dropped = self.drop_overdue(src, dst, now);
                sweep.dropped += dropped;
                match sent {
                    Err(err) => warn!(
                        src = %src, dst = %dst, dropped, error = %err,
                        "Carrier failed, dropping overdue options"
                    ),
                    Ok(()) => warn!(
                        src = %src, dst = %dst, dropped,
                        "Carrier drained nothing, dropping overdue options"
                    ),
                }
            }
        }

        let next = self.table.read().next_deadline();
        self.timer.arm(next);
        sweep.next_deadline = next;
        sweep
    }

    /// Drop everything queued.
    pub fn flush(&self) -> usize {
        let drained = self.table.write().drain();
        self.timer.arm(None);
        drained.len()
    }

    /// Queued options with their deadlines, soonest first.
    pub fn snapshot(&self) -> Vec<(OptionKey, Timestamp, PendingOption)> {
        self.table
            .read()
            .iter()
            .map(|(key, deadline, pending)| (*key, deadline, pending.clone()))
            .collect()
    }

    pub fn contains(&self, src: Ipv6Addr, dst: Ipv6Addr, kind: OptionKind) -> bool {
        self.table.read().contains(&OptionKey { src, dst, kind })
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

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    fn send_carrier(&self, src: Ipv6Addr, dst: Ipv6Addr) -> Result<(), TransmitError> {
        self.stats.carriers.fetch_add(1, Ordering::Relaxed);
        self.transmitter.send_carrier(src, dst)
    }

    fn overdue_for(&self, src: Ipv6Addr, dst: Ipv6Addr, now: Timestamp) -> usize {
        self.table
            .read()
            .iter()
            .take_while(|(_, o, _)| *o <= now)
            .filter(|(key, _, _)| key.src == src && key.dst == dst)
            .count()
    }

    fn drop_overdue(&self, src: Ipv6Addr, dst: Ipv6Addr, now: Timestamp) -> usize {
        let dropped = self.table.write().iterate(|key, order, _| {
            if *order > now {
                return IterAction::Stop;
            }
            if key.src == src && key.dst == dst {
                IterAction::DeleteCurrent
            } else {
                IterAction::Continue
            }
        });
        self.stats
            .dropped
            .fetch_add(dropped as u64, Ordering::Relaxed);
        dropped
    }
}
