//! # Mobility Core
//!
//! Owns the three tables and the outgoing sequence counter of one node and
//! implements the message flows that span them:
//!
//! - sending a binding update: rejection check, rate limit, sequence number,
//!   ledger record, queued update option
//! - receiving a binding update: cache update and the acknowledgement owed
//! - receiving an acknowledgement: ledger state, sequence resync
//! - timer dispatch: cache refresh requests become queued binding requests;
//!   due ledger retransmissions are re-sent with a fresh sequence number
//!
//! There is no global state; a host creates one core per node and drops it
//! after [`MobilityCore::shutdown`].

use std::fmt;
use std::net::Ipv6Addr;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::domain::{
    binding_auth_fields, AckOption, AckStatus, BindingCacheEntry, BindingCacheError, BindingKind,
    ConfigError, IncomingUpdate, KindMask, LedgerCallback, LedgerEntry, LedgerError, LedgerFlags,
    MobilityConfig, MobilityResult, OutgoingUpdate, RateDecision, ReceivedAck, RequestOption,
    SequenceCounter, SequenceNumber, SubOption, UpdateOption,
};
use crate::ports::{
    AddressDefense, Authenticator, BindingReceiver, CallbackVerdict, CarrierTransmitter,
    DeadlineTimer, LedgerCallbackHandler, MobileNodeApi, OptionCodec, TimeSource, TunnelManager,
};

use super::binding_cache::{BindingCache, CacheUpdate};
use super::binding_ledger::{AckOutcome, BindingLedger, LedgerUpdate};
use super::scheduler::OptionScheduler;

/// Identifies the table a timer event belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TableId {
    Cache,
    Ledger,
    Scheduler,
}

impl TableId {
    pub const ALL: [TableId; 3] = [TableId::Cache, TableId::Ledger, TableId::Scheduler];
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableId::Cache => write!(f, "binding-cache"),
            TableId::Ledger => write!(f, "binding-ledger"),
            TableId::Scheduler => write!(f, "option-scheduler"),
        }
    }
}

/// Host-supplied collaborators.
#[derive(Clone)]
pub struct MobilityPorts {
    pub tunnels: Arc<dyn TunnelManager>,
    pub defense: Arc<dyn AddressDefense>,
    pub codec: Arc<dyn OptionCodec>,
    pub transmitter: Arc<dyn CarrierTransmitter>,
    pub clock: Arc<dyn TimeSource>,
    pub authenticator: Option<Arc<dyn Authenticator>>,
}

/// One deadline timer per table.
#[derive(Clone)]
pub struct TableTimers {
    pub cache: Arc<dyn DeadlineTimer>,
    pub ledger: Arc<dyn DeadlineTimer>,
    pub scheduler: Arc<dyn DeadlineTimer>,
}

/// Counts of entries removed by [`MobilityCore::shutdown`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub bindings: usize,
    pub ledger_entries: usize,
    pub queued_options: usize,
}

/// Mobility binding core of one node.
pub struct MobilityCore {
    config: MobilityConfig,
    cache: BindingCache,
    ledger: BindingLedger,
    scheduler: Arc<OptionScheduler>,
    sequence: SequenceCounter,
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl MobilityCore {
    /// Build the tables from a validated configuration.
    pub fn new(
        config: MobilityConfig,
        ports: MobilityPorts,
        timers: TableTimers,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let cache = BindingCache::new(
            config.cache.clone(),
            ports.tunnels.clone(),
            ports.defense,
            ports.clock.clone(),
            timers.cache,
        );
        let ledger = BindingLedger::new(
            config.ledger.clone(),
            config.rate_limit.clone(),
            ports.tunnels,
            ports.clock.clone(),
            timers.ledger,
        );
        let scheduler = Arc::new(OptionScheduler::new(
            config.scheduler.clone(),
            ports.codec,
            ports.transmitter,
            ports.clock,
            timers.scheduler,
        ));

        info!(
            cache_capacity = config.cache.capacity,
            ledger_capacity = config.ledger.capacity,
            scheduler_capacity = config.scheduler.capacity,
            "Mobility core initialised"
        );
        Ok(Self {
            config,
            cache,
            ledger,
            scheduler,
            sequence: SequenceCounter::new(0),
            authenticator: ports.authenticator,
        })
    }

    pub fn config(&self) -> &MobilityConfig {
        &self.config
    }

    pub fn cache(&self) -> &BindingCache {
        &self.cache
    }

    pub fn ledger(&self) -> &BindingLedger {
        &self.ledger
    }

    /// The option scheduler; the host's transmit path drains it.
    pub fn scheduler(&self) -> &Arc<OptionScheduler> {
        &self.scheduler
    }

    pub fn sequence(&self) -> &SequenceCounter {
        &self.sequence
    }

    /// Run the expiry work of `table`. Called from the timer worker.
    pub fn on_timer(&self, table: TableId) {
        match table {
            TableId::Cache => {
                let sweep = self.cache.on_timer();
                for request in &sweep.refresh_requests {
                    if let Err(err) = self.scheduler.enqueue_request(
                        request.src,
                        request.dst,
                        RequestOption::default(),
                        self.config.scheduler.request_max_delay_ms,
                    ) {
                        warn!(home = %request.dst, error = %err, "Dropping refresh request");
                    }
                }
                debug!(
                    table = %table,
                    expired = sweep.expired.len(),
                    refresh_requests = sweep.refresh_requests.len(),
                    "Timer pass complete"
                );
            }
            TableId::Ledger => {
                let sweep = self.ledger.on_timer(self);
                debug!(
                    table = %table,
                    fired = sweep.fired,
                    resent = sweep.resent,
                    removed = sweep.removed.len(),
                    stale = sweep.stale,
                    "Timer pass complete"
                );
            }
            TableId::Scheduler => {
                let sweep = self.scheduler.on_timer();
                debug!(
                    table = %table,
                    carriers = sweep.carriers,
                    dropped = sweep.dropped,
                    "Timer pass complete"
                );
            }
        }
    }

    /// Empty every table, releasing all tunnel, route and defense resources.
    pub fn shutdown(&self) -> ShutdownReport {
        let report = ShutdownReport {
            queued_options: self.scheduler.flush(),
            ledger_entries: self.ledger.flush(),
            bindings: self.cache.flush(),
        };
        info!(
            bindings = report.bindings,
            ledger_entries = report.ledger_entries,
            queued_options = report.queued_options,
            "Mobility core shut down"
        );
        report
    }

    fn update_delay(&self, home_registration: bool) -> u64 {
        if home_registration {
            0
        } else {
            self.config.scheduler.update_max_delay_ms
        }
    }

    fn auth_sub_options(
        &self,
        home: Ipv6Addr,
        care_of: Ipv6Addr,
        sequence: SequenceNumber,
        lifetime: u32,
    ) -> Vec<SubOption> {
        match &self.authenticator {
            Some(auth) => {
                let fields = binding_auth_fields(home, care_of, sequence, lifetime);
                vec![SubOption::new(SubOption::AUTH_DATA, auth.sign(&fields))]
            }
            None => Vec::new(),
        }
    }

    fn update_option(
        &self,
        home: Ipv6Addr,
        care_of: Ipv6Addr,
        sequence: SequenceNumber,
        lifetime: u32,
        flags: LedgerFlags,
        prefix_len: u8,
    ) -> UpdateOption {
        UpdateOption {
            sequence,
            lifetime,
            flags,
            prefix_len,
            sub_options: self.auth_sub_options(home, care_of, sequence, lifetime),
        }
    }

    fn apply_incoming(&self, incoming: &IncomingUpdate) -> AckStatus {
        let home = incoming.home_addr;
        let kind = incoming.kind();

        if incoming.is_deregistration() {
            let mask = match kind {
                BindingKind::HomeRegistration => KindMask::HOME_REGISTRATION,
                _ => KindMask::CACHE | KindMask::TEMPORARY,
            };
            // A stale deregistration is acknowledged but changes nothing.
            return match self.cache.deregister(&home, mask, incoming.update.sequence) {
                Ok(_) | Err(BindingCacheError::NotFound { .. }) => AckStatus::ACCEPTED,
                Err(err) => {
                    warn!(home = %home, error = %err, "Deregistration refused");
                    AckStatus::REASON_UNSPECIFIED
                }
            };
        }

        let update = CacheUpdate {
            ifindex: incoming.ifindex,
            anchor_addr: incoming.anchor_addr,
            home_addr: home,
            care_of_addr: incoming.care_of_addr,
            lifetime: incoming.update.lifetime,
            prefix_len: incoming.update.prefix_len,
            sequence: incoming.update.sequence,
            single_address: incoming.single_address(),
            kind,
        };
        match self.cache.add(update) {
            Ok(_) => AckStatus::ACCEPTED,
            Err(BindingCacheError::Full { .. }) => {
                warn!(home = %home, "Binding cache full");
                AckStatus::INSUFFICIENT_RESOURCES
            }
            Err(err) => {
                warn!(home = %home, error = %err, "Binding update refused");
                AckStatus::REASON_UNSPECIFIED
            }
        }
    }
}

impl MobileNodeApi for MobilityCore {
    fn send_binding_update(&self, update: OutgoingUpdate) -> MobilityResult<SequenceNumber> {
        let peer = update.peer_addr;
        if let Some(until) = self.ledger.rejected_until(&peer) {
            return Err(LedgerError::PeerRejected { peer, until }.into());
        }

        let home_registration = update.flags.home_registration();
        if let RateDecision::NotYet(retry_at) =
            self.ledger
                .rate_limit(&peer, update.care_of_addr, home_registration)
        {
            debug!(peer = %peer, retry_at = %retry_at, "Binding update rate limited");
            return Err(LedgerError::RateLimited { peer, retry_at }.into());
        }

        let sequence = self.sequence.next();
        self.ledger.add(LedgerUpdate::for_outgoing(
            &update,
            sequence,
            self.ledger.config(),
        ))?;

        let option = self.update_option(
            update.home_addr,
            update.care_of_addr,
            sequence,
            update.lifetime,
            update.flags,
            update.prefix_len,
        );
        self.scheduler.enqueue_update(
            update.care_of_addr,
            peer,
            option,
            self.update_delay(home_registration),
        )?;

        info!(
            peer = %peer,
            coa = %update.care_of_addr,
            seq = %sequence,
            lifetime = update.lifetime,
            home_registration,
            "Binding update sent"
        );
        Ok(sequence)
    }

    fn receive_binding_ack(&self, ack: ReceivedAck) -> AckOutcome {
        let outcome = self.ledger.acknowledge(ack);
        if let AckOutcome::OutOfWindow { peer_sequence } = outcome {
            self.sequence.advance_past(peer_sequence);
            info!(
                peer = %ack.peer_addr,
                peer_sequence = %peer_sequence,
                "Sequence number resynchronised"
            );
        }
        outcome
    }
}

impl BindingReceiver for MobilityCore {
    fn receive_binding_update(&self, incoming: IncomingUpdate) -> MobilityResult<AckStatus> {
        let status = self.apply_incoming(&incoming);

        if incoming.update.flags.ack_required() || !status.is_accepted() {
            let lifetime = if status.is_accepted() {
                incoming.update.lifetime
            } else {
                0
            };
            let ack = AckOption {
                status,
                sequence: incoming.update.sequence,
                lifetime,
                refresh: lifetime,
                sub_options: self.auth_sub_options(
                    incoming.home_addr,
                    incoming.care_of_addr,
                    incoming.update.sequence,
                    lifetime,
                ),
            };
            self.scheduler.enqueue_ack(
                incoming.anchor_addr,
                incoming.care_of_addr,
                ack,
                self.config.scheduler.ack_max_delay_ms,
            )?;
        }

        debug!(
            home = %incoming.home_addr,
            coa = %incoming.care_of_addr,
            seq = %incoming.update.sequence,
            status = status.0,
            "Binding update processed"
        );
        Ok(status)
    }

    fn lookup_binding(&self, home: &Ipv6Addr) -> Option<BindingCacheEntry> {
        self.cache.get(home)
    }
}

impl LedgerCallbackHandler for MobilityCore {
    fn on_callback(&self, callback: LedgerCallback, entry: &LedgerEntry) -> CallbackVerdict {
        match callback {
            LedgerCallback::Expire => {
                debug!(peer = %entry.peer_addr, "Ledger entry expired");
                CallbackVerdict::Remove
            }
            LedgerCallback::Retransmit | LedgerCallback::Refresh => CallbackVerdict::KeepTrying,
        }
    }

    fn next_sequence(&self, _entry: &LedgerEntry) -> SequenceNumber {
        self.sequence.next()
    }

    fn resend(&self, callback: LedgerCallback, entry: &LedgerEntry) {
        let option = self.update_option(
            entry.home_addr,
            entry.care_of_addr,
            entry.sequence,
            entry.lifetime,
            entry.flags,
            entry.prefix_len,
        );
        // A lost resend is covered by the next retransmission.
        match self.scheduler.enqueue_update(
            entry.care_of_addr,
            entry.peer_addr,
            option,
            self.update_delay(entry.is_home_registration()),
        ) {
            Ok(()) => debug!(
                peer = %entry.peer_addr,
                callback = ?callback,
                seq = %entry.sequence,
                "Binding update resent"
            ),
            Err(err) => warn!(peer = %entry.peer_addr, error = %err, "Resend not queued"),
        }
    }
}
