//! # Binding Cache
//!
//! Home agent / correspondent node table mapping a mobile node's home address
//! to its current care-of address.
//!
//! ## Locking
//!
//! - `table` (`RwLock`): lookups take the read form; every insert, delete and
//!   reschedule the write form. It is held only across pure table mutation.
//! - `reconfigure` (`Mutex`): serialises the paths that touch tunnel, route
//!   or address-defense resources, so the teardown/setup of two concurrent
//!   updates for the same home address cannot interleave. Resource calls are
//!   made with `table` released, from values copied out under it.

use std::net::Ipv6Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::domain::{
    BindingCacheEntry, BindingCacheError, BindingKind, CacheConfig, CacheRecord, HashList,
    IterAction, KindMask, ResourceError, SequenceNumber, Timestamp,
};
use crate::ports::{AddressDefense, DeadlineTimer, TimeSource, TunnelManager};

type CacheTable = HashList<Ipv6Addr, Timestamp, CacheRecord>;

/// Fields of a received binding update, as applied to the cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheUpdate {
    pub ifindex: u32,
    /// Our address toward the mobile node.
    pub anchor_addr: Ipv6Addr,
    pub home_addr: Ipv6Addr,
    pub care_of_addr: Ipv6Addr,
    /// Lifetime in seconds.
    pub lifetime: u32,
    pub prefix_len: u8,
    pub sequence: SequenceNumber,
    pub single_address: bool,
    pub kind: BindingKind,
}

/// Result of [`BindingCache::add`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheAddOutcome {
    Created,
    Updated,
    /// Sequence number not newer than the stored one; nothing changed.
    Unchanged,
}

/// Refresh request to send once the table lock is released.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefreshRequest {
    /// Our address toward the mobile node.
    pub src: Ipv6Addr,
    /// The mobile node's home address.
    pub dst: Ipv6Addr,
    pub care_of_addr: Ipv6Addr,
}

/// What an expiry sweep did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheSweep {
    pub expired: Vec<Ipv6Addr>,
    pub refresh_requests: Vec<RefreshRequest>,
    pub next_deadline: Option<Timestamp>,
}

/// Binding cache counters.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub created: AtomicU64,
    pub updated: AtomicU64,
    pub stale: AtomicU64,
    pub evicted: AtomicU64,
    pub expired: AtomicU64,
    pub deleted: AtomicU64,
}

/// Binding cache.
pub struct BindingCache {
    config: CacheConfig,
    table: RwLock<CacheTable>,
    reconfigure: Mutex<()>,
    tunnels: Arc<dyn TunnelManager>,
    defense: Arc<dyn AddressDefense>,
    clock: Arc<dyn TimeSource>,
    timer: Arc<dyn DeadlineTimer>,
    stats: CacheStats,
}

impl BindingCache {
    pub fn new(
        config: CacheConfig,
        tunnels: Arc<dyn TunnelManager>,
        defense: Arc<dyn AddressDefense>,
        clock: Arc<dyn TimeSource>,
        timer: Arc<dyn DeadlineTimer>,
    ) -> Self {
        Self {
            table: RwLock::new(HashList::new(config.capacity, config.buckets)),
            config,
            reconfigure: Mutex::new(()),
            tunnels,
            defense,
            clock,
            timer,
            stats: CacheStats::default(),
        }
    }

    /// Apply a binding update: create the entry, or update it if `sequence`
    /// is newer than the stored one.
    ///
    /// When full, a home registration evicts the soft entry closest to
    /// expiry; other kinds fail with [`BindingCacheError::Full`].
    pub fn add(&self, update: CacheUpdate) -> Result<CacheAddOutcome, BindingCacheError> {
        let now = self.clock.now();
        let _guard = self.reconfigure.lock();

        let existing = self.table.read().get(&update.home_addr).map(CacheRecord::snapshot);
        let candidate = self.build_entry(&update, now);

        match existing {
            Some(current) => self.update_existing(current, candidate),
            None => self.create(candidate),
        }
    }

    /// Look up a binding and mark it used.
    pub fn get(&self, home: &Ipv6Addr) -> Option<BindingCacheEntry> {
        let now = self.clock.now();
        let table = self.table.read();
        let record = table.get(home)?;
        record.touch(now);
        Some(record.snapshot())
    }

    /// Look up a binding without marking it used.
    pub fn peek(&self, home: &Ipv6Addr) -> Option<BindingCacheEntry> {
        self.table.read().get(home).map(CacheRecord::snapshot)
    }

    /// Kind of the binding for `home`, if any.
    pub fn exists(&self, home: &Ipv6Addr) -> Option<BindingKind> {
        self.table.read().get(home).map(|r| r.entry.kind)
    }

    /// Delete the binding for `home` if its kind is in `mask`.
    pub fn delete(
        &self,
        home: &Ipv6Addr,
        mask: KindMask,
    ) -> Result<BindingCacheEntry, BindingCacheError> {
        self.remove(home, mask, None)?
            .ok_or(BindingCacheError::NotFound { home: *home })
    }

    /// Apply a deregistration carrying `sequence`.
    ///
    /// Like [`BindingCache::delete`], but a sequence number that is not newer
    /// than the stored one leaves the binding in place and returns `Ok(None)`.
    pub fn deregister(
        &self,
        home: &Ipv6Addr,
        mask: KindMask,
        sequence: SequenceNumber,
    ) -> Result<Option<BindingCacheEntry>, BindingCacheError> {
        self.remove(home, mask, Some(sequence))
    }

    /// Expire due entries and collect refresh requests.
    ///
    /// Called from the deferred timer context. Expired home registrations
    /// have their resources released after the table lock is dropped.
    pub fn on_timer(&self) -> CacheSweep {
        let now = self.clock.now();
        let window = self.config.refresh_window_ms;
        let _guard = self.reconfigure.lock();

        let mut expired = Vec::new();
        let mut refresh_requests = Vec::new();

        let next_deadline = {
            let mut table = self.table.write();
            table.iterate(|_, order, record| {
                if *order > now {
                    return IterAction::Stop;
                }
                if record.entry.expiry <= now {
                    expired.push(record.snapshot());
                    return IterAction::DeleteCurrent;
                }
                if record
                    .entry
                    .refresh_request_deadline
                    .is_some_and(|deadline| deadline <= now)
                {
                    let recently_used =
                        now.saturating_since(record.last_used()).as_millis() < u128::from(window);
                    // Only soft entries solicit a refresh; home registrations
                    // are renewed by the mobile node on its own schedule.
                    if record.entry.kind == BindingKind::Cache && recently_used {
                        refresh_requests.push(RefreshRequest {
                            src: record.entry.anchor_addr,
                            dst: record.entry.home_addr,
                            care_of_addr: record.entry.care_of_addr,
                        });
                    }
                    record.entry.refresh_request_deadline = None;
                }
                *order = record.entry.next_event();
                IterAction::Continue
            });
            table.next_deadline()
        };
        self.timer.arm(next_deadline);

        for entry in &expired {
            if entry.kind == BindingKind::HomeRegistration {
                self.teardown(entry);
            }
            debug!(home = %entry.home_addr, kind = %entry.kind, "Binding expired");
        }
        self.stats
            .expired
            .fetch_add(expired.len() as u64, Ordering::Relaxed);

        CacheSweep {
            expired: expired.into_iter().map(|e| e.home_addr).collect(),
            refresh_requests,
            next_deadline,
        }
    }

    /// Remove every binding, releasing all home registration resources.
    pub fn flush(&self) -> usize {
        let _guard = self.reconfigure.lock();
        let drained = self.table.write().drain();
        self.timer.arm(None);

        for (_, _, record) in &drained {
            if record.entry.kind == BindingKind::HomeRegistration {
                self.teardown(&record.entry);
            }
        }
        info!(count = drained.len(), "Binding cache flushed");
        drained.len()
    }

    /// All bindings, soonest event first.
    pub fn snapshot(&self) -> Vec<BindingCacheEntry> {
        self.table
            .read()
            .iter()
            .map(|(_, _, record)| record.snapshot())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.table.read().next_deadline()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    fn remove(
        &self,
        home: &Ipv6Addr,
        mask: KindMask,
        sequence: Option<SequenceNumber>,
    ) -> Result<Option<BindingCacheEntry>, BindingCacheError> {
        let _guard = self.reconfigure.lock();

        let (removed, next) = {
            let mut table = self.table.write();
            let (kind, stored) = table
                .get(home)
                .map(|r| (r.entry.kind, r.entry.sequence))
                .ok_or(BindingCacheError::NotFound { home: *home })?;
            if !mask.contains(kind) {
                return Err(BindingCacheError::KindMismatch {
                    home: *home,
                    actual: kind,
                });
            }
            if let Some(received) = sequence.filter(|seq| !seq.is_newer_than(stored)) {
                self.stats.stale.fetch_add(1, Ordering::Relaxed);
                debug!(
                    home = %home,
                    stored = %stored,
                    received = %received,
                    "Ignoring stale deregistration"
                );
                return Ok(None);
            }
            let removed = table
                .delete(home)
                .map(|r| r.snapshot())
                .ok_or(BindingCacheError::NotFound { home: *home })?;
            (removed, table.next_deadline())
        };
        self.timer.arm(next);

        if removed.kind == BindingKind::HomeRegistration {
            self.teardown(&removed);
        }
        self.stats.deleted.fetch_add(1, Ordering::Relaxed);
        debug!(home = %home, kind = %removed.kind, "Deleted binding");
        Ok(Some(removed))
    }

    fn build_entry(&self, update: &CacheUpdate, now: Timestamp) -> BindingCacheEntry {
        let lifetime_ms = u64::from(update.lifetime) * 1_000;
        let expiry = now.add_millis(lifetime_ms);
        let refresh_request_deadline = (update.kind != BindingKind::Temporary
            && lifetime_ms > self.config.refresh_lead_ms)
            .then(|| expiry.sub_millis(self.config.refresh_lead_ms));

        BindingCacheEntry {
            home_addr: update.home_addr,
            care_of_addr: update.care_of_addr,
            anchor_addr: update.anchor_addr,
            ifindex: update.ifindex,
            prefix_len: update.prefix_len,
            single_address: update.single_address,
            kind: update.kind,
            sequence: update.sequence,
            expiry,
            refresh_request_deadline,
            last_used: now,
        }
    }

    fn create(&self, entry: BindingCacheEntry) -> Result<CacheAddOutcome, BindingCacheError> {
        let home = entry.home_addr;
        let capacity = self.config.capacity;

        let victim = {
            let table = self.table.read();
            if !table.is_full() {
                None
            } else if entry.kind == BindingKind::HomeRegistration {
                match eviction_victim(&table) {
                    Some(victim) => Some(victim),
                    None => return Err(BindingCacheError::Full { capacity }),
                }
            } else {
                return Err(BindingCacheError::Full { capacity });
            }
        };

        if entry.kind == BindingKind::HomeRegistration {
            self.setup(&entry)?;
        }

        let inserted = {
            let mut table = self.table.write();
            if let Some(victim) = victim {
                if table.delete(&victim).is_some() {
                    self.stats.evicted.fetch_add(1, Ordering::Relaxed);
                    info!(evicted = %victim, for_home = %home, "Evicted cache entry for home registration");
                }
            }
            let order = entry.next_event();
            table
                .add(home, order, CacheRecord::new(entry.clone()))
                .map(|()| table.next_deadline())
        };

        match inserted {
            Ok(next) => {
                self.timer.arm(next);
                self.stats.created.fetch_add(1, Ordering::Relaxed);
                debug!(
                    home = %home,
                    coa = %entry.care_of_addr,
                    kind = %entry.kind,
                    seq = %entry.sequence,
                    "Created binding"
                );
                Ok(CacheAddOutcome::Created)
            }
            Err(_) => {
                if entry.kind == BindingKind::HomeRegistration {
                    self.teardown(&entry);
                }
                Err(BindingCacheError::Full { capacity })
            }
        }
    }

    fn update_existing(
        &self,
        current: BindingCacheEntry,
        mut candidate: BindingCacheEntry,
    ) -> Result<CacheAddOutcome, BindingCacheError> {
        let home = current.home_addr;
        if !candidate.sequence.is_newer_than(current.sequence) {
            self.stats.stale.fetch_add(1, Ordering::Relaxed);
            debug!(
                home = %home,
                stored = %current.sequence,
                received = %candidate.sequence,
                "Ignoring stale binding update"
            );
            return Ok(CacheAddOutcome::Unchanged);
        }
        candidate.last_used = current.last_used;

        let was_home = current.kind == BindingKind::HomeRegistration;
        let is_home = candidate.kind == BindingKind::HomeRegistration;
        let resources_change =
            was_home != is_home || (was_home && current.tunnel_fields_differ(&candidate));

        if resources_change {
            let switched = match (was_home, is_home) {
                (true, true) => self.handover(&current, &candidate),
                (true, false) => {
                    self.teardown(&current);
                    Ok(())
                }
                _ => self.setup(&candidate),
            };
            if let Err(err) = switched {
                warn!(home = %home, error = %err, "Binding update rolled back");
                return Err(err.into());
            }
        }

        let next = {
            let mut table = self.table.write();
            let order = candidate.next_event();
            match table.get_mut(&home) {
                Some(record) => {
                    *record = CacheRecord::new(candidate.clone());
                    table.reschedule(&home, order);
                }
                None => {
                    // Serialised by `reconfigure`; only reachable if the table
                    // was cleared underneath us.
                    let _ = table.add(home, order, CacheRecord::new(candidate.clone()));
                }
            }
            table.next_deadline()
        };
        self.timer.arm(next);
        self.stats.updated.fetch_add(1, Ordering::Relaxed);
        debug!(
            home = %home,
            coa = %candidate.care_of_addr,
            kind = %candidate.kind,
            seq = %candidate.sequence,
            resources_changed = resources_change,
            "Updated binding"
        );
        Ok(CacheAddOutcome::Updated)
    }

    /// Tunnel, route, then address defense; unwound in reverse on failure.
    fn setup(&self, entry: &BindingCacheEntry) -> Result<(), ResourceError> {
        let prefix_len = route_prefix(entry);
        self.tunnels
            .create_tunnel(entry.care_of_addr, entry.anchor_addr)?;
        if let Err(err) = self.tunnels.add_route(
            entry.home_addr,
            prefix_len,
            entry.care_of_addr,
            entry.anchor_addr,
        ) {
            self.tunnels
                .destroy_tunnel(entry.care_of_addr, entry.anchor_addr);
            return Err(err);
        }
        if let Err(err) = self.defense.defend(entry.home_addr, prefix_len) {
            self.tunnels.remove_route(
                entry.home_addr,
                prefix_len,
                entry.care_of_addr,
                entry.anchor_addr,
            );
            self.tunnels
                .destroy_tunnel(entry.care_of_addr, entry.anchor_addr);
            return Err(err);
        }
        Ok(())
    }

    /// Move a home registration's resources from `current` to `candidate`.
    ///
    /// The new tunnel, route and defense are in place before the old ones are
    /// released; pieces that did not change are left alone. On failure the
    /// partial new setup is unwound and `current` is untouched.
    fn handover(
        &self,
        current: &BindingCacheEntry,
        candidate: &BindingCacheEntry,
    ) -> Result<(), ResourceError> {
        let (old_prefix, new_prefix) = (route_prefix(current), route_prefix(candidate));
        let tunnel_moves = (current.care_of_addr, current.anchor_addr)
            != (candidate.care_of_addr, candidate.anchor_addr);
        let defense_moves = old_prefix != new_prefix;
        let route_moves = tunnel_moves || defense_moves;

        if tunnel_moves {
            self.tunnels
                .create_tunnel(candidate.care_of_addr, candidate.anchor_addr)?;
        }
        if route_moves {
            if let Err(err) = self.tunnels.add_route(
                candidate.home_addr,
                new_prefix,
                candidate.care_of_addr,
                candidate.anchor_addr,
            ) {
                if tunnel_moves {
                    self.tunnels
                        .destroy_tunnel(candidate.care_of_addr, candidate.anchor_addr);
                }
                return Err(err);
            }
        }
        if defense_moves {
            if let Err(err) = self.defense.defend(candidate.home_addr, new_prefix) {
                self.tunnels.remove_route(
                    candidate.home_addr,
                    new_prefix,
                    candidate.care_of_addr,
                    candidate.anchor_addr,
                );
                if tunnel_moves {
                    self.tunnels
                        .destroy_tunnel(candidate.care_of_addr, candidate.anchor_addr);
                }
                return Err(err);
            }
            self.defense.withdraw(current.home_addr, old_prefix);
        }
        if route_moves {
            self.tunnels.remove_route(
                current.home_addr,
                old_prefix,
                current.care_of_addr,
                current.anchor_addr,
            );
        }
        if tunnel_moves {
            self.tunnels
                .destroy_tunnel(current.care_of_addr, current.anchor_addr);
        }
        Ok(())
    }

    fn teardown(&self, entry: &BindingCacheEntry) {
        let prefix_len = route_prefix(entry);
        self.defense.withdraw(entry.home_addr, prefix_len);
        self.tunnels.remove_route(
            entry.home_addr,
            prefix_len,
            entry.care_of_addr,
            entry.anchor_addr,
        );
        self.tunnels
            .destroy_tunnel(entry.care_of_addr, entry.anchor_addr);
    }
}

/// A single-address registration covers only the home address itself.
fn route_prefix(entry: &BindingCacheEntry) -> u8 {
    if entry.single_address {
        128
    } else {
        entry.prefix_len
    }
}

/// The `Cache`-kind entry with the smallest expiry.
fn eviction_victim(table: &CacheTable) -> Option<Ipv6Addr> {
    table
        .iter()
        .filter(|(_, _, record)| record.entry.kind == BindingKind::Cache)
        .min_by_key(|(_, _, record)| record.entry.expiry)
        .map(|(home, _, _)| *home)
}
