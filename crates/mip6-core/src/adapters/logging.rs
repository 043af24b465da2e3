//! Host adapters that only log.
//!
//! Useful for dry runs and the demo binary: every tunnel, route and
//! defense request succeeds, and every carrier is drained from the
//! scheduler and logged instead of sent.

use std::fmt::Write as _;
use std::net::Ipv6Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use tracing::{info, warn};

use crate::domain::ResourceError;
use crate::ports::{AddressDefense, CarrierTransmitter, TransmitError, TunnelManager};
use crate::service::OptionScheduler;

#[derive(Debug, Default)]
pub struct LoggingTunnels;

impl TunnelManager for LoggingTunnels {
    fn create_tunnel(&self, remote: Ipv6Addr, local: Ipv6Addr) -> Result<(), ResourceError> {
        info!(remote = %remote, local = %local, "Tunnel up");
        Ok(())
    }

    fn destroy_tunnel(&self, remote: Ipv6Addr, local: Ipv6Addr) {
        info!(remote = %remote, local = %local, "Tunnel down");
    }

    fn add_route(
        &self,
        dest: Ipv6Addr,
        prefix_len: u8,
        via: Ipv6Addr,
        from: Ipv6Addr,
    ) -> Result<(), ResourceError> {
        info!(dest = %dest, prefix_len, via = %via, from = %from, "Route added");
        Ok(())
    }

    fn remove_route(&self, dest: Ipv6Addr, prefix_len: u8, via: Ipv6Addr, from: Ipv6Addr) {
        info!(dest = %dest, prefix_len, via = %via, from = %from, "Route removed");
    }
}

#[derive(Debug, Default)]
pub struct LoggingDefense;

impl AddressDefense for LoggingDefense {
    fn defend(&self, addr: Ipv6Addr, prefix_len: u8) -> Result<(), ResourceError> {
        info!(addr = %addr, prefix_len, "Defending address");
        Ok(())
    }

    fn withdraw(&self, addr: Ipv6Addr, prefix_len: u8) {
        info!(addr = %addr, prefix_len, "Address defense withdrawn");
    }
}

/// Drains the scheduler into a message of `budget` option bytes per carrier
/// and logs the result as hex.
#[derive(Debug)]
pub struct LoggingTransmitter {
    budget: usize,
    scheduler: OnceLock<Weak<OptionScheduler>>,
    carriers: AtomicU64,
}

impl LoggingTransmitter {
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            scheduler: OnceLock::new(),
            carriers: AtomicU64::new(0),
        }
    }

    /// Bind to the scheduler this transmitter drains. Later calls are ignored.
    pub fn attach(&self, scheduler: &Arc<OptionScheduler>) {
        if self.scheduler.set(Arc::downgrade(scheduler)).is_err() {
            warn!("Transmitter already attached");
        }
    }

    pub fn carriers(&self) -> u64 {
        self.carriers.load(Ordering::Relaxed)
    }
}

impl CarrierTransmitter for LoggingTransmitter {
    fn send_carrier(&self, src: Ipv6Addr, dst: Ipv6Addr) -> Result<(), TransmitError> {
        let scheduler = self
            .scheduler
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| TransmitError::Failed("scheduler not attached".into()))?;

        let drained = scheduler.drain_for(src, dst, self.budget);
        self.carriers.fetch_add(1, Ordering::Relaxed);
        info!(
            src = %src,
            dst = %dst,
            kinds = ?drained.kinds,
            bytes = %hex(&drained.bytes),
            "Carrier sent"
        );
        Ok(())
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
