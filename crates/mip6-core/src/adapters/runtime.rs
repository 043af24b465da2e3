//! # Timer Runtime
//!
//! Event loop that drives a [`MobilityCore`] on tokio: one
//! [`TokioDeadlineTimer`] per table feeding a single worker task, which runs
//! the table's expiry handler. Table processing is serialised through that
//! one worker; API calls from the host run concurrently on their own threads.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::{ConfigError, MobilityConfig};
use crate::ports::{AddressDefense, Authenticator, CarrierTransmitter, OptionCodec, TunnelManager};
use crate::service::{MobilityCore, MobilityPorts, ShutdownReport, TableId, TableTimers};

use super::clock::TokioClock;
use super::tokio_timer::{TimerEvent, TokioDeadlineTimer};

/// Host collaborators. The runtime supplies the clock and timers.
#[derive(Clone)]
pub struct HostPorts {
    pub tunnels: Arc<dyn TunnelManager>,
    pub defense: Arc<dyn AddressDefense>,
    pub codec: Arc<dyn OptionCodec>,
    pub transmitter: Arc<dyn CarrierTransmitter>,
    pub authenticator: Option<Arc<dyn Authenticator>>,
}

/// A running mobility core.
pub struct MobilityRuntime {
    core: Arc<MobilityCore>,
    clock: TokioClock,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl MobilityRuntime {
    /// Build the core and spawn its timer tasks and worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: MobilityConfig, host: HostPorts) -> Result<Self, ConfigError> {
        let clock = TokioClock::new();
        let (shutdown, shutdown_rx) = watch::channel(false);
        // A timer never has more than one event in flight.
        let (events_tx, events_rx) = mpsc::channel(TableId::ALL.len());

        let mut tasks = Vec::with_capacity(TableId::ALL.len() + 1);
        let mut timer = |table| {
            let (timer, handle) =
                TokioDeadlineTimer::spawn(table, clock, events_tx.clone(), shutdown_rx.clone());
            tasks.push(handle);
            Arc::new(timer)
        };
        let timers = TableTimers {
            cache: timer(TableId::Cache),
            ledger: timer(TableId::Ledger),
            scheduler: timer(TableId::Scheduler),
        };
        let ports = MobilityPorts {
            tunnels: host.tunnels,
            defense: host.defense,
            codec: host.codec,
            transmitter: host.transmitter,
            clock: Arc::new(clock),
            authenticator: host.authenticator,
        };

        let core = Arc::new(MobilityCore::new(config, ports, timers)?);
        tasks.push(tokio::spawn(run_worker(
            core.clone(),
            events_rx,
            shutdown_rx,
        )));

        info!(
            cache_capacity = core.config().cache.capacity,
            ledger_capacity = core.config().ledger.capacity,
            scheduler_capacity = core.config().scheduler.capacity,
            "Mobility runtime started"
        );
        Ok(Self {
            core,
            clock,
            shutdown,
            tasks,
        })
    }

    pub fn core(&self) -> &Arc<MobilityCore> {
        &self.core
    }

    pub fn clock(&self) -> TokioClock {
        self.clock
    }

    /// Stop the timers and the worker, then flush every table.
    pub async fn shutdown(self) -> ShutdownReport {
        self.shutdown.send_replace(true);
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "Runtime task ended abnormally");
            }
        }
        let report = self.core.shutdown();
        info!(
            bindings = report.bindings,
            ledger_entries = report.ledger_entries,
            queued_options = report.queued_options,
            "Mobility runtime stopped"
        );
        report
    }
}

async fn run_worker(
    core: Arc<MobilityCore>,
    mut events: mpsc::Receiver<TimerEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            event = events.recv() => match event {
                Some(event) => {
                    debug!(table = %event.table, deadline = %event.deadline, "Processing timer event");
                    core.on_timer(event.table);
                }
                None => break,
            },
        }
    }
    debug!("Timer worker stopped");
}
