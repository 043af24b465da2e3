//! Tokio-backed deadline timers.
//!
//! Arming is a `watch` update; a background task sleeps until the latest
//! armed deadline and then posts a [`TimerEvent`] to the worker queue. After
//! firing, the task waits for the table to re-arm before sleeping again, so
//! each timer has at most one event in flight.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace};

use crate::domain::Timestamp;
use crate::ports::DeadlineTimer;
use crate::service::TableId;

use super::clock::TokioClock;

/// A table's deadline passed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerEvent {
    pub table: TableId,
    pub deadline: Timestamp,
}

/// [`DeadlineTimer`] driving one table.
#[derive(Debug)]
pub struct TokioDeadlineTimer {
    table: TableId,
    armed: watch::Sender<Option<Timestamp>>,
}

impl TokioDeadlineTimer {
    /// Create the timer and spawn its task on the current runtime.
    ///
    /// The task ends when `shutdown` changes, when the worker queue closes,
    /// or when the timer is dropped.
    pub fn spawn(
        table: TableId,
        clock: TokioClock,
        events: mpsc::Sender<TimerEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, JoinHandle<()>) {
        let (armed, armed_rx) = watch::channel(None);
        let handle = tokio::spawn(run_timer(table, clock, armed_rx, events, shutdown));
        (Self { table, armed }, handle)
    }

    pub fn table(&self) -> TableId {
        self.table
    }

    /// Currently armed deadline.
    pub fn deadline(&self) -> Option<Timestamp> {
        *self.armed.borrow()
    }
}

impl DeadlineTimer for TokioDeadlineTimer {
    fn arm(&self, deadline: Option<Timestamp>) {
        // Always notifies, even for an unchanged deadline: that is how a
        // fired timer learns its table has been processed.
        self.armed.send_replace(deadline);
    }
}

async fn run_timer(
    table: TableId,
    clock: TokioClock,
    mut armed: watch::Receiver<Option<Timestamp>>,
    events: mpsc::Sender<TimerEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let deadline = *armed.borrow_and_update();
        let wake = deadline.map(|at| clock.instant_at(at));

        tokio::select! {
            _ = shutdown.changed() => break,
            changed = armed.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = sleep_until(wake.unwrap_or_else(Instant::now)), if wake.is_some() => {
                let Some(deadline) = deadline else { continue };
                trace!(table = %table, deadline = %deadline, "Timer fired");
                if events.send(TimerEvent { table, deadline }).await.is_err() {
                    break;
                }
                tokio::select! {
                    _ = shutdown.changed() => break,
                    changed = armed.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
    debug!(table = %table, "Timer task stopped");
}
