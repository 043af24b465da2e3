//! Monotonic clock on tokio's time base.
//!
//! Timestamps count milliseconds since the clock was created. Using tokio's
//! `Instant` keeps the clock and the deadline timers in step, including
//! under a paused test runtime.

use std::time::Duration;

use tokio::time::Instant;

use crate::domain::Timestamp;
use crate::ports::TimeSource;

#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    epoch: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// The tokio instant a timestamp of this clock refers to.
    pub fn instant_at(&self, at: Timestamp) -> Instant {
        self.epoch + Duration::from_millis(at.as_millis())
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for TokioClock {
    fn now(&self) -> Timestamp {
        let elapsed = self.epoch.elapsed().as_millis();
        Timestamp::from_millis(u64::try_from(elapsed).unwrap_or(u64::MAX))
    }
}
