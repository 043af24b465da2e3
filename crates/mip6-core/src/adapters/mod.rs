//! # Adapters
//!
//! Concrete implementations of the outbound ports.
//!
//! - **wire_codec**: destination-option encoding of mobility options
//! - **logging**: tunnel, defense and transmit adapters that only log
//! - **clock**, **tokio_timer**, **runtime**: tokio time base, deadline
//!   timers and the worker event loop (feature `runtime`)

pub mod logging;
pub mod wire_codec;

#[cfg(feature = "runtime")]
pub mod clock;
#[cfg(feature = "runtime")]
pub mod runtime;
#[cfg(feature = "runtime")]
pub mod tokio_timer;

pub use logging::*;
pub use wire_codec::*;

#[cfg(feature = "runtime")]
pub use clock::TokioClock;
#[cfg(feature = "runtime")]
pub use runtime::{HostPorts, MobilityRuntime};
#[cfg(feature = "runtime")]
pub use tokio_timer::{TimerEvent, TokioDeadlineTimer};
