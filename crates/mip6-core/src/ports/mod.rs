//! # Ports Layer
//!
//! Hexagonal architecture boundaries.
//!
//! - **Inbound (API)**: what the host's packet path calls into.
//! - **Outbound (SPI)**: tunnels, address defense, wire codec, transmit path,
//!   clock and timers, all supplied by the host.

pub mod inbound;
pub mod outbound;

pub use inbound::*;
pub use outbound::*;
