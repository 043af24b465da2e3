//! Dry run of the mobility core with logging adapters.
//!
//! Plays both roles on one node: accepts a home registration from a mobile
//! node, registers with its own home agent and a correspondent, lets a
//! retransmission happen, then acknowledges and shuts down.
//!
//! Usage: `mip6-demo [config.toml]`. Log level via `RUST_LOG`.

use std::net::Ipv6Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mip6_core::adapters::{DestinationOptionCodec, LoggingDefense, LoggingTransmitter, LoggingTunnels};
use mip6_core::{
    AckStatus, BindingReceiver, HostPorts, IncomingUpdate, LedgerFlags, MobileNodeApi,
    MobilityConfig, MobilityRuntime, OutgoingUpdate, ReceivedAck, SequenceNumber, UpdateOption,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Room for options in one demo message.
const CARRIER_BUDGET: usize = 256;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => match MobilityConfig::from_file(&path) {
            Ok(config) => config,
            Err(err) => {
                error!(path = %path.display(), error = %err, "Invalid configuration");
                std::process::exit(2);
            }
        },
        None => MobilityConfig::default(),
    };

    let transmitter = Arc::new(LoggingTransmitter::new(CARRIER_BUDGET));
    let host = HostPorts {
        tunnels: Arc::new(LoggingTunnels),
        defense: Arc::new(LoggingDefense),
        codec: Arc::new(DestinationOptionCodec),
        transmitter: transmitter.clone(),
        authenticator: None,
    };
    let runtime = match MobilityRuntime::start(config, host) {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "Failed to start");
            std::process::exit(2);
        }
    };
    transmitter.attach(runtime.core().scheduler());
    let core = runtime.core().clone();

    let node = |n: u16| Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, n);
    let home_agent = node(0xa);
    let correspondent = node(0xc);
    let home = node(1);
    let care_of = node(0x100);

    // Home agent role.
    let incoming = IncomingUpdate {
        ifindex: 1,
        anchor_addr: home_agent,
        home_addr: node(2),
        care_of_addr: node(0x200),
        update: UpdateOption {
            sequence: SequenceNumber(1),
            lifetime: 30,
            flags: LedgerFlags::ACK_REQUIRED | LedgerFlags::HOME_REGISTRATION,
            prefix_len: 64,
            sub_options: Vec::new(),
        },
    };
    match core.receive_binding_update(incoming) {
        Ok(status) => info!(status = status.0, "Home registration answered"),
        Err(err) => error!(error = %err, "Home registration failed"),
    }

    // Mobile node role.
    let registration = OutgoingUpdate {
        peer_addr: home_agent,
        home_addr: home,
        care_of_addr: care_of,
        lifetime: 60,
        prefix_len: 64,
        flags: LedgerFlags::ACK_REQUIRED | LedgerFlags::HOME_REGISTRATION,
    };
    let route_optimisation = OutgoingUpdate {
        peer_addr: correspondent,
        flags: LedgerFlags::NONE,
        ..registration.clone()
    };
    for update in [registration, route_optimisation] {
        if let Err(err) = core.send_binding_update(update) {
            error!(error = %err, "Binding update not sent");
        }
    }

    // Let the first retransmission and the coalesced correspondent update go out.
    tokio::time::sleep(Duration::from_millis(1_500)).await;

    if let Some(entry) = core.ledger().get(&home_agent) {
        let outcome = core.receive_binding_ack(ReceivedAck {
            peer_addr: home_agent,
            sequence: entry.sequence,
            status: AckStatus::ACCEPTED,
            lifetime: 60,
            refresh: 40,
        });
        info!(outcome = ?outcome, "Acknowledgement applied");
    }

    tokio::time::sleep(Duration::from_millis(500)).await;

    let report = runtime.shutdown().await;
    info!(
        carriers = transmitter.carriers(),
        bindings = report.bindings,
        ledger_entries = report.ledger_entries,
        queued_options = report.queued_options,
        "Demo finished"
    );
}
