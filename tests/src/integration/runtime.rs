//! # Runtime Tests
//!
//! Two [`MobilityRuntime`]s on one paused tokio clock, a mobile node and its
//! home agent. Nothing calls `on_timer` by hand: retransmissions, refreshes
//! and expiry all come from the runtime's own timers.
//!
//! [`MobilityRuntime`]: mip6_core::MobilityRuntime

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use mip6_core::test_utils::{
        addr, FixedSizeCodec, LoopbackTransmitter, RecordingDefense, RecordingTunnels, SentCarrier,
    };
    use mip6_core::{
        AckOutcome, BindingReceiver, HostPorts, IncomingUpdate, LedgerFlags, LedgerState,
        MobileNodeApi, MobilityConfig, MobilityOption, MobilityRuntime, OutgoingUpdate,
        ReceivedAck,
    };

    const HOME: u16 = 1;
    const HOME_AGENT: u16 = 0xa;
    const CARE_OF: u16 = 100;

    struct Node {
        runtime: MobilityRuntime,
        tunnels: Arc<RecordingTunnels>,
        transmitter: Arc<LoopbackTransmitter>,
        seen: usize,
    }

    impl Node {
        fn start() -> Self {
            let tunnels = Arc::new(RecordingTunnels::default());
            let transmitter = Arc::new(LoopbackTransmitter::new(256));
            let host = HostPorts {
                tunnels: tunnels.clone(),
                defense: Arc::new(RecordingDefense::default()),
                codec: Arc::new(FixedSizeCodec),
                transmitter: transmitter.clone(),
                authenticator: None,
            };
            let runtime = MobilityRuntime::start(MobilityConfig::default(), host).unwrap();
            transmitter.attach(runtime.core().scheduler());
            Self {
                runtime,
                tunnels,
                transmitter,
                seen: 0,
            }
        }

        /// Options carried since the last call.
        fn take_new(&mut self) -> Vec<(SentCarrier, MobilityOption)> {
            let sent = self.transmitter.sent();
            let fresh = sent[self.seen..].to_vec();
            self.seen = sent.len();
            fresh
                .into_iter()
                .flat_map(|carrier| {
                    FixedSizeCodec::decode(&carrier.bytes)
                        .into_iter()
                        .map(move |option| (carrier.clone(), option))
                })
                .collect()
        }
    }

    /// Deliver everything each side has sent to the other.
    fn pump(mn: &mut Node, ha: &mut Node) -> Vec<AckOutcome> {
        for (carrier, option) in mn.take_new() {
            if let MobilityOption::Update(update) = option {
                ha.runtime
                    .core()
                    .receive_binding_update(IncomingUpdate {
                        ifindex: 1,
                        anchor_addr: carrier.dst,
                        home_addr: addr(HOME),
                        care_of_addr: carrier.src,
                        update,
                    })
                    .unwrap();
            }
        }
        ha.take_new()
            .into_iter()
            .filter_map(|(carrier, option)| match option {
                MobilityOption::Ack(ack) => Some(mn.runtime.core().receive_binding_ack(
                    ReceivedAck {
                        peer_addr: carrier.src,
                        sequence: ack.sequence,
                        status: ack.status,
                        lifetime: ack.lifetime,
                        refresh: ack.refresh,
                    },
                )),
                _ => None,
            })
            .collect()
    }

    fn register(lifetime: u32) -> OutgoingUpdate {
        OutgoingUpdate {
            peer_addr: addr(HOME_AGENT),
            home_addr: addr(HOME),
            care_of_addr: addr(CARE_OF),
            lifetime,
            prefix_len: 64,
            flags: LedgerFlags::ACK_REQUIRED | LedgerFlags::HOME_REGISTRATION,
        }
    }

    async fn tick(millis: u64) {
        tokio::time::sleep(Duration::from_millis(millis)).await;
        tokio::task::yield_now().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_registration_is_kept_alive_by_refresh() {
        crate::init_test_logging();
        let mut mn = Node::start();
        let mut ha = Node::start();

        mn.runtime.core().send_binding_update(register(30)).unwrap();
        assert_eq!(pump(&mut mn, &mut ha), vec![AckOutcome::Accepted]);
        assert!(ha.tunnels.tunnel_exists(addr(CARE_OF), addr(HOME_AGENT)));

        // Three lifetimes, with the relay running the whole time.
        let mut accepted = 0;
        for _ in 0..180 {
            tick(500).await;
            accepted += pump(&mut mn, &mut ha)
                .iter()
                .filter(|o| **o == AckOutcome::Accepted)
                .count();
        }

        assert!(accepted >= 3, "only {accepted} refreshes acknowledged");
        assert!(ha.runtime.core().lookup_binding(&addr(HOME)).is_some());
        let entry = mn.runtime.core().ledger().get(&addr(HOME_AGENT)).unwrap();
        assert_eq!(entry.state, LedgerState::Acknowledged);

        mn.runtime.shutdown().await;
        ha.runtime.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_binding_lapses_when_mobile_node_goes_silent() {
        crate::init_test_logging();
        let mut mn = Node::start();
        let mut ha = Node::start();

        mn.runtime.core().send_binding_update(register(10)).unwrap();
        assert_eq!(pump(&mut mn, &mut ha), vec![AckOutcome::Accepted]);

        // The mobile node stops; its refreshes never reach the home agent.
        mn.runtime.shutdown().await;
        tick(11_000).await;

        assert!(ha.runtime.core().cache().is_empty());
        assert!(!ha.tunnels.tunnel_exists(addr(CARE_OF), addr(HOME_AGENT)));
        assert!(!ha.tunnels.route_exists(addr(HOME)));

        let report = ha.runtime.shutdown().await;
        assert_eq!(report.bindings, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_first_update_recovered_by_runtime_retransmit() {
        crate::init_test_logging();
        let mut mn = Node::start();
        let mut ha = Node::start();

        mn.runtime.core().send_binding_update(register(60)).unwrap();
        // Lose the first carrier on the way.
        assert_eq!(mn.take_new().len(), 1);

        tick(1_100).await;
        assert_eq!(pump(&mut mn, &mut ha), vec![AckOutcome::Accepted]);
        assert!(ha.tunnels.tunnel_exists(addr(CARE_OF), addr(HOME_AGENT)));

        // No further retransmissions once acknowledged.
        let before = mn.transmitter.sent().len();
        tick(5_000).await;
        assert_eq!(mn.transmitter.sent().len(), before);

        mn.runtime.shutdown().await;
        ha.runtime.shutdown().await;
    }
}
