//! # Mobile Node ↔ Home Agent Flows
//!
//! Two cores, each with its own recording ports and manual clock. Carriers
//! drained on one side are decoded and handed to the other side's inbound
//! API, so every exchange goes through the real option scheduler.
//!
//! ## Flows Tested:
//!
//! 1. Home registration round trip and the refresh before it lapses
//! 2. Handover to a new care-of address
//! 3. Deregistration tearing down both sides
//! 4. Lost update recovered by retransmission with a fresh sequence number
//! 5. Route optimisation with a correspondent, including its refresh request

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use mip6_core::test_utils::{addr, CoreHarness, FixedSizeCodec, SentCarrier, TunnelEvent};
    use mip6_core::{
        AckOutcome, AckStatus, BindingKind, BindingReceiver, IncomingUpdate, LedgerCallback,
        LedgerFlags, LedgerState, MobileNodeApi, MobilityOption, OptionKind, OutgoingUpdate,
        ReceivedAck, SequenceNumber, TableId, TimeSource,
    };

    const HOME: u16 = 1;
    const HOME_AGENT: u16 = 0xa;
    const CORRESPONDENT: u16 = 0xc;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    /// Binding updates in a carrier, as the receiving node sees them.
    fn incoming_updates(carrier: &SentCarrier) -> Vec<IncomingUpdate> {
        FixedSizeCodec::decode(&carrier.bytes)
            .into_iter()
            .filter_map(|option| match option {
                MobilityOption::Update(update) => Some(IncomingUpdate {
                    ifindex: 1,
                    anchor_addr: carrier.dst,
                    home_addr: addr(HOME),
                    care_of_addr: carrier.src,
                    update,
                }),
                _ => None,
            })
            .collect()
    }

    /// Binding acknowledgements in a carrier.
    fn received_acks(carrier: &SentCarrier) -> Vec<ReceivedAck> {
        FixedSizeCodec::decode(&carrier.bytes)
            .into_iter()
            .filter_map(|option| match option {
                MobilityOption::Ack(ack) => Some(ReceivedAck {
                    peer_addr: carrier.src,
                    sequence: ack.sequence,
                    status: ack.status,
                    lifetime: ack.lifetime,
                    refresh: ack.refresh,
                }),
                _ => None,
            })
            .collect()
    }

    /// A mobile node and the node it registers with.
    struct Exchange {
        mn: CoreHarness,
        peer: CoreHarness,
        mn_seen: usize,
        peer_seen: usize,
    }

    impl Exchange {
        fn new() -> Self {
            crate::init_test_logging();
            Self {
                mn: CoreHarness::new(),
                peer: CoreHarness::new(),
                mn_seen: 0,
                peer_seen: 0,
            }
        }

        /// Deliver everything sent since the last call, both directions.
        fn pump(&mut self) -> (Vec<AckStatus>, Vec<AckOutcome>) {
            let sent = self.mn.transmitter.sent();
            let statuses = sent[self.mn_seen..]
                .iter()
                .flat_map(incoming_updates)
                .map(|incoming| self.peer.core.receive_binding_update(incoming).unwrap())
                .collect();
            self.mn_seen = sent.len();

            let answered = self.peer.transmitter.sent();
            let outcomes = answered[self.peer_seen..]
                .iter()
                .flat_map(received_acks)
                .map(|ack| self.mn.core.receive_binding_ack(ack))
                .collect();
            self.peer_seen = answered.len();

            (statuses, outcomes)
        }

        /// Lose whatever the mobile node has sent so far.
        fn drop_in_flight(&mut self) {
            self.mn_seen = self.mn.transmitter.sent().len();
        }

        fn advance_millis(&self, millis: u64) {
            self.mn.clock.advance_millis(millis);
            self.peer.clock.advance_millis(millis);
        }

        fn register(&mut self, coa: u16, lifetime: u32) -> SequenceNumber {
            self.mn
                .core
                .send_binding_update(registration(coa, lifetime))
                .unwrap()
        }
    }

    fn registration(coa: u16, lifetime: u32) -> OutgoingUpdate {
        OutgoingUpdate {
            peer_addr: addr(HOME_AGENT),
            home_addr: addr(HOME),
            care_of_addr: addr(coa),
            lifetime,
            prefix_len: 64,
            flags: LedgerFlags::ACK_REQUIRED | LedgerFlags::HOME_REGISTRATION,
        }
    }

    fn home_agent_tunnel(ex: &Exchange, coa: u16) -> bool {
        ex.peer.tunnels.tunnel_exists(addr(coa), addr(HOME_AGENT))
    }

    fn mobile_node_tunnel(ex: &Exchange, coa: u16) -> bool {
        ex.mn.tunnels.tunnel_exists(addr(HOME_AGENT), addr(coa))
    }

    // =============================================================================
    // HOME REGISTRATION
    // =============================================================================

    #[test]
    fn test_home_registration_round_trip() {
        let mut ex = Exchange::new();
        assert_eq!(ex.register(100, 60), SequenceNumber(1));

        let (statuses, outcomes) = ex.pump();
        assert_eq!(statuses, vec![AckStatus::ACCEPTED]);
        assert_eq!(outcomes, vec![AckOutcome::Accepted]);

        // Home agent side: binding, tunnel to the care-of address, proxy ND.
        assert_eq!(
            ex.peer.core.cache().exists(&addr(HOME)),
            Some(BindingKind::HomeRegistration)
        );
        assert!(home_agent_tunnel(&ex, 100));
        assert!(ex.peer.tunnels.route_exists(addr(HOME)));
        assert!(ex.peer.defense.is_defended(addr(HOME)));

        // Mobile node side: acknowledged, refresh at 80% of the lifetime.
        let entry = ex.mn.core.ledger().get(&addr(HOME_AGENT)).unwrap();
        assert_eq!(entry.state, LedgerState::Acknowledged);
        assert_eq!(entry.callback, LedgerCallback::Refresh);
        assert_eq!(entry.callback_time, ex.mn.clock.now().add_millis(48_000));
        assert!(mobile_node_tunnel(&ex, 100));
    }

    #[test]
    fn test_refresh_keeps_binding_alive() {
        let mut ex = Exchange::new();
        ex.register(100, 60);
        ex.pump();

        ex.advance_millis(48_000);
        ex.mn.core.on_timer(TableId::Ledger);
        let entry = ex.mn.core.ledger().get(&addr(HOME_AGENT)).unwrap();
        assert_eq!(entry.sequence, SequenceNumber(2));
        assert_eq!(entry.state, LedgerState::AwaitingAck);

        let (statuses, outcomes) = ex.pump();
        assert_eq!(statuses, vec![AckStatus::ACCEPTED]);
        assert_eq!(outcomes, vec![AckOutcome::Accepted]);

        // Same care-of address: resources are not rebuilt.
        assert_eq!(
            ex.peer.tunnels.created_count(addr(100), addr(HOME_AGENT)),
            1
        );
        assert_eq!(ex.mn.tunnels.created_count(addr(HOME_AGENT), addr(100)), 1);

        // Past the first lifetime the binding is still there.
        ex.advance_millis(13_000);
        ex.peer.core.on_timer(TableId::Cache);
        let binding = ex.peer.core.cache().peek(&addr(HOME)).unwrap();
        assert_eq!(binding.sequence, SequenceNumber(2));
        assert_eq!(binding.expiry, ex.peer.clock.now().add_millis(47_000));
    }

    #[test]
    fn test_unrefreshed_binding_expires_on_home_agent() {
        let mut ex = Exchange::new();
        ex.register(100, 60);
        ex.pump();

        ex.advance_millis(60_000);
        ex.peer.core.on_timer(TableId::Cache);

        assert!(ex.peer.core.cache().is_empty());
        assert!(!home_agent_tunnel(&ex, 100));
        assert!(!ex.peer.tunnels.route_exists(addr(HOME)));
        assert!(!ex.peer.defense.is_defended(addr(HOME)));
    }

    // =============================================================================
    // HANDOVER AND DEREGISTRATION
    // =============================================================================

    #[test]
    fn test_handover_moves_tunnels() {
        let mut ex = Exchange::new();
        ex.register(100, 60);
        ex.pump();

        ex.advance_millis(200);
        assert_eq!(ex.register(200, 60), SequenceNumber(2));
        let (statuses, outcomes) = ex.pump();
        assert_eq!(statuses, vec![AckStatus::ACCEPTED]);
        assert_eq!(outcomes, vec![AckOutcome::Accepted]);

        assert!(!home_agent_tunnel(&ex, 100));
        assert!(home_agent_tunnel(&ex, 200));
        assert!(ex.peer.tunnels.events().contains(&TunnelEvent::RouteAdded {
            dest: addr(HOME),
            prefix_len: 64,
            via: addr(200),
        }));

        assert!(!mobile_node_tunnel(&ex, 100));
        assert!(mobile_node_tunnel(&ex, 200));
        assert_eq!(
            ex.peer.core.cache().peek(&addr(HOME)).unwrap().care_of_addr,
            addr(200)
        );
    }

    #[test]
    fn test_deregistration_clears_both_sides() {
        let mut ex = Exchange::new();
        ex.register(100, 60);
        ex.pump();

        ex.register(100, 0);
        let (statuses, outcomes) = ex.pump();
        assert_eq!(statuses, vec![AckStatus::ACCEPTED]);
        assert_eq!(outcomes, vec![AckOutcome::Accepted]);

        assert!(ex.peer.core.cache().is_empty());
        assert!(!home_agent_tunnel(&ex, 100));
        assert!(!ex.peer.defense.is_defended(addr(HOME)));

        // The accepted deregistration expires the ledger entry at once.
        let entry = ex.mn.core.ledger().get(&addr(HOME_AGENT)).unwrap();
        assert_eq!(entry.callback, LedgerCallback::Expire);
        ex.mn.core.on_timer(TableId::Ledger);
        assert!(ex.mn.core.ledger().is_empty());
        assert!(!mobile_node_tunnel(&ex, 100));
    }

    // =============================================================================
    // LOSS AND RECOVERY
    // =============================================================================

    #[test]
    fn test_lost_update_is_retransmitted() {
        let mut ex = Exchange::new();
        ex.register(100, 60);
        ex.drop_in_flight();

        ex.advance_millis(1_000);
        ex.mn.core.on_timer(TableId::Ledger);
        let (statuses, outcomes) = ex.pump();
        assert_eq!(statuses, vec![AckStatus::ACCEPTED]);
        assert_eq!(outcomes, vec![AckOutcome::Accepted]);

        assert_eq!(
            ex.peer.core.cache().peek(&addr(HOME)).unwrap().sequence,
            SequenceNumber(2)
        );
        let entry = ex.mn.core.ledger().get(&addr(HOME_AGENT)).unwrap();
        assert_eq!(entry.state, LedgerState::Acknowledged);
        // Back-off is reset once acknowledged.
        assert_eq!(entry.delay, 1_000);
    }

    #[test]
    fn test_replayed_update_is_not_applied_twice() {
        let mut ex = Exchange::new();
        ex.register(100, 60);
        let sent = ex.mn.transmitter.sent();
        ex.pump();

        // The same carrier arriving again is stale but still acknowledged.
        for incoming in incoming_updates(&sent[0]) {
            let status = ex.peer.core.receive_binding_update(incoming).unwrap();
            assert_eq!(status, AckStatus::ACCEPTED);
        }
        assert_eq!(
            ex.peer.tunnels.created_count(addr(100), addr(HOME_AGENT)),
            1
        );
        assert_eq!(ex.peer.core.cache().stats().stale.load(Ordering::Relaxed), 1);
    }

    // =============================================================================
    // ROUTE OPTIMISATION
    // =============================================================================

    #[test]
    fn test_correspondent_binding_and_refresh_request() {
        let mut ex = Exchange::new();
        let update = OutgoingUpdate {
            peer_addr: addr(CORRESPONDENT),
            flags: LedgerFlags::NONE,
            lifetime: 100,
            ..registration(100, 100)
        };
        ex.mn.core.send_binding_update(update).unwrap();

        // Held back for coalescing until its deadline.
        assert!(ex.mn.transmitter.sent().is_empty());
        let delay = ex.mn.core.config().scheduler.update_max_delay_ms;
        ex.advance_millis(delay);
        ex.mn.core.on_timer(TableId::Scheduler);

        let (statuses, outcomes) = ex.pump();
        assert_eq!(statuses, vec![AckStatus::ACCEPTED]);
        assert!(outcomes.is_empty(), "no acknowledgement was requested");

        assert_eq!(
            ex.peer.core.cache().exists(&addr(HOME)),
            Some(BindingKind::Cache)
        );
        // Correspondent bindings own no tunnels.
        assert!(ex.peer.tunnels.events().is_empty());

        // A binding in use is asked for a fresh update before it lapses.
        ex.advance_millis(95_000);
        ex.peer.core.lookup_binding(&addr(HOME));
        ex.advance_millis(3_000);
        ex.peer.core.on_timer(TableId::Cache);
        assert!(ex.peer.core.scheduler().contains(
            addr(CORRESPONDENT),
            addr(HOME),
            OptionKind::Request
        ));
    }

    #[test]
    fn test_rejected_correspondent_is_left_alone() {
        let ex = Exchange::new();
        let update = OutgoingUpdate {
            peer_addr: addr(CORRESPONDENT),
            flags: LedgerFlags::ACK_REQUIRED,
            ..registration(100, 100)
        };
        ex.mn.core.send_binding_update(update.clone()).unwrap();

        let outcome = ex.mn.core.receive_binding_ack(ReceivedAck {
            peer_addr: addr(CORRESPONDENT),
            sequence: SequenceNumber(1),
            status: AckStatus::HOME_REGISTRATION_NOT_SUPPORTED,
            lifetime: 0,
            refresh: 0,
        });
        assert_eq!(
            outcome,
            AckOutcome::Rejected {
                status: AckStatus::HOME_REGISTRATION_NOT_SUPPORTED
            }
        );
        assert!(!ex.mn.core.ledger().may_send(&addr(CORRESPONDENT)));
        assert!(ex.mn.core.send_binding_update(update).is_err());

        // Retransmission stops while rejected.
        let queued = ex.mn.core.scheduler().len();
        ex.advance_millis(1_000);
        ex.mn.core.on_timer(TableId::Ledger);
        assert_eq!(ex.mn.core.scheduler().len(), queued);
    }

    #[test]
    fn test_home_agent_address_is_anchor() {
        let mut ex = Exchange::new();
        ex.register(100, 60);
        ex.pump();
        let binding = ex.peer.core.cache().peek(&addr(HOME)).unwrap();
        assert_eq!(binding.anchor_addr, addr(HOME_AGENT));
        let ack_carrier = &ex.peer.transmitter.sent()[0];
        assert_eq!(
            (ack_carrier.src, ack_carrier.dst),
            (addr(HOME_AGENT), addr(100))
        );
        assert_eq!(ack_carrier.kinds, vec![OptionKind::Ack]);
    }
}
