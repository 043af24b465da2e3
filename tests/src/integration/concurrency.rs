//! # Concurrency Tests
//!
//! The tables are shared between the host's packet threads and the timer
//! worker. These tests drive one core from many OS threads at once and then
//! check that resources and queues are left consistent.

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::net::Ipv6Addr;
    use std::thread;

    use parking_lot::Mutex;

    use mip6_core::test_utils::{addr, CoreHarness};
    use mip6_core::{
        AckStatus, BindingReceiver, IncomingUpdate, LedgerFlags, MobileNodeApi, OptionKind,
        OutgoingUpdate, RequestOption, SequenceNumber, TableId, UpdateOption,
    };

    const THREADS: u16 = 8;

    fn incoming(home: Ipv6Addr, coa: Ipv6Addr, seq: u8, lifetime: u32) -> IncomingUpdate {
        IncomingUpdate {
            ifindex: 1,
            anchor_addr: addr(0xa),
            home_addr: home,
            care_of_addr: coa,
            update: UpdateOption {
                sequence: SequenceNumber(seq),
                lifetime,
                flags: LedgerFlags::HOME_REGISTRATION,
                prefix_len: 64,
                sub_options: Vec::new(),
            },
        }
    }

    fn home(thread: u16, n: u16) -> Ipv6Addr {
        Ipv6Addr::new(0x2001, 0xdb8, 1, 0, 0, 0, thread, n)
    }

    fn coa(thread: u16, n: u16) -> Ipv6Addr {
        Ipv6Addr::new(0x2001, 0xdb8, 2, 0, 0, 0, thread, n)
    }

    #[test]
    fn test_parallel_registrations_fill_cache_exactly() {
        let h = CoreHarness::new();
        let per_thread = h.core.cache().capacity() as u16 / THREADS;

        thread::scope(|s| {
            for t in 0..THREADS {
                let core = &h.core;
                s.spawn(move || {
                    for n in 0..per_thread {
                        let status = core
                            .receive_binding_update(incoming(home(t, n), coa(t, n), 1, 60))
                            .unwrap();
                        assert_eq!(status, AckStatus::ACCEPTED);
                    }
                });
            }
        });

        assert_eq!(h.core.cache().len(), h.core.cache().capacity());
        for t in 0..THREADS {
            for n in 0..per_thread {
                assert!(h.tunnels.tunnel_exists(coa(t, n), addr(0xa)));
                assert!(h.defense.is_defended(home(t, n)));
            }
        }

        thread::scope(|s| {
            for t in 0..THREADS {
                let core = &h.core;
                s.spawn(move || {
                    for n in 0..per_thread {
                        let status = core
                            .receive_binding_update(incoming(home(t, n), coa(t, n), 2, 0))
                            .unwrap();
                        assert_eq!(status, AckStatus::ACCEPTED);
                    }
                });
            }
        });

        assert!(h.core.cache().is_empty());
        assert_eq!(h.core.cache().next_deadline(), None);
        for t in 0..THREADS {
            for n in 0..per_thread {
                assert!(!h.tunnels.tunnel_exists(coa(t, n), addr(0xa)));
                assert!(!h.defense.is_defended(home(t, n)));
            }
        }
    }

    #[test]
    fn test_racing_updates_for_one_home_leave_one_tunnel() {
        let h = CoreHarness::new();
        let target = home(0, 1);

        thread::scope(|s| {
            for t in 0..THREADS {
                let core = &h.core;
                s.spawn(move || {
                    for round in 0..12u8 {
                        // Distinct, interleaved sequence numbers inside one window.
                        let seq = round * THREADS as u8 + t as u8 + 1;
                        core.receive_binding_update(incoming(target, coa(t, 0), seq, 60))
                            .unwrap();
                    }
                });
            }
        });

        let binding = h.core.cache().peek(&target).unwrap();
        for t in 0..THREADS {
            let expected = coa(t, 0) == binding.care_of_addr;
            assert_eq!(
                h.tunnels.tunnel_exists(coa(t, 0), addr(0xa)),
                expected,
                "tunnel for care-of address of thread {t}"
            );
        }
        assert!(h.tunnels.route_exists(target));
    }

    #[test]
    fn test_concurrent_senders_and_timer_keep_ledger_consistent() {
        let h = CoreHarness::new();

        thread::scope(|s| {
            for t in 0..THREADS {
                let core = &h.core;
                s.spawn(move || {
                    for n in 0..4 {
                        let update = OutgoingUpdate {
                            peer_addr: home(t, n),
                            home_addr: addr(1),
                            care_of_addr: addr(100),
                            lifetime: 60,
                            prefix_len: 64,
                            flags: LedgerFlags::ACK_REQUIRED,
                        };
                        core.send_binding_update(update).unwrap();
                    }
                });
            }
            // The timer worker running alongside the senders.
            let core = &h.core;
            let clock = &h.clock;
            s.spawn(move || {
                for _ in 0..10 {
                    clock.advance_millis(100);
                    core.on_timer(TableId::Ledger);
                    core.on_timer(TableId::Scheduler);
                }
            });
        });

        assert_eq!(h.core.ledger().len(), THREADS as usize * 4);
        // Every outgoing update took its own sequence number.
        let sequences: HashSet<u8> = h
            .core
            .ledger()
            .snapshot()
            .iter()
            .map(|e| e.sequence.value())
            .collect();
        assert_eq!(sequences.len(), h.core.ledger().len());
    }

    #[test]
    fn test_no_queued_option_is_lost_under_concurrent_drain() {
        let h = CoreHarness::new();
        let scheduler = h.core.scheduler();
        let src = addr(0xa);
        let drained: Mutex<HashSet<(Ipv6Addr, OptionKind)>> = Mutex::new(HashSet::new());
        let per_thread = 12u16;

        thread::scope(|s| {
            for t in 0..4u16 {
                s.spawn(move || {
                    for n in 0..per_thread {
                        scheduler
                            .enqueue_request(src, home(t, n), RequestOption::default(), 5_000)
                            .unwrap();
                    }
                });
            }
            for t in 0..4u16 {
                let drained = &drained;
                s.spawn(move || {
                    for _ in 0..3 {
                        for n in 0..per_thread {
                            let out = scheduler.drain_for(src, home(t, n), 64);
                            let mut seen = drained.lock();
                            seen.extend(out.kinds.iter().map(|&kind| (home(t, n), kind)));
                        }
                    }
                });
            }
        });

        for t in 0..4u16 {
            for n in 0..per_thread {
                let out = scheduler.drain_for(src, home(t, n), 64);
                drained
                    .lock()
                    .extend(out.kinds.iter().map(|&kind| (home(t, n), kind)));
            }
        }

        assert!(scheduler.is_empty());
        assert_eq!(scheduler.next_deadline(), None);
        let seen = drained.lock();
        for t in 0..4u16 {
            for n in 0..per_thread {
                assert!(seen.contains(&(home(t, n), OptionKind::Request)));
            }
        }
    }
}
