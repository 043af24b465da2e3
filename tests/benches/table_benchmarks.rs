//! # Binding Table Benchmarks
//!
//! | Area | Operation | Expected cost |
//! |------|-----------|---------------|
//! | Expiry table | add / delete by key | O(chain) + O(n) ordered insert |
//! | Expiry table | sweep of due entries | O(due) |
//! | Option scheduler | enqueue then drain one pair | O(1) table ops plus encode |
//! | Binding cache | register then deregister | table ops plus port calls |

use std::net::Ipv6Addr;
use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use mip6_core::adapters::{
    DestinationOptionCodec, LoggingDefense, LoggingTransmitter, LoggingTunnels,
};
use mip6_core::test_utils::{addr, ManualClock};
use mip6_core::{
    BindingReceiver, DeadlineTimer, HashList, IncomingUpdate, IterAction, LedgerFlags,
    MobilityConfig, MobilityCore, MobilityPorts, RequestOption, SequenceNumber, TableTimers,
    Timestamp, UpdateOption,
};

fn host(n: u32) -> Ipv6Addr {
    Ipv6Addr::from(0x2001_0db8_0000_0000_0000_0000_0000_0000u128 | u128::from(n))
}

/// Timer that keeps nothing; the benches never advance the clock.
struct Unarmed;

impl DeadlineTimer for Unarmed {
    fn arm(&self, _deadline: Option<Timestamp>) {}
}

/// A core on the logging adapters, so long runs accumulate no state.
fn bench_core() -> MobilityCore {
    let transmitter = Arc::new(LoggingTransmitter::new(256));
    let timer: Arc<dyn DeadlineTimer> = Arc::new(Unarmed);
    let ports = MobilityPorts {
        tunnels: Arc::new(LoggingTunnels),
        defense: Arc::new(LoggingDefense),
        codec: Arc::new(DestinationOptionCodec),
        transmitter: transmitter.clone(),
        clock: Arc::new(ManualClock::new(Timestamp::from_secs(1_000))),
        authenticator: None,
    };
    let timers = TableTimers {
        cache: timer.clone(),
        ledger: timer.clone(),
        scheduler: timer,
    };
    let core = MobilityCore::new(MobilityConfig::default(), ports, timers)
        .expect("default configuration is valid");
    transmitter.attach(core.scheduler());
    core
}

// ============================================================================
// Expiry table
// ============================================================================

fn bench_hashlist_add_delete(c: &mut Criterion) {
    let mut group = c.benchmark_group("hashlist-add-delete");
    group.measurement_time(Duration::from_secs(5));

    for size in [64u32, 256, 1024] {
        // Reverse deadlines so every insert lands at the head.
        let keys: Vec<(Ipv6Addr, Timestamp)> = (0..size)
            .map(|i| (host(i), Timestamp::from_millis(u64::from(size - i))))
            .collect();

        group.throughput(Throughput::Elements(u64::from(size)));
        group.bench_with_input(BenchmarkId::new("fill_and_empty", size), &keys, |b, keys| {
            b.iter(|| {
                let mut table: HashList<Ipv6Addr, Timestamp, u32> =
                    HashList::new(keys.len(), 64);
                for (i, (key, deadline)) in keys.iter().enumerate() {
                    table.add(*key, *deadline, i as u32).ok();
                }
                for (key, _) in keys {
                    black_box(table.delete(key));
                }
                black_box(table.len())
            })
        });
    }

    group.finish();
}

fn bench_hashlist_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("hashlist-sweep");

    for size in [256u32, 1024] {
        group.throughput(Throughput::Elements(u64::from(size)));
        group.bench_function(BenchmarkId::new("expire_first_quarter", size), |b| {
            b.iter_batched(
                || {
                    let mut table: HashList<Ipv6Addr, Timestamp, u32> =
                        HashList::new(size as usize, 64);
                    for i in 0..size {
                        table
                            .add(host(i), Timestamp::from_millis(u64::from(i)), i)
                            .ok();
                    }
                    table
                },
                |mut table| {
                    let now = Timestamp::from_millis(u64::from(size / 4));
                    let removed = table.iterate(|_, deadline, _| {
                        if *deadline < now {
                            IterAction::DeleteCurrent
                        } else {
                            IterAction::Stop
                        }
                    });
                    black_box(removed)
                },
                criterion::BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

// ============================================================================
// Option scheduler
// ============================================================================

fn bench_scheduler_enqueue_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler");
    let core = bench_core();
    let scheduler = core.scheduler();
    let src = addr(100);
    let dst = addr(9);

    group.bench_function("enqueue_request_then_drain", |b| {
        b.iter(|| {
            scheduler
                .enqueue_request(src, dst, RequestOption::default(), 1_000)
                .ok();
            black_box(scheduler.drain_for(src, dst, 256))
        })
    });

    group.bench_function("supersede_queued_request", |b| {
        scheduler
            .enqueue_request(src, dst, RequestOption::default(), 1_000)
            .ok();
        b.iter(|| {
            scheduler
                .enqueue_request(src, dst, RequestOption::default(), 1_000)
                .ok()
        })
    });
    scheduler.flush();

    group.finish();
}

// ============================================================================
// Binding cache
// ============================================================================

fn bench_cache_register_deregister(c: &mut Criterion) {
    let mut group = c.benchmark_group("binding-cache");
    let core = bench_core();
    let mut sequence = 0u8;

    let incoming = |sequence: u8, lifetime: u32| IncomingUpdate {
        ifindex: 1,
        anchor_addr: addr(0xa),
        home_addr: addr(1),
        care_of_addr: addr(100),
        update: UpdateOption {
            sequence: SequenceNumber(sequence),
            lifetime,
            flags: LedgerFlags::HOME_REGISTRATION,
            prefix_len: 64,
            sub_options: Vec::new(),
        },
    };

    group.bench_function("home_registration_cycle", |b| {
        b.iter(|| {
            sequence = sequence.wrapping_add(1);
            let created = core.receive_binding_update(incoming(sequence, 60));
            sequence = sequence.wrapping_add(1);
            let removed = core.receive_binding_update(incoming(sequence, 0));
            black_box((created.ok(), removed.ok()))
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_hashlist_add_delete,
    bench_hashlist_sweep,
    bench_scheduler_enqueue_drain,
    bench_cache_register_deregister,
);
criterion_main!(benches);
