//! Test utilities for the mobility core.
//!
//! Deterministic stand-ins for every outbound port, plus [`CoreHarness`]
//! which wires them into a [`MobilityCore`]. Enable with the `test-utils`
//! feature flag.
//!
//! # Example
//!
//! ```rust,ignore
//! use mip6_core::test_utils::ManualClock;
//! use mip6_core::{TimeSource, Timestamp};
//!
//! let clock = ManualClock::new(Timestamp::from_secs(5));
//! clock.advance_millis(250);
//! assert_eq!(clock.now().as_millis(), 5_250);
//! ```

use std::collections::{HashMap, HashSet};
use std::net::Ipv6Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;

use crate::domain::{
    AckOption, AckStatus, LedgerCallback, LedgerEntry, LedgerFlags, MobilityConfig,
    MobilityOption, OptionKind, RequestOption, ResourceError, SequenceNumber, SubOption,
    Timestamp, UpdateOption,
};
use crate::ports::{
    AddressDefense, Authenticator, CallbackVerdict, CarrierTransmitter, CodecError,
    DeadlineTimer, LedgerCallbackHandler, OptionCodec, TimeSource, TransmitError, TunnelManager,
};
use crate::service::{MobilityCore, MobilityPorts, OptionScheduler, TableTimers};

/// `2001:db8::<last>`.
pub fn addr(last: u16) -> Ipv6Addr {
    Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, last)
}

// =============================================================================
// CLOCK AND TIMERS
// =============================================================================

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(start.as_millis()),
        }
    }

    pub fn set(&self, now: Timestamp) {
        self.now.store(now.as_millis(), Ordering::SeqCst);
    }

    pub fn advance_millis(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: u64) {
        self.advance_millis(secs * 1_000);
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.now.load(Ordering::SeqCst))
    }
}

/// Records every arming; never fires.
#[derive(Debug, Default)]
pub struct RecordingTimer {
    arms: Mutex<Vec<Option<Timestamp>>>,
}

impl RecordingTimer {
    pub fn arms(&self) -> Vec<Option<Timestamp>> {
        self.arms.lock().clone()
    }

    /// The most recent arming, if the timer was ever armed.
    pub fn last(&self) -> Option<Option<Timestamp>> {
        self.arms.lock().last().copied()
    }
}

impl DeadlineTimer for RecordingTimer {
    fn arm(&self, deadline: Option<Timestamp>) {
        self.arms.lock().push(deadline);
    }
}

// =============================================================================
// RESOURCES
// =============================================================================

/// Tunnel and route calls seen by [`RecordingTunnels`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TunnelEvent {
    Created { remote: Ipv6Addr, local: Ipv6Addr },
    Destroyed { remote: Ipv6Addr, local: Ipv6Addr },
    RouteAdded { dest: Ipv6Addr, prefix_len: u8, via: Ipv6Addr },
    RouteRemoved { dest: Ipv6Addr, prefix_len: u8, via: Ipv6Addr },
}

#[derive(Debug, Default)]
struct TunnelState {
    tunnels: HashMap<(Ipv6Addr, Ipv6Addr), usize>,
    routes: HashMap<(Ipv6Addr, u8), Ipv6Addr>,
    events: Vec<TunnelEvent>,
    fail_remote: HashSet<Ipv6Addr>,
    fail_local: HashSet<Ipv6Addr>,
}

/// Reference-counted in-memory tunnels and routes with failure injection.
#[derive(Debug, Default)]
pub struct RecordingTunnels {
    state: Mutex<TunnelState>,
}

impl RecordingTunnels {
    pub fn events(&self) -> Vec<TunnelEvent> {
        self.state.lock().events.clone()
    }

    pub fn tunnel_exists(&self, remote: Ipv6Addr, local: Ipv6Addr) -> bool {
        self.state.lock().tunnels.contains_key(&(remote, local))
    }

    /// True if any route to `dest` is installed.
    pub fn route_exists(&self, dest: Ipv6Addr) -> bool {
        self.state.lock().routes.keys().any(|(d, _)| *d == dest)
    }

    /// Next hop of the route to `dest/prefix_len`.
    pub fn route_via(&self, dest: Ipv6Addr, prefix_len: u8) -> Option<Ipv6Addr> {
        self.state.lock().routes.get(&(dest, prefix_len)).copied()
    }

    pub fn created_count(&self, remote: Ipv6Addr, local: Ipv6Addr) -> usize {
        self.count(|e| matches!(e, TunnelEvent::Created { remote: r, local: l } if *r == remote && *l == local))
    }

    pub fn destroyed_count(&self, remote: Ipv6Addr, local: Ipv6Addr) -> usize {
        self.count(|e| matches!(e, TunnelEvent::Destroyed { remote: r, local: l } if *r == remote && *l == local))
    }

    /// Fail every tunnel creation towards `remote`.
    pub fn fail_tunnel_to(&self, remote: Ipv6Addr) {
        self.state.lock().fail_remote.insert(remote);
    }

    /// Fail every tunnel creation from `local`.
    pub fn fail_tunnel_from(&self, local: Ipv6Addr) {
        self.state.lock().fail_local.insert(local);
    }

    fn count(&self, pred: impl Fn(&TunnelEvent) -> bool) -> usize {
        self.state.lock().events.iter().filter(|e| pred(e)).count()
    }
}

impl TunnelManager for RecordingTunnels {
    fn create_tunnel(&self, remote: Ipv6Addr, local: Ipv6Addr) -> Result<(), ResourceError> {
        let mut state = self.state.lock();
        if state.fail_remote.contains(&remote) || state.fail_local.contains(&local) {
            return Err(ResourceError::Tunnel {
                remote,
                local,
                reason: "injected failure".into(),
            });
        }
        *state.tunnels.entry((remote, local)).or_insert(0) += 1;
        state.events.push(TunnelEvent::Created { remote, local });
        Ok(())
    }

    fn destroy_tunnel(&self, remote: Ipv6Addr, local: Ipv6Addr) {
        let mut state = self.state.lock();
        if let Some(refs) = state.tunnels.get_mut(&(remote, local)) {
            *refs -= 1;
            if *refs == 0 {
                state.tunnels.remove(&(remote, local));
            }
        }
        state.events.push(TunnelEvent::Destroyed { remote, local });
    }

    fn add_route(
        &self,
        dest: Ipv6Addr,
        prefix_len: u8,
        via: Ipv6Addr,
        _from: Ipv6Addr,
    ) -> Result<(), ResourceError> {
        let mut state = self.state.lock();
        state.routes.insert((dest, prefix_len), via);
        state.events.push(TunnelEvent::RouteAdded {
            dest,
            prefix_len,
            via,
        });
        Ok(())
    }

    fn remove_route(&self, dest: Ipv6Addr, prefix_len: u8, via: Ipv6Addr, _from: Ipv6Addr) {
        let mut state = self.state.lock();
        if state.routes.get(&(dest, prefix_len)) == Some(&via) {
            state.routes.remove(&(dest, prefix_len));
        }
        state.events.push(TunnelEvent::RouteRemoved {
            dest,
            prefix_len,
            via,
        });
    }
}

#[derive(Debug, Default)]
struct DefenseState {
    defended: HashSet<(Ipv6Addr, u8)>,
    fail_next: bool,
}

/// In-memory proxy neighbour discovery.
#[derive(Debug, Default)]
pub struct RecordingDefense {
    state: Mutex<DefenseState>,
}

impl RecordingDefense {
    /// True if `addr` is defended under any prefix length.
    pub fn is_defended(&self, addr: Ipv6Addr) -> bool {
        self.state.lock().defended.iter().any(|(a, _)| *a == addr)
    }

    pub fn is_defended_as(&self, addr: Ipv6Addr, prefix_len: u8) -> bool {
        self.state.lock().defended.contains(&(addr, prefix_len))
    }

    /// Make the next `defend` call fail.
    pub fn fail_next(&self) {
        self.state.lock().fail_next = true;
    }
}

impl AddressDefense for RecordingDefense {
    fn defend(&self, addr: Ipv6Addr, prefix_len: u8) -> Result<(), ResourceError> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.fail_next) {
            return Err(ResourceError::Defense {
                addr,
                prefix_len,
                reason: "injected failure".into(),
            });
        }
        state.defended.insert((addr, prefix_len));
        Ok(())
    }

    fn withdraw(&self, addr: Ipv6Addr, prefix_len: u8) {
        self.state.lock().defended.remove(&(addr, prefix_len));
    }
}

// =============================================================================
// WIRE PATH
// =============================================================================

/// Codec with a fixed body length per option kind. Each sub-option adds
/// `2 + data.len()` bytes (type, length, data). The option's length byte
/// covers its sub-options, so [`FixedSizeCodec::decode`] can walk a message.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedSizeCodec;

impl FixedSizeCodec {
    pub const UPDATE_LEN: usize = 12;
    pub const ACK_LEN: usize = 8;
    pub const REQUEST_LEN: usize = 4;

    fn body_len(kind: OptionKind) -> usize {
        match kind {
            OptionKind::Update => Self::UPDATE_LEN,
            OptionKind::Ack => Self::ACK_LEN,
            OptionKind::Request => Self::REQUEST_LEN,
        }
    }

    /// Parse the options of one drained message. The acknowledgement refresh
    /// interval is not carried and decodes as zero.
    pub fn decode(bytes: &[u8]) -> Vec<MobilityOption> {
        let mut options = Vec::new();
        let mut pos = 0;
        while let Some(&len) = bytes.get(pos + 1) {
            let end = pos + 2 + usize::from(len);
            let Some(raw) = bytes.get(pos..end) else { break };
            let kind = match raw[0] {
                0 => OptionKind::Update,
                1 => OptionKind::Ack,
                2 => OptionKind::Request,
                _ => break,
            };

            let mut sub_options = Vec::new();
            let mut at = Self::body_len(kind);
            while let Some(&sub_len) = raw.get(at + 1) {
                let data_end = at + 2 + usize::from(sub_len);
                let Some(data) = raw.get(at + 2..data_end) else { break };
                sub_options.push(SubOption::new(raw[at], data));
                at = data_end;
            }

            let be32 = |from: usize| {
                u32::from_be_bytes([raw[from], raw[from + 1], raw[from + 2], raw[from + 3]])
            };
            options.push(match kind {
                OptionKind::Update => MobilityOption::Update(UpdateOption {
                    sequence: SequenceNumber(raw[2]),
                    flags: LedgerFlags::from_bits(raw[3]),
                    prefix_len: raw[4],
                    lifetime: be32(5),
                    sub_options,
                }),
                OptionKind::Ack => MobilityOption::Ack(AckOption {
                    status: AckStatus(raw[2]),
                    sequence: SequenceNumber(raw[3]),
                    lifetime: be32(4),
                    refresh: 0,
                    sub_options,
                }),
                OptionKind::Request => MobilityOption::Request(RequestOption { sub_options }),
            });
            pos = end;
        }
        options
    }
}

impl OptionCodec for FixedSizeCodec {
    fn encode(
        &self,
        buffer: &mut [u8],
        offset: usize,
        option: &MobilityOption,
    ) -> Result<usize, CodecError> {
        let body = Self::body_len(option.kind());
        let needed = body
            + option
                .sub_options()
                .iter()
                .map(|s| 2 + s.data.len())
                .sum::<usize>();
        let available = buffer.len().saturating_sub(offset);
        if needed > available {
            return Err(CodecError::DoesNotFit { needed, available });
        }

        let out = &mut buffer[offset..offset + needed];
        out[0] = option.kind() as u8;
        out[1] = (needed - 2) as u8;
        match option {
            MobilityOption::Update(u) => {
                out[2] = u.sequence.value();
                out[3] = u.flags.bits();
                out[4] = u.prefix_len;
                out[5..9].copy_from_slice(&u.lifetime.to_be_bytes());
            }
            MobilityOption::Ack(a) => {
                out[2] = a.status.0;
                out[3] = a.sequence.value();
                out[4..8].copy_from_slice(&a.lifetime.to_be_bytes());
            }
            MobilityOption::Request(_) => {}
        }
        let mut pos = body;
        for sub in option.sub_options() {
            out[pos] = sub.kind;
            out[pos + 1] = sub.data.len() as u8;
            out[pos + 2..pos + 2 + sub.data.len()].copy_from_slice(&sub.data);
            pos += 2 + sub.data.len();
        }
        Ok(offset + needed)
    }
}

/// A carrier seen by [`LoopbackTransmitter`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentCarrier {
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
    pub kinds: Vec<OptionKind>,
    pub bytes: Vec<u8>,
}

/// Transmit path that drains the attached scheduler into a fixed-size
/// message, the way a host's packet builder would.
#[derive(Debug)]
pub struct LoopbackTransmitter {
    budget: usize,
    scheduler: OnceLock<Weak<OptionScheduler>>,
    sent: Mutex<Vec<SentCarrier>>,
    failure: Mutex<Option<TransmitError>>,
}

impl LoopbackTransmitter {
    /// `budget`: option space per message, in bytes.
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            scheduler: OnceLock::new(),
            sent: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
        }
    }

    pub fn attach(&self, scheduler: &Arc<OptionScheduler>) {
        let _ = self.scheduler.set(Arc::downgrade(scheduler));
    }

    pub fn sent(&self) -> Vec<SentCarrier> {
        self.sent.lock().clone()
    }

    /// Fail every following carrier.
    pub fn fail_with_no_route(&self) {
        *self.failure.lock() = Some(TransmitError::NoRoute {
            dst: Ipv6Addr::UNSPECIFIED,
        });
    }
}

impl CarrierTransmitter for LoopbackTransmitter {
    fn send_carrier(&self, src: Ipv6Addr, dst: Ipv6Addr) -> Result<(), TransmitError> {
        if let Some(err) = self.failure.lock().clone() {
            return Err(err);
        }
        let scheduler = self
            .scheduler
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| TransmitError::Failed("no scheduler attached".into()))?;
        let drained = scheduler.drain_for(src, dst, self.budget);
        self.sent.lock().push(SentCarrier {
            src,
            dst,
            kinds: drained.kinds,
            bytes: drained.bytes,
        });
        Ok(())
    }
}

/// Keyed XOR checksum standing in for a real signature.
#[derive(Debug, Clone, Copy)]
pub struct KeyedChecksum {
    key: u8,
}

impl KeyedChecksum {
    pub fn new(key: u8) -> Self {
        Self { key }
    }
}

impl Authenticator for KeyedChecksum {
    fn sign(&self, fields: &[u8]) -> Vec<u8> {
        let mut digest = [self.key; 4];
        for (i, byte) in fields.iter().enumerate() {
            digest[i % 4] ^= byte.rotate_left((i % 8) as u32);
        }
        digest.to_vec()
    }

    fn verify(&self, fields: &[u8], auth: &[u8]) -> bool {
        self.sign(fields) == auth
    }
}

// =============================================================================
// LEDGER CALLBACKS
// =============================================================================

type Decide = dyn Fn(&LedgerEntry) -> CallbackVerdict + Send + Sync;

/// Ledger callback handler driven by a closure; records every call.
pub struct RecordingHandler {
    decide: Box<Decide>,
    sequence: Option<SequenceNumber>,
    calls: Mutex<Vec<(LedgerCallback, Ipv6Addr)>>,
    resent: Mutex<Vec<(Ipv6Addr, SequenceNumber)>>,
}

impl RecordingHandler {
    /// Resends keep the entry's current sequence number.
    pub fn with<F>(decide: F) -> Self
    where
        F: Fn(&LedgerEntry) -> CallbackVerdict + Send + Sync + 'static,
    {
        Self {
            decide: Box::new(decide),
            sequence: None,
            calls: Mutex::new(Vec::new()),
            resent: Mutex::new(Vec::new()),
        }
    }

    pub fn keep_trying() -> Self {
        Self::with(|_| CallbackVerdict::KeepTrying)
    }

    /// Always resend under `sequence`.
    pub fn resend_as(sequence: SequenceNumber) -> Self {
        Self {
            sequence: Some(sequence),
            ..Self::keep_trying()
        }
    }

    pub fn calls(&self) -> Vec<(LedgerCallback, Ipv6Addr)> {
        self.calls.lock().clone()
    }

    /// Peer and sequence of every resend, in order.
    pub fn resent(&self) -> Vec<(Ipv6Addr, SequenceNumber)> {
        self.resent.lock().clone()
    }
}

impl LedgerCallbackHandler for RecordingHandler {
    fn on_callback(&self, callback: LedgerCallback, entry: &LedgerEntry) -> CallbackVerdict {
        self.calls.lock().push((callback, entry.peer_addr));
        (self.decide)(entry)
    }

    fn next_sequence(&self, entry: &LedgerEntry) -> SequenceNumber {
        self.sequence.unwrap_or(entry.sequence)
    }

    fn resend(&self, _callback: LedgerCallback, entry: &LedgerEntry) {
        self.resent.lock().push((entry.peer_addr, entry.sequence));
    }
}

// =============================================================================
// HARNESS
// =============================================================================

/// A [`MobilityCore`] wired to recording ports and a manual clock.
pub struct CoreHarness {
    pub core: Arc<MobilityCore>,
    pub clock: Arc<ManualClock>,
    pub tunnels: Arc<RecordingTunnels>,
    pub defense: Arc<RecordingDefense>,
    pub transmitter: Arc<LoopbackTransmitter>,
    pub authenticator: Arc<KeyedChecksum>,
    pub cache_timer: Arc<RecordingTimer>,
    pub ledger_timer: Arc<RecordingTimer>,
    pub scheduler_timer: Arc<RecordingTimer>,
}

impl CoreHarness {
    /// Default configuration, no authenticator.
    pub fn new() -> Self {
        Self::build(|_| {}, false)
    }

    pub fn with_config(tweak: impl FnOnce(&mut MobilityConfig)) -> Self {
        Self::build(tweak, false)
    }

    /// Default configuration, signing with a [`KeyedChecksum`].
    pub fn with_authenticator() -> Self {
        Self::build(|_| {}, true)
    }

    fn build(tweak: impl FnOnce(&mut MobilityConfig), sign: bool) -> Self {
        let mut config = MobilityConfig::default();
        tweak(&mut config);

        let clock = Arc::new(ManualClock::new(Timestamp::from_secs(1_000)));
        let tunnels = Arc::new(RecordingTunnels::default());
        let defense = Arc::new(RecordingDefense::default());
        let transmitter = Arc::new(LoopbackTransmitter::new(256));
        let authenticator = Arc::new(KeyedChecksum::new(0x5a));
        let cache_timer = Arc::new(RecordingTimer::default());
        let ledger_timer = Arc::new(RecordingTimer::default());
        let scheduler_timer = Arc::new(RecordingTimer::default());

        let ports = MobilityPorts {
            tunnels: tunnels.clone(),
            defense: defense.clone(),
            codec: Arc::new(FixedSizeCodec),
            transmitter: transmitter.clone(),
            clock: clock.clone(),
            authenticator: sign.then(|| authenticator.clone() as Arc<dyn Authenticator>),
        };
        let timers = TableTimers {
            cache: cache_timer.clone(),
            ledger: ledger_timer.clone(),
            scheduler: scheduler_timer.clone(),
        };
        let core = Arc::new(
            MobilityCore::new(config, ports, timers).expect("test configuration is valid"),
        );
        transmitter.attach(core.scheduler());

        Self {
            core,
            clock,
            tunnels,
            defense,
            transmitter,
            authenticator,
            cache_timer,
            ledger_timer,
            scheduler_timer,
        }
    }
}

impl Default for CoreHarness {
    fn default() -> Self {
        Self::new()
    }
}
