//! In-memory fleet, relay and launcher doubles for pass-level tests

#![allow(dead_code)]

use async_trait::async_trait;
use camrelay_sync::error::{Error, Result};
use camrelay_sync::fleet_client::{Device, FetchResult, FleetSource};
use camrelay_sync::process_supervisor::{
    GroupSignal, ProcessSupervisor, RelayLauncher, RelayProcess,
};
use camrelay_sync::reconciler::ReconciliationEngine;
use camrelay_sync::relay_client::{RelayApi, StreamConfig, StreamTemplate};
use camrelay_sync::slot_allocator::{SlotAllocator, StreamSlot};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const MAC_A: &str = "aa:00:00:00:00:01";
pub const MAC_B: &str = "bb:00:00:00:00:02";
pub const MAC_C: &str = "cc:00:00:00:00:03";

pub fn device_a() -> Device {
    Device::live(MAC_A, "10.0.0.1", "Gate")
}

pub fn device_b() -> Device {
    Device::live(MAC_B, "10.0.0.2", "Lobby")
}

pub fn device_c() -> Device {
    Device::live(MAC_C, "10.0.0.3", "Dock")
}

// ---------------------------------------------------------------------------
// Fleet
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeFleet {
    next: Mutex<Option<FetchResult>>,
    fetches: Mutex<usize>,
}

impl FakeFleet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_devices(&self, devices: Vec<Device>) {
        *self.next.lock().unwrap() = Some(FetchResult::Devices(devices));
    }

    pub fn set_unavailable(&self) {
        *self.next.lock().unwrap() = Some(FetchResult::Unavailable("status 503".to_string()));
    }

    pub fn fetches(&self) -> usize {
        *self.fetches.lock().unwrap()
    }
}

#[async_trait]
impl FleetSource for FakeFleet {
    async fn fetch(&self) -> FetchResult {
        *self.fetches.lock().unwrap() += 1;
        self.next
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| FetchResult::Devices(Vec::new()))
    }
}

// ---------------------------------------------------------------------------
// Relay
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateSession,
    Attach,
    List,
    Create(u32),
    Destroy(u32),
    Detach,
    DestroySession,
}

#[derive(Default)]
struct RelayInner {
    streams: BTreeSet<u32>,
    calls: Vec<Call>,
    fail_session: bool,
    fail_attach: bool,
    fail_list: bool,
    fail_create: BTreeSet<u32>,
    fail_destroy: BTreeSet<u32>,
    next_session: u64,
}

#[derive(Default)]
pub struct FakeRelay {
    inner: Mutex<RelayInner>,
    open_sessions: Arc<AtomicUsize>,
}

fn refused(stage: &'static str) -> Error {
    Error::Protocol {
        stage,
        message: "injected failure".to_string(),
    }
}

impl FakeRelay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_streams(ids: &[u32]) -> Arc<Self> {
        let relay = Self::default();
        relay.inner.lock().unwrap().streams = ids.iter().copied().collect();
        Arc::new(relay)
    }

    /// Sessions created and not yet destroyed
    pub fn session_gauge(&self) -> Arc<AtomicUsize> {
        self.open_sessions.clone()
    }

    pub fn streams(&self) -> BTreeSet<u32> {
        self.inner.lock().unwrap().streams.clone()
    }

    /// Simulate a relay restart that lost every stream
    pub fn wipe(&self) {
        self.inner.lock().unwrap().streams.clear();
    }

    /// Calls recorded since the last drain
    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut self.inner.lock().unwrap().calls)
    }

    pub fn fail_session(&self, fail: bool) {
        self.inner.lock().unwrap().fail_session = fail;
    }

    pub fn fail_attach(&self, fail: bool) {
        self.inner.lock().unwrap().fail_attach = fail;
    }

    pub fn fail_list(&self, fail: bool) {
        self.inner.lock().unwrap().fail_list = fail;
    }

    pub fn fail_create(&self, id: u32, fail: bool) {
        let mut inner = self.inner.lock().unwrap();
        if fail {
            inner.fail_create.insert(id);
        } else {
            inner.fail_create.remove(&id);
        }
    }

    pub fn fail_destroy(&self, id: u32, fail: bool) {
        let mut inner = self.inner.lock().unwrap();
        if fail {
            inner.fail_destroy.insert(id);
        } else {
            inner.fail_destroy.remove(&id);
        }
    }
}

#[async_trait]
impl RelayApi for FakeRelay {
    async fn create_session(&self) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::CreateSession);
        if inner.fail_session {
            return Err(refused("create_session"));
        }
        inner.next_session += 1;
        self.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(inner.next_session)
    }

    async fn attach(&self, _session: u64) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::Attach);
        if inner.fail_attach {
            return Err(refused("attach"));
        }
        Ok(7)
    }

    async fn list_streams(&self, _session: u64, _handle: u64) -> Result<BTreeSet<u32>> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::List);
        if inner.fail_list {
            return Err(refused("list"));
        }
        Ok(inner.streams.clone())
    }

    async fn create_stream(&self, _session: u64, _handle: u64, stream: &StreamConfig) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::Create(stream.id));
        if inner.fail_create.contains(&stream.id) || inner.streams.contains(&stream.id) {
            return Err(refused("create_stream"));
        }
        inner.streams.insert(stream.id);
        Ok(())
    }

    async fn destroy_stream(&self, _session: u64, _handle: u64, stream_id: u32) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::Destroy(stream_id));
        if inner.fail_destroy.contains(&stream_id) {
            return Err(refused("destroy_stream"));
        }
        inner.streams.remove(&stream_id);
        Ok(())
    }

    async fn detach(&self, _session: u64, _handle: u64) -> Result<()> {
        self.inner.lock().unwrap().calls.push(Call::Detach);
        Ok(())
    }

    async fn destroy_session(&self, _session: u64) -> Result<()> {
        self.inner.lock().unwrap().calls.push(Call::DestroySession);
        self.open_sessions.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn is_mutation(call: &Call) -> bool {
    matches!(call, Call::Create(_) | Call::Destroy(_))
}

// ---------------------------------------------------------------------------
// Launcher
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ProcRecord {
    pub pid: u32,
    pub slot_id: u32,
    pub mac: String,
    pub ip: String,
    pub alive: bool,
    pub signals: Vec<GroupSignal>,
    /// Relay sessions open when each signal was sent
    pub sessions_at_signal: Vec<usize>,
}

#[derive(Default)]
struct LauncherInner {
    next_pid: u32,
    procs: Vec<ProcRecord>,
    fail_spawn: BTreeSet<u32>,
}

#[derive(Clone, Default)]
pub struct FakeLauncher {
    inner: Arc<Mutex<LauncherInner>>,
    sessions: Option<Arc<AtomicUsize>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the relay's open-session count whenever a process is signalled
    pub fn observing(sessions: Arc<AtomicUsize>) -> Self {
        Self {
            sessions: Some(sessions),
            ..Self::default()
        }
    }

    /// Largest number of relay sessions open while any process was signalled
    pub fn max_sessions_at_signal(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .procs
            .iter()
            .flat_map(|p| p.sessions_at_signal.iter().copied())
            .max()
            .unwrap_or(0)
    }

    pub fn launches(&self) -> usize {
        self.inner.lock().unwrap().procs.len()
    }

    /// MAC -> slot id of every process that has not exited
    pub fn running(&self) -> BTreeMap<String, u32> {
        self.inner
            .lock()
            .unwrap()
            .procs
            .iter()
            .filter(|p| p.alive)
            .map(|p| (p.mac.clone(), p.slot_id))
            .collect()
    }

    /// Pids that received at least one signal
    pub fn signalled(&self) -> Vec<u32> {
        self.inner
            .lock()
            .unwrap()
            .procs
            .iter()
            .filter(|p| !p.signals.is_empty())
            .map(|p| p.pid)
            .collect()
    }

    pub fn pid_for(&self, slot_id: u32) -> Option<u32> {
        self.inner
            .lock()
            .unwrap()
            .procs
            .iter()
            .rev()
            .find(|p| p.slot_id == slot_id && p.alive)
            .map(|p| p.pid)
    }

    /// The relay for `slot_id` exits on its own
    pub fn crash(&self, slot_id: u32) {
        let mut inner = self.inner.lock().unwrap();
        for proc in inner.procs.iter_mut().filter(|p| p.slot_id == slot_id) {
            proc.alive = false;
        }
    }

    pub fn fail_spawn(&self, slot_id: u32, fail: bool) {
        let mut inner = self.inner.lock().unwrap();
        if fail {
            inner.fail_spawn.insert(slot_id);
        } else {
            inner.fail_spawn.remove(&slot_id);
        }
    }
}

impl RelayLauncher for FakeLauncher {
    fn launch(&self, slot: &StreamSlot) -> Result<Box<dyn RelayProcess>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_spawn.contains(&slot.slot_id) {
            return Err(Error::Process {
                slot_id: slot.slot_id,
                message: "spawn refused".to_string(),
            });
        }
        inner.next_pid += 1;
        let pid = 1000 + inner.next_pid;
        inner.procs.push(ProcRecord {
            pid,
            slot_id: slot.slot_id,
            mac: slot.mac_address.clone(),
            ip: slot.ip_address.clone(),
            alive: true,
            signals: Vec::new(),
            sessions_at_signal: Vec::new(),
        });
        Ok(Box::new(FakeProcess {
            pid,
            launcher: self.inner.clone(),
            sessions: self.sessions.clone(),
        }))
    }
}

struct FakeProcess {
    pid: u32,
    launcher: Arc<Mutex<LauncherInner>>,
    sessions: Option<Arc<AtomicUsize>>,
}

impl FakeProcess {
    fn with<R>(&self, f: impl FnOnce(&mut ProcRecord) -> R) -> Option<R> {
        let mut inner = self.launcher.lock().unwrap();
        inner.procs.iter_mut().find(|p| p.pid == self.pid).map(f)
    }
}

#[async_trait]
impl RelayProcess for FakeProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn is_alive(&mut self) -> bool {
        self.with(|p| p.alive).unwrap_or(false)
    }

    fn signal_group(&mut self, signal: GroupSignal) -> Result<()> {
        let open = self
            .sessions
            .as_ref()
            .map(|gauge| gauge.load(Ordering::SeqCst))
            .unwrap_or(0);
        self.with(|p| {
            p.signals.push(signal);
            p.sessions_at_signal.push(open);
            p.alive = false;
        });
        Ok(())
    }

    async fn wait_exit(&mut self, _timeout: Duration) -> bool {
        !self.is_alive()
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub fleet: Arc<FakeFleet>,
    pub relay: Arc<FakeRelay>,
    pub launcher: FakeLauncher,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_relay(FakeRelay::new())
    }

    pub fn with_relay(relay: Arc<FakeRelay>) -> Self {
        Self {
            fleet: FakeFleet::new(),
            launcher: FakeLauncher::observing(relay.session_gauge()),
            relay,
        }
    }

    pub fn engine(&self) -> ReconciliationEngine {
        self.engine_with_capacity(100)
    }

    pub fn engine_with_capacity(&self, capacity: u32) -> ReconciliationEngine {
        let supervisor =
            ProcessSupervisor::new(Arc::new(self.launcher.clone()), Duration::from_millis(10));
        ReconciliationEngine::new(
            self.fleet.clone(),
            self.relay.clone(),
            supervisor,
            SlotAllocator::new(5000, capacity),
            StreamTemplate::default(),
        )
    }
}

pub fn mapping(pairs: &[(&str, u32)]) -> BTreeMap<String, u32> {
    pairs
        .iter()
        .map(|(mac, id)| (mac.to_string(), *id))
        .collect()
}
