//! Reconciler - Stream Reconciliation Engine
//!
//! ## Responsibilities
//!
//! - One pass: fetch → allocate/diff → apply → tear down the relay session
//! - First-pass (and relay-reset) flush of every remote stream
//! - Short-circuit when the desired set did not change
//! - Keep slot/process state untouched on fetch or protocol-sequencing failure
//!
//! ## Pass stages
//!
//! `Idle → Fetching → Diffing → Applying → TearingDown → Idle`

mod controller;
mod diff;

pub use controller::{shutdown_signal, Controller};
pub use diff::{relay_was_reset, ReconcilePlan};

use crate::error::Result;
use crate::fleet_client::{live_devices, FetchResult, FleetSource};
use crate::process_supervisor::{ProcessSupervisor, SupervisionReport};
use crate::relay_client::{RelayApi, RelaySession, StreamTemplate};
use crate::slot_allocator::{SlotAllocator, StreamSlot};
use crate::state::{PassOutcome, SlotStatus};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Where the engine currently is within a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassStage {
    Idle,
    Fetching,
    Diffing,
    Applying,
    TearingDown,
}

/// What one pass did
#[derive(Debug, Clone)]
pub struct PassReport {
    pub outcome: PassOutcome,
    pub flushed: bool,
    pub created: Vec<u32>,
    pub destroyed: Vec<u32>,
    /// Slot ids whose create/destroy failed; retried next pass
    pub failed: Vec<u32>,
    /// Live devices left without a slot
    pub unallocated: Vec<String>,
    pub supervision: SupervisionReport,
}

impl PassReport {
    fn new(outcome: PassOutcome) -> Self {
        Self {
            outcome,
            flushed: false,
            created: Vec::new(),
            destroyed: Vec::new(),
            failed: Vec::new(),
            unallocated: Vec::new(),
            supervision: SupervisionReport::default(),
        }
    }
}

/// Owns the slot table and (through the supervisor) the process table
pub struct ReconciliationEngine {
    fleet: Arc<dyn FleetSource>,
    relay: Arc<dyn RelayApi>,
    supervisor: ProcessSupervisor,
    allocator: SlotAllocator,
    template: StreamTemplate,
    /// Committed desired slots, keyed by slot id
    slots: BTreeMap<u32, StreamSlot>,
    /// Stream ids known to exist on the relay after the last applied pass
    confirmed: BTreeSet<u32>,
    /// Released ids whose remote destroy has not succeeded yet
    reserved: BTreeSet<u32>,
    /// Desired ids whose flush destroy failed; removed and re-created next pass
    stale: BTreeSet<u32>,
    needs_flush: bool,
    pending: bool,
    /// Force a relay round-trip after this many unchanged passes (0 = never)
    resync_every: u32,
    unchanged_passes: u32,
    shutting_down: bool,
    stage: PassStage,
}

impl ReconciliationEngine {
    pub fn new(
        fleet: Arc<dyn FleetSource>,
        relay: Arc<dyn RelayApi>,
        supervisor: ProcessSupervisor,
        allocator: SlotAllocator,
        template: StreamTemplate,
    ) -> Self {
        Self {
            fleet,
            relay,
            supervisor,
            allocator,
            template,
            slots: BTreeMap::new(),
            confirmed: BTreeSet::new(),
            reserved: BTreeSet::new(),
            stale: BTreeSet::new(),
            needs_flush: true,
            pending: false,
            resync_every: 0,
            unchanged_passes: 0,
            shutting_down: false,
            stage: PassStage::Idle,
        }
    }

    pub fn with_resync_every(mut self, passes: u32) -> Self {
        self.resync_every = passes;
        self
    }

    pub fn slots(&self) -> &BTreeMap<u32, StreamSlot> {
        &self.slots
    }

    /// MAC -> slot id
    pub fn mapping(&self) -> BTreeMap<String, u32> {
        self.slots
            .values()
            .map(|s| (s.mac_address.clone(), s.slot_id))
            .collect()
    }

    pub fn confirmed(&self) -> &BTreeSet<u32> {
        &self.confirmed
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    pub fn stage(&self) -> PassStage {
        self.stage
    }

    pub fn needs_flush(&self) -> bool {
        self.needs_flush
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    /// Rows for the status API
    pub fn slot_statuses(&self) -> Vec<SlotStatus> {
        self.slots
            .values()
            .map(|slot| {
                let handle = self.supervisor.get(slot.slot_id);
                SlotStatus {
                    slot_id: slot.slot_id,
                    port: slot.port(),
                    mac_address: slot.mac_address.clone(),
                    ip_address: slot.ip_address.clone(),
                    location: slot.location.clone(),
                    confirmed: self.confirmed.contains(&slot.slot_id),
                    pid: handle.map(|h| h.pid()),
                    started_at: handle.map(|h| h.started_at),
                }
            })
            .collect()
    }

    /// Run one reconciliation pass
    pub async fn run_pass(&mut self) -> PassReport {
        if self.shutting_down {
            return PassReport::new(PassOutcome::ShuttingDown);
        }

        self.stage = PassStage::Fetching;
        let devices = match self.fleet.fetch().await {
            FetchResult::Devices(devices) => devices,
            FetchResult::Unavailable(reason) => {
                tracing::warn!(stage = "fetch", reason = %reason, "Skipping pass, fleet unavailable");
                self.stage = PassStage::Idle;
                return PassReport::new(PassOutcome::FleetUnavailable);
            }
        };

        self.stage = PassStage::Diffing;
        let live = live_devices(devices);
        let allocation = self
            .allocator
            .allocate(&self.mapping(), &live, &self.reserved);
        let desired = allocation.slots;

        let resync_due =
            self.resync_every > 0 && self.unchanged_passes + 1 >= self.resync_every;
        if !self.needs_flush && !self.pending && !resync_due && desired == self.slots {
            self.unchanged_passes += 1;
            let mut report = PassReport::new(PassOutcome::Unchanged);
            report.unallocated = allocation.unallocated;
            let active = Self::active(&desired, &self.confirmed);
            report.supervision = self.supervisor.reconcile(&active, &desired).await;
            tracing::debug!(slots = desired.len(), "Desired set unchanged, relay untouched");
            self.stage = PassStage::Idle;
            return report;
        }

        for (mac, slot_id) in &allocation.released {
            tracing::info!(mac = %mac, slot_id = *slot_id, "Device left, releasing slot");
        }

        self.unchanged_passes = 0;
        self.stage = PassStage::Applying;
        let mut report = PassReport::new(PassOutcome::Applied);
        report.unallocated = allocation.unallocated;

        let relay = self.relay.clone();
        let mut session = RelaySession::new(relay.as_ref());
        let applied = self.apply(&mut session, &desired, &mut report).await;

        self.stage = PassStage::TearingDown;
        session.close().await;
        self.stage = PassStage::Idle;

        let remote = match applied {
            Ok(remote) => remote,
            Err(e) => {
                tracing::warn!(error = %e, "Relay protocol failed, pass aborted with state kept");
                self.pending = true;
                report.outcome = PassOutcome::ProtocolAborted;
                return report;
            }
        };

        self.slots = desired;
        self.confirmed = remote;
        let confirmed = &self.confirmed;
        self.reserved.retain(|id| confirmed.contains(id));
        self.pending = !report.failed.is_empty();

        let active = Self::active(&self.slots, &self.confirmed);
        report.supervision = self.supervisor.reconcile(&active, &self.slots).await;

        tracing::info!(
            flushed = report.flushed,
            created = ?report.created,
            destroyed = ?report.destroyed,
            failed = ?report.failed,
            spawned = ?report.supervision.spawned,
            terminated = ?report.supervision.terminated,
            "Reconciliation pass applied"
        );
        report
    }

    /// Remote half of a pass. Errors are protocol-sequencing failures
    /// (session, attach, list); per-slot failures land in `report.failed`.
    async fn apply(
        &mut self,
        session: &mut RelaySession<'_>,
        desired: &BTreeMap<u32, StreamSlot>,
        report: &mut PassReport,
    ) -> Result<BTreeSet<u32>> {
        session.open().await?;
        session.attach().await?;
        let actual = session.list_streams().await?;

        let mut flush = self.needs_flush;
        if !flush && relay_was_reset(&self.confirmed, &actual) {
            tracing::warn!(
                confirmed = ?self.confirmed,
                listed = ?actual,
                "Relay lost every confirmed stream, flushing"
            );
            flush = true;
        }

        let desired_ids: BTreeSet<u32> = desired.keys().copied().collect();
        let plan = ReconcilePlan::compute(&desired_ids, &actual, flush, &self.stale);
        report.flushed = plan.flush;
        if plan.flush {
            tracing::info!(streams = ?actual, "Flushing relay streams");
        }

        let mut remote = actual;
        let mut stale = BTreeSet::new();

        for &slot_id in &plan.to_remove {
            let mac = self.slots.get(&slot_id).map(|s| s.mac_address.clone());
            let still_desired = desired.contains_key(&slot_id);

            match session.destroy_stream(slot_id).await {
                Ok(()) => {
                    remote.remove(&slot_id);
                    self.reserved.remove(&slot_id);
                    report.destroyed.push(slot_id);
                }
                Err(e) => {
                    tracing::warn!(
                        slot_id,
                        mac = ?mac,
                        stage = "destroy_stream",
                        error = %e,
                        "Stream destroy failed, retrying next pass"
                    );
                    report.failed.push(slot_id);
                    if still_desired {
                        stale.insert(slot_id);
                    } else {
                        self.reserved.insert(slot_id);
                    }
                }
            }
        }

        for &slot_id in &plan.to_add {
            // a destroy that failed leaves the stream in place
            if remote.contains(&slot_id) {
                continue;
            }
            let Some(slot) = desired.get(&slot_id) else {
                continue;
            };

            match session.create_stream(&self.template.config_for(slot)).await {
                Ok(()) => {
                    tracing::info!(
                        slot_id,
                        mac = %slot.mac_address,
                        ip = %slot.ip_address,
                        "Stream created"
                    );
                    remote.insert(slot_id);
                    report.created.push(slot_id);
                }
                Err(e) => {
                    tracing::warn!(
                        slot_id,
                        mac = %slot.mac_address,
                        stage = "create_stream",
                        error = %e,
                        "Stream create failed, retrying next pass"
                    );
                    report.failed.push(slot_id);
                }
            }
        }

        self.needs_flush = false;
        self.stale = stale;
        Ok(remote)
    }

    fn active(
        desired: &BTreeMap<u32, StreamSlot>,
        remote: &BTreeSet<u32>,
    ) -> BTreeMap<u32, StreamSlot> {
        desired
            .iter()
            .filter(|(slot_id, _)| remote.contains(slot_id))
            .map(|(slot_id, slot)| (*slot_id, slot.clone()))
            .collect()
    }

    /// Terminate every relay subprocess; later passes become no-ops.
    /// Returns how many processes were signalled.
    pub async fn shutdown(&mut self) -> usize {
        self.shutting_down = true;
        self.supervisor.shutdown_all().await
    }
}
