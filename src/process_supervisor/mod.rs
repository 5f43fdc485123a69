//! ProcessSupervisor - Relay Subprocess Table
//!
//! ## Responsibilities
//!
//! - One relay subprocess per active slot
//! - Purge stale handles (dead pid) before relaunching
//! - Process-group termination: SIGTERM, grace period, SIGKILL
//!
//! A handle leaves the table only after at least one termination attempt,
//! whether or not that attempt succeeded.

mod launcher;

pub use launcher::{
    CommandLauncher, GroupSignal, OsRelayProcess, RelayLauncher, RelayProcess,
};

use crate::slot_allocator::StreamSlot;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// How long to wait for a SIGKILLed group before giving up on it
const KILL_WAIT: Duration = Duration::from_secs(2);

/// Tracked relay subprocess
pub struct RelayProcessHandle {
    pub slot: StreamSlot,
    pub started_at: DateTime<Utc>,
    process: Box<dyn RelayProcess>,
}

impl RelayProcessHandle {
    pub fn pid(&self) -> u32 {
        self.process.pid()
    }

    fn serves(&self, slot: &StreamSlot) -> bool {
        self.slot.mac_address == slot.mac_address && self.slot.ip_address == slot.ip_address
    }
}

/// Result of terminating one process group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exited within the grace period
    Graceful,
    /// Needed SIGKILL
    Killed,
    /// Still running after SIGKILL; handle dropped anyway
    Unkillable,
}

/// What one reconcile call did, by slot id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupervisionReport {
    pub spawned: Vec<u32>,
    pub terminated: Vec<u32>,
    pub purged: Vec<u32>,
    pub spawn_failed: Vec<u32>,
}

impl SupervisionReport {
    pub fn is_empty(&self) -> bool {
        self.spawned.is_empty()
            && self.terminated.is_empty()
            && self.purged.is_empty()
            && self.spawn_failed.is_empty()
    }
}

/// Owns the relay process table
pub struct ProcessSupervisor {
    launcher: Arc<dyn RelayLauncher>,
    grace: Duration,
    table: BTreeMap<u32, RelayProcessHandle>,
}

impl ProcessSupervisor {
    pub fn new(launcher: Arc<dyn RelayLauncher>, grace: Duration) -> Self {
        Self {
            launcher,
            grace,
            table: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn get(&self, slot_id: u32) -> Option<&RelayProcessHandle> {
        self.table.get(&slot_id)
    }

    pub fn handles(&self) -> impl Iterator<Item = &RelayProcessHandle> {
        self.table.values()
    }

    /// Bring the table in line with `active` (run a relay) and `desired`
    /// (may keep an existing relay). Handles outside `desired` are terminated.
    pub async fn reconcile(
        &mut self,
        active: &BTreeMap<u32, StreamSlot>,
        desired: &BTreeMap<u32, StreamSlot>,
    ) -> SupervisionReport {
        let mut report = SupervisionReport::default();

        let leaving: Vec<u32> = self
            .table
            .iter()
            .filter(|(slot_id, handle)| match desired.get(slot_id) {
                Some(slot) => !handle.serves(slot),
                None => true,
            })
            .map(|(slot_id, _)| *slot_id)
            .collect();

        for slot_id in leaving {
            if self.terminate_slot(slot_id).await.is_some() {
                report.terminated.push(slot_id);
            }
        }

        for (slot_id, slot) in active {
            if let Some(handle) = self.table.get_mut(slot_id) {
                if handle.process.is_alive() {
                    continue;
                }
                tracing::warn!(
                    slot_id = *slot_id,
                    mac = %handle.slot.mac_address,
                    pid = handle.pid(),
                    "Relay subprocess died, purging stale handle"
                );
                self.terminate_slot(*slot_id).await;
                report.purged.push(*slot_id);
            }

            if self.spawn(slot) {
                report.spawned.push(*slot_id);
            } else {
                report.spawn_failed.push(*slot_id);
            }
        }

        report
    }

    fn spawn(&mut self, slot: &StreamSlot) -> bool {
        match self.launcher.launch(slot) {
            Ok(process) => {
                tracing::info!(
                    slot_id = slot.slot_id,
                    mac = %slot.mac_address,
                    ip = %slot.ip_address,
                    pid = process.pid(),
                    "Relay subprocess started"
                );
                self.table.insert(
                    slot.slot_id,
                    RelayProcessHandle {
                        slot: slot.clone(),
                        started_at: Utc::now(),
                        process,
                    },
                );
                true
            }
            Err(e) => {
                tracing::warn!(
                    slot_id = slot.slot_id,
                    mac = %slot.mac_address,
                    stage = "spawn",
                    error = %e,
                    "Relay subprocess failed to start"
                );
                false
            }
        }
    }

    /// Terminate and forget the relay of `slot_id`, if any
    pub async fn terminate_slot(&mut self, slot_id: u32) -> Option<Termination> {
        let mut handle = self.table.remove(&slot_id)?;
        Some(Self::terminate(&mut handle, self.grace).await)
    }

    /// Terminate every tracked relay. Safe to call repeatedly.
    pub async fn shutdown_all(&mut self) -> usize {
        let slot_ids: Vec<u32> = self.table.keys().copied().collect();
        if !slot_ids.is_empty() {
            tracing::info!(count = slot_ids.len(), "Terminating all relay subprocesses");
        }
        for slot_id in &slot_ids {
            self.terminate_slot(*slot_id).await;
        }
        slot_ids.len()
    }

    async fn terminate(handle: &mut RelayProcessHandle, grace: Duration) -> Termination {
        let slot_id = handle.slot.slot_id;
        let pid = handle.pid();
        let mac = handle.slot.mac_address.clone();

        if let Err(e) = handle.process.signal_group(GroupSignal::Terminate) {
            tracing::warn!(slot_id, pid, mac = %mac, error = %e, "SIGTERM to relay group failed");
        }
        if handle.process.wait_exit(grace).await {
            tracing::info!(slot_id, pid, mac = %mac, "Relay subprocess stopped");
            return Termination::Graceful;
        }

        tracing::warn!(
            slot_id,
            pid,
            mac = %mac,
            grace_ms = grace.as_millis() as u64,
            "Relay ignored SIGTERM, escalating to SIGKILL"
        );
        if let Err(e) = handle.process.signal_group(GroupSignal::Kill) {
            tracing::error!(slot_id, pid, mac = %mac, error = %e, "SIGKILL to relay group failed");
        }
        if handle.process.wait_exit(KILL_WAIT).await {
            return Termination::Killed;
        }

        tracing::error!(
            slot_id,
            pid,
            mac = %mac,
            "Relay subprocess survived SIGKILL, dropping handle"
        );
        Termination::Unkillable
    }
}
