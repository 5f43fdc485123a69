//! SlotAllocator - Stable Stream Slot Assignment
//!
//! ## Responsibilities
//!
//! - Map each live device (by MAC) to a numeric slot id / RTP port
//! - Keep a device's slot for as long as it stays live
//! - Hand newly-live devices the lowest free id, in MAC order
//!
//! Ids released in a pass are only reusable from the next pass on, so a
//! stream torn down for one device is never re-labelled for another within
//! the same pass.

use crate::fleet_client::Device;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// One relayed stream bound to a live device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamSlot {
    pub slot_id: u32,
    pub mac_address: String,
    pub ip_address: String,
    pub location: String,
}

impl StreamSlot {
    /// Transport port; the relay binds the stream's RTP port to the slot id
    pub fn port(&self) -> u32 {
        self.slot_id
    }
}

/// Outcome of one allocation round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allocation {
    /// Desired slots keyed by slot id
    pub slots: BTreeMap<u32, StreamSlot>,
    /// MAC -> id of devices that left the live set
    pub released: BTreeMap<String, u32>,
    /// Live devices that found no free id (range exhausted)
    pub unallocated: Vec<String>,
}

impl Allocation {
    /// MAC -> slot id view, the input of the next round
    pub fn mapping(&self) -> BTreeMap<String, u32> {
        self.slots
            .values()
            .map(|s| (s.mac_address.clone(), s.slot_id))
            .collect()
    }
}

/// Allocates slot ids from `[base, base + capacity)`
#[derive(Debug, Clone, Copy)]
pub struct SlotAllocator {
    base: u32,
    capacity: u32,
}

impl SlotAllocator {
    pub fn new(base: u32, capacity: u32) -> Self {
        Self { base, capacity }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    fn range(&self) -> std::ops::Range<u32> {
        self.base..self.base.saturating_add(self.capacity)
    }

    /// Compute the new mapping from the previous one and the live devices.
    ///
    /// `reserved` ids are never handed out (remote streams whose teardown is
    /// still pending).
    pub fn allocate(
        &self,
        previous: &BTreeMap<String, u32>,
        live: &[Device],
        reserved: &BTreeSet<u32>,
    ) -> Allocation {
        let by_mac: BTreeMap<&str, &Device> =
            live.iter().map(|d| (d.mac_address.as_str(), d)).collect();

        let mut allocation = Allocation::default();
        let mut blocked: BTreeSet<u32> = reserved.clone();

        for (mac, &slot_id) in previous {
            blocked.insert(slot_id);
            match by_mac.get(mac.as_str()) {
                Some(device) => {
                    allocation.slots.insert(slot_id, Self::slot_for(slot_id, device));
                }
                None => {
                    allocation.released.insert(mac.clone(), slot_id);
                }
            }
        }

        let mut candidates = self.range().filter(|id| !blocked.contains(id));

        for (mac, device) in &by_mac {
            if previous.contains_key(*mac) {
                continue;
            }
            match candidates.next() {
                Some(slot_id) => {
                    tracing::debug!(mac = %mac, slot_id = slot_id, "Slot assigned");
                    allocation.slots.insert(slot_id, Self::slot_for(slot_id, device));
                }
                None => {
                    tracing::warn!(
                        mac = %mac,
                        base = self.base,
                        capacity = self.capacity,
                        "Slot range exhausted, device left without a stream"
                    );
                    allocation.unallocated.push(mac.to_string());
                }
            }
        }

        allocation
    }

    fn slot_for(slot_id: u32, device: &Device) -> StreamSlot {
        StreamSlot {
            slot_id,
            mac_address: device.mac_address.clone(),
            ip_address: device.ip_address.clone(),
            location: device.location.clone(),
        }
    }
}
