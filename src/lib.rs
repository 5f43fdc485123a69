//! camrelay-sync Library
//!
//! Keeps the relayed camera streams of a media relay server in sync with the
//! devices the fleet status service reports as reachable.
//!
//! ## Architecture (leaves first)
//!
//! 1. FleetClient - desired device list
//! 2. SlotAllocator - stable MAC -> slot id / port mapping
//! 3. RelayClient - Janus session/handle protocol
//! 4. ProcessSupervisor - one relay subprocess per active slot
//! 5. Reconciler - per-pass diff/apply, control loop and shutdown
//! 6. WebAPI - read-only status endpoints
//!
//! ## Design Principles
//!
//! - The relay's stream list is authoritative for what exists remotely
//! - A failed pass never corrupts the slot or process table
//! - Every relay session opened in a pass is closed in that pass

pub mod error;
pub mod fleet_client;
pub mod process_supervisor;
pub mod reconciler;
pub mod relay_client;
pub mod slot_allocator;
pub mod state;
pub mod web_api;

pub use error::{Error, Result};
pub use state::{AppConfig, AppState};
