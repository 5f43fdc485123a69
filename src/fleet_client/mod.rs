//! FleetClient - Fleet Status Service Adapter
//!
//! ## Responsibilities
//!
//! - Fetch the desired device list (single GET, bounded timeout)
//! - Collapse every failure into `FetchResult::Unavailable`
//! - Filter the live set handed to the slot allocator

mod types;

pub use types::*;

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;

/// Source of the desired device list
#[async_trait]
pub trait FleetSource: Send + Sync {
    async fn fetch(&self) -> FetchResult;
}

/// HTTP client for the fleet status service
pub struct FleetClient {
    client: reqwest::Client,
    endpoint: String,
}

impl FleetClient {
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create fleet HTTP client: {}", e)))?;

        Ok(Self { client, endpoint })
    }

    async fn fetch_devices(&self) -> Result<Vec<Device>> {
        let resp = self.client.get(&self.endpoint).send().await?;

        if resp.status() != reqwest::StatusCode::OK {
            return Err(Error::Fleet(format!(
                "fleet status service returned {}",
                resp.status()
            )));
        }

        let body = resp.bytes().await?;
        let devices: Vec<Device> = serde_json::from_slice(&body)?;
        Ok(devices)
    }
}

#[async_trait]
impl FleetSource for FleetClient {
    async fn fetch(&self) -> FetchResult {
        match self.fetch_devices().await {
            Ok(devices) => {
                tracing::debug!(
                    endpoint = %self.endpoint,
                    count = devices.len(),
                    "Fetched fleet status"
                );
                FetchResult::Devices(devices)
            }
            Err(e) => {
                tracing::warn!(
                    endpoint = %self.endpoint,
                    error = %e,
                    "Fleet status unavailable"
                );
                FetchResult::Unavailable(e.to_string())
            }
        }
    }
}

/// Devices reported up, one record per MAC (first occurrence wins)
pub fn live_devices(devices: Vec<Device>) -> Vec<Device> {
    let mut seen = HashSet::new();
    devices
        .into_iter()
        .filter(|d| d.is_up)
        .filter(|d| {
            let fresh = seen.insert(d.mac_address.clone());
            if !fresh {
                tracing::warn!(
                    mac = %d.mac_address,
                    ip = %d.ip_address,
                    "Duplicate MAC in fleet status, ignoring later record"
                );
            }
            fresh
        })
        .collect()
}
