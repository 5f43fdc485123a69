//! Fleet status types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Device record as served by the fleet status service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub mac_address: String,
    pub ip_address: String,
    #[serde(default)]
    pub location: String,
    pub is_up: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_uptime: Option<DateTime<Utc>>,
    /// Stream id the store may have recorded for this device (informational)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<i64>,
}

impl Device {
    /// Minimal live record, used by tests and fakes
    pub fn live(mac: &str, ip: &str, location: &str) -> Self {
        Self {
            mac_address: mac.to_string(),
            ip_address: ip.to_string(),
            location: location.to_string(),
            is_up: true,
            version: None,
            last_seen: None,
            initial_uptime: None,
            stream_id: None,
        }
    }
}

/// Result of one fleet fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    Devices(Vec<Device>),
    /// Fleet store unreachable, non-200 or malformed; the reason is for logs only
    Unavailable(String),
}
