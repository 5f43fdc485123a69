//! Application configuration and shared state
//!
//! Holds the recognized configuration surface and the status snapshot the
//! controller publishes for the status API.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Default relay subprocess arguments (ffmpeg: device RTSP in, RTP out)
pub const DEFAULT_RELAY_ARGS: &str = "-nostdin -loglevel error -rtsp_transport tcp \
    -i rtsp://{ip}:554/stream1 -an -c:v copy -f rtp rtp://{rtp_host}:{port}";

/// Application configuration
#[derive(Debug, Clone, Parser)]
#[command(name = "camrelay-sync")]
#[command(about = "Keeps relayed camera streams in sync with the reachable device fleet")]
pub struct AppConfig {
    /// Fleet status endpoint returning the device list
    #[arg(
        long,
        env = "FLEET_ENDPOINT",
        default_value = "http://127.0.0.1:8000/api/devices/statuses/"
    )]
    pub fleet_endpoint: String,

    /// Media relay server (Janus HTTP transport) URL
    #[arg(long, env = "RELAY_URL", default_value = "http://127.0.0.1:8088/janus")]
    pub relay_url: String,

    /// Relay plugin to attach to
    #[arg(long, env = "RELAY_PLUGIN", default_value = "janus.plugin.streaming")]
    pub relay_plugin: String,

    /// Seconds between reconciliation passes
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value_t = 10)]
    pub poll_interval_secs: u64,

    /// First slot id (also the first RTP port)
    #[arg(long, env = "SLOT_BASE", default_value_t = 5000)]
    pub slot_base: u32,

    /// Number of slot ids available above the base
    #[arg(long, env = "SLOT_CAPACITY", default_value_t = 100)]
    pub slot_capacity: u32,

    /// Verify the relay after this many unchanged passes (0 disables)
    #[arg(long, env = "RESYNC_EVERY_PASSES", default_value_t = 30)]
    pub resync_every_passes: u32,

    /// Per-call network timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 5)]
    pub request_timeout_secs: u64,

    /// Grace period before a relay process group is force-killed
    #[arg(long, env = "TERMINATION_GRACE_SECS", default_value_t = 5)]
    pub termination_grace_secs: u64,

    /// Optional secret set on created streams
    #[arg(long, env = "STREAM_SECRET")]
    pub stream_secret: Option<String>,

    #[arg(long, env = "VIDEO_CODEC", default_value = "h264")]
    pub video_codec: String,

    #[arg(long, env = "VIDEO_PT", default_value_t = 96)]
    pub video_pt: u8,

    /// Relay subprocess program
    #[arg(long, env = "RELAY_PROGRAM", default_value = "ffmpeg")]
    pub relay_program: String,

    /// Relay subprocess argument template ({ip} {port} {slot} {mac} {rtp_host})
    #[arg(long, env = "RELAY_ARGS", default_value = DEFAULT_RELAY_ARGS)]
    pub relay_args: String,

    /// Host the relay subprocess pushes RTP to
    #[arg(long, env = "RELAY_RTP_HOST", default_value = "127.0.0.1")]
    pub rtp_host: String,

    /// Status API listen address (disabled when unset)
    #[arg(long, env = "STATUS_ADDR")]
    pub status_addr: Option<SocketAddr>,
}

impl AppConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_secs(self.termination_grace_secs)
    }

    /// Reject configurations the controller cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(Error::Config("poll interval must be at least 1s".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config("request timeout must be at least 1s".to_string()));
        }
        if self.slot_capacity == 0 {
            return Err(Error::Config("slot capacity must be positive".to_string()));
        }
        if self.slot_base == 0
            || u64::from(self.slot_base) + u64::from(self.slot_capacity) > u64::from(u16::MAX) + 1
        {
            return Err(Error::Config(format!(
                "slot range {}..{} does not fit the port space",
                self.slot_base,
                u64::from(self.slot_base) + u64::from(self.slot_capacity)
            )));
        }
        for (name, url) in [("fleet endpoint", &self.fleet_endpoint), ("relay URL", &self.relay_url)] {
            reqwest::Url::parse(url)
                .map_err(|e| Error::Config(format!("invalid {} {:?}: {}", name, url, e)))?;
        }
        if self.relay_program.trim().is_empty() {
            return Err(Error::Config("relay program must not be empty".to_string()));
        }
        for placeholder in ["{ip}", "{port}"] {
            if !self.relay_args.contains(placeholder) {
                return Err(Error::Config(format!(
                    "relay args template is missing {}",
                    placeholder
                )));
            }
        }
        Ok(())
    }
}

/// One row of the published slot table
#[derive(Debug, Clone, Serialize)]
pub struct SlotStatus {
    pub slot_id: u32,
    pub port: u32,
    pub mac_address: String,
    pub ip_address: String,
    pub location: String,
    pub confirmed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

impl SlotStatus {
    /// Stream confirmed on the relay and its relay subprocess running
    pub fn is_active(&self) -> bool {
        self.confirmed && self.pid.is_some()
    }
}

/// How the last pass ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassOutcome {
    Applied,
    Unchanged,
    FleetUnavailable,
    ProtocolAborted,
    ShuttingDown,
}

/// Snapshot of the controller, published after every pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct ControllerStatus {
    pub passes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_pass_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<PassOutcome>,
    pub slots: Vec<SlotStatus>,
}

/// Application state shared with the status API
#[derive(Clone, Default)]
pub struct AppState {
    pub status: Arc<RwLock<ControllerStatus>>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }
}
