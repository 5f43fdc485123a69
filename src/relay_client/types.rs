//! Janus HTTP transport message types

use crate::slot_allocator::StreamSlot;
use serde::{Deserialize, Serialize};

/// Streaming plugin error: no such mountpoint
pub const ERROR_NO_SUCH_MOUNTPOINT: i64 = 455;

/// Outgoing request envelope
#[derive(Debug, Clone, Serialize)]
pub struct JanusRequest<'a> {
    pub janus: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<&'a PluginRequest>,
    pub transaction: String,
}

impl<'a> JanusRequest<'a> {
    pub fn new(janus: &'static str) -> Self {
        Self {
            janus,
            plugin: None,
            body: None,
            transaction: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn attach(plugin: &'a str) -> Self {
        Self {
            plugin: Some(plugin),
            ..Self::new("attach")
        }
    }

    pub fn message(body: &'a PluginRequest) -> Self {
        Self {
            body: Some(body),
            ..Self::new("message")
        }
    }
}

/// Streaming plugin request body
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "request", rename_all = "lowercase")]
pub enum PluginRequest {
    List,
    Create(StreamConfig),
    Destroy {
        id: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        secret: Option<String>,
    },
}

/// Mountpoint definition sent with a create request.
///
/// Field order is the wire order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: u32,
    pub description: String,
    pub audio: bool,
    pub video: bool,
    pub videoport: u32,
    pub videopt: u8,
    pub videocodec: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    pub permanent: bool,
}

/// Media parameters shared by every created stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTemplate {
    pub video_codec: String,
    pub video_pt: u8,
    pub secret: Option<String>,
}

impl Default for StreamTemplate {
    fn default() -> Self {
        Self {
            video_codec: "h264".to_string(),
            video_pt: 96,
            secret: None,
        }
    }
}

impl StreamTemplate {
    pub fn config_for(&self, slot: &StreamSlot) -> StreamConfig {
        StreamConfig {
            kind: "rtp".to_string(),
            id: slot.slot_id,
            description: format!("Location: {}, port: {}", slot.location, slot.port()),
            audio: false,
            video: true,
            videoport: slot.port(),
            videopt: self.video_pt,
            videocodec: self.video_codec.clone(),
            secret: self.secret.clone(),
            permanent: false,
        }
    }
}

/// Response envelope
#[derive(Debug, Clone, Deserialize)]
pub struct JanusResponse {
    pub janus: String,
    #[serde(default)]
    pub data: Option<IdData>,
    #[serde(default)]
    pub plugindata: Option<PluginData>,
    #[serde(default)]
    pub error: Option<JanusError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdData {
    pub id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginData {
    #[serde(default)]
    pub plugin: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl PluginData {
    /// Plugin-level error carried inside a "success" envelope
    pub fn error(&self) -> Option<(i64, String)> {
        let code = self.data.get("error_code")?.as_i64()?;
        let reason = self
            .data
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Some((code, reason))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JanusError {
    pub code: i64,
    #[serde(default)]
    pub reason: String,
}

/// One entry of a list response
#[derive(Debug, Clone, Deserialize)]
pub struct MountpointEntry {
    pub id: serde_json::Value,
    #[serde(default)]
    pub description: Option<String>,
}
