//! RelayClient - Janus Streaming Plugin Adapter
//!
//! ## Responsibilities
//!
//! - Session/handle RPC against the media relay server (Janus HTTP transport)
//! - Mountpoint list/create/destroy through the streaming plugin
//! - Per-pass session lifecycle (see `session`)
//!
//! Every response must carry `"janus":"success"`; anything else fails that
//! call only.

mod session;
mod types;

pub use session::{RelaySession, SessionState};
pub use types::*;

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Duration;

/// Stateful relay protocol, one method per RPC
#[async_trait]
pub trait RelayApi: Send + Sync {
    async fn create_session(&self) -> Result<u64>;
    async fn attach(&self, session: u64) -> Result<u64>;
    async fn list_streams(&self, session: u64, handle: u64) -> Result<BTreeSet<u32>>;
    async fn create_stream(&self, session: u64, handle: u64, stream: &StreamConfig) -> Result<()>;
    /// "Already gone" counts as success
    async fn destroy_stream(&self, session: u64, handle: u64, stream_id: u32) -> Result<()>;
    async fn detach(&self, session: u64, handle: u64) -> Result<()>;
    async fn destroy_session(&self, session: u64) -> Result<()>;
}

/// Janus HTTP client
pub struct JanusClient {
    client: reqwest::Client,
    base_url: String,
    plugin: String,
    secret: Option<String>,
}

impl JanusClient {
    pub fn new(
        base_url: String,
        plugin: String,
        secret: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create relay HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            plugin,
            secret,
        })
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        stage: &'static str,
        url: String,
        request: &T,
    ) -> Result<JanusResponse> {
        let resp = self.client.post(&url).json(request).send().await?;

        if !resp.status().is_success() {
            return Err(Error::protocol(stage, format!("HTTP {}", resp.status())));
        }

        let body: JanusResponse = resp.json().await?;

        if body.janus != "success" {
            let detail = body
                .error
                .map(|e| format!("{} ({})", e.reason, e.code))
                .unwrap_or_else(|| format!("janus={}", body.janus));
            return Err(Error::protocol(stage, detail));
        }

        tracing::trace!(stage = stage, url = %url, "Relay call succeeded");
        Ok(body)
    }

    /// Plugin message; returns the plugin payload or its error code
    async fn message(
        &self,
        stage: &'static str,
        session: u64,
        handle: u64,
        body: &PluginRequest,
    ) -> Result<std::result::Result<serde_json::Value, (i64, String)>> {
        let url = format!("{}/{}/{}", self.base_url, session, handle);
        let resp = self.post(stage, url, &JanusRequest::message(body)).await?;

        let plugindata = resp
            .plugindata
            .ok_or_else(|| Error::protocol(stage, "response without plugindata"))?;

        Ok(match plugindata.error() {
            Some(err) => Err(err),
            None => Ok(plugindata.data),
        })
    }

    fn id_of(stage: &'static str, resp: JanusResponse) -> Result<u64> {
        resp.data
            .map(|d| d.id)
            .ok_or_else(|| Error::protocol(stage, "response without data.id"))
    }
}

#[async_trait]
impl RelayApi for JanusClient {
    async fn create_session(&self) -> Result<u64> {
        let resp = self
            .post("create_session", self.base_url.clone(), &JanusRequest::new("create"))
            .await?;
        Self::id_of("create_session", resp)
    }

    async fn attach(&self, session: u64) -> Result<u64> {
        let url = format!("{}/{}", self.base_url, session);
        let resp = self.post("attach", url, &JanusRequest::attach(&self.plugin)).await?;
        Self::id_of("attach", resp)
    }

    async fn list_streams(&self, session: u64, handle: u64) -> Result<BTreeSet<u32>> {
        let data = self
            .message("list", session, handle, &PluginRequest::List)
            .await?
            .map_err(|(code, reason)| Error::protocol("list", format!("{} ({})", reason, code)))?;

        let entries: Vec<MountpointEntry> = match data.get("list") {
            Some(list) => serde_json::from_value(list.clone())?,
            None => return Err(Error::protocol("list", "plugin data without list")),
        };

        let mut ids = BTreeSet::new();
        for entry in entries {
            match entry.id.as_u64().and_then(|id| u32::try_from(id).ok()) {
                Some(id) => {
                    ids.insert(id);
                }
                None => {
                    tracing::warn!(
                        id = %entry.id,
                        description = ?entry.description,
                        "Ignoring mountpoint outside the slot id space"
                    );
                }
            }
        }
        Ok(ids)
    }

    async fn create_stream(&self, session: u64, handle: u64, stream: &StreamConfig) -> Result<()> {
        let body = PluginRequest::Create(stream.clone());
        self.message("create_stream", session, handle, &body)
            .await?
            .map(|_| ())
            .map_err(|(code, reason)| {
                Error::protocol("create_stream", format!("{} ({})", reason, code))
            })
    }

    async fn destroy_stream(&self, session: u64, handle: u64, stream_id: u32) -> Result<()> {
        let body = PluginRequest::Destroy {
            id: stream_id,
            secret: self.secret.clone(),
        };
        match self.message("destroy_stream", session, handle, &body).await? {
            Ok(_) => Ok(()),
            Err((ERROR_NO_SUCH_MOUNTPOINT, _)) => {
                tracing::debug!(slot_id = stream_id, "Stream already gone on relay");
                Ok(())
            }
            Err((code, reason)) => Err(Error::protocol(
                "destroy_stream",
                format!("{} ({})", reason, code),
            )),
        }
    }

    async fn detach(&self, session: u64, handle: u64) -> Result<()> {
        let url = format!("{}/{}/{}", self.base_url, session, handle);
        self.post("detach", url, &JanusRequest::new("detach")).await?;
        Ok(())
    }

    async fn destroy_session(&self, session: u64) -> Result<()> {
        let url = format!("{}/{}", self.base_url, session);
        self.post("destroy_session", url, &JanusRequest::new("destroy"))
            .await?;
        Ok(())
    }
}
