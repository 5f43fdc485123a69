//! Per-pass relay session
//!
//! `Unconnected -> SessionCreated -> PluginAttached -> Listed -> Detached -> Closed`.
//! `close` is always called by the owner; it detaches and destroys whatever
//! was actually created and logs (never returns) teardown failures.

use super::{RelayApi, StreamConfig};
use crate::error::{Error, Result};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconnected,
    SessionCreated,
    PluginAttached,
    /// Stream list read; creates and destroys keep this state
    Listed,
    Detached,
    Closed,
}

pub struct RelaySession<'a> {
    api: &'a dyn RelayApi,
    state: SessionState,
    session_id: Option<u64>,
    handle_id: Option<u64>,
    created: BTreeSet<u32>,
}

impl<'a> RelaySession<'a> {
    pub fn new(api: &'a dyn RelayApi) -> Self {
        Self {
            api,
            state: SessionState::Unconnected,
            session_id: None,
            handle_id: None,
            created: BTreeSet::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub async fn open(&mut self) -> Result<()> {
        if self.state != SessionState::Unconnected {
            return Err(Error::protocol("create_session", "session already opened"));
        }
        let session = self.api.create_session().await?;
        tracing::debug!(session_id = session, "Relay session created");
        self.session_id = Some(session);
        self.state = SessionState::SessionCreated;
        Ok(())
    }

    pub async fn attach(&mut self) -> Result<()> {
        let session = match (self.state, self.session_id) {
            (SessionState::SessionCreated, Some(session)) => session,
            _ => return Err(Error::protocol("attach", "no open session")),
        };
        let handle = self.api.attach(session).await?;
        tracing::debug!(session_id = session, handle_id = handle, "Relay plugin attached");
        self.handle_id = Some(handle);
        self.state = SessionState::PluginAttached;
        Ok(())
    }

    fn attached(&self, stage: &'static str) -> Result<(u64, u64)> {
        match (self.state, self.session_id, self.handle_id) {
            (SessionState::PluginAttached | SessionState::Listed, Some(session), Some(handle)) => {
                Ok((session, handle))
            }
            _ => Err(Error::protocol(stage, "plugin not attached")),
        }
    }

    pub async fn list_streams(&mut self) -> Result<BTreeSet<u32>> {
        let (session, handle) = self.attached("list")?;
        let streams = self.api.list_streams(session, handle).await?;
        self.state = SessionState::Listed;
        Ok(streams)
    }

    /// Issues at most one create per stream id for the lifetime of the session
    pub async fn create_stream(&mut self, stream: &StreamConfig) -> Result<()> {
        let (session, handle) = self.attached("create_stream")?;
        if !self.created.insert(stream.id) {
            return Err(Error::protocol(
                "create_stream",
                format!("stream {} already created in this pass", stream.id),
            ));
        }
        self.api.create_stream(session, handle, stream).await
    }

    pub async fn destroy_stream(&self, stream_id: u32) -> Result<()> {
        let (session, handle) = self.attached("destroy_stream")?;
        self.api.destroy_stream(session, handle, stream_id).await
    }

    /// Detach then destroy, each only if its prerequisite exists
    pub async fn close(&mut self) {
        if let (Some(session), Some(handle)) = (self.session_id, self.handle_id.take()) {
            if let Err(e) = self.api.detach(session, handle).await {
                tracing::warn!(
                    session_id = session,
                    handle_id = handle,
                    error = %e,
                    stage = "detach",
                    "Relay detach failed"
                );
            }
            self.state = SessionState::Detached;
        }

        if let Some(session) = self.session_id.take() {
            if let Err(e) = self.api.destroy_session(session).await {
                tracing::warn!(
                    session_id = session,
                    error = %e,
                    stage = "destroy_session",
                    "Relay session destroy failed"
                );
            }
            tracing::debug!(session_id = session, "Relay session closed");
        }

        self.state = SessionState::Closed;
    }
}
