//! Control loop and shutdown path
//!
//! The engine sits behind one mutex shared by the ticking loop and the
//! shutdown path, so shutdown waits for an in-flight pass and then runs the
//! same termination routine as slot removal.

use super::{PassReport, ReconciliationEngine};
use crate::state::AppState;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub struct Controller {
    engine: Arc<Mutex<ReconciliationEngine>>,
    state: AppState,
    interval: Duration,
}

impl Controller {
    pub fn new(engine: ReconciliationEngine, state: AppState, interval: Duration) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            state,
            interval,
        }
    }

    pub fn engine(&self) -> Arc<Mutex<ReconciliationEngine>> {
        self.engine.clone()
    }

    /// Tick until `shutdown` is cancelled, then terminate every relay
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval_secs = self.interval.as_secs(), "Reconciliation loop started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_pass().await;
                }
            }
        }

        let terminated = self.shutdown().await;
        tracing::info!(terminated, "Reconciliation loop stopped");
    }

    /// One pass, then publish the status snapshot
    pub async fn run_pass(&self) -> PassReport {
        let mut engine = self.engine.lock().await;
        let report = engine.run_pass().await;

        let mut status = self.state.status.write().await;
        status.passes += 1;
        status.last_pass_at = Some(Utc::now());
        status.last_outcome = Some(report.outcome);
        status.slots = engine.slot_statuses();

        report
    }

    /// Terminate all tracked relays. Waits for a running pass; repeat calls
    /// find an empty table.
    pub async fn shutdown(&self) -> usize {
        let mut engine = self.engine.lock().await;
        let terminated = engine.shutdown().await;
        self.state.status.write().await.slots = engine.slot_statuses();
        terminated
    }
}

/// Resolves on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("SIGINT received"),
        _ = terminate => tracing::info!("SIGTERM received"),
    }
}
