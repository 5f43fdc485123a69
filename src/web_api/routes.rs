//! API Routes

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};

use crate::error::{Error, Result};
use crate::state::{AppState, SlotStatus};

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(super::health_check))
        .route("/api/slots", get(list_slots))
        .route("/api/slots/:slot_id", get(get_slot))
        .with_state(state)
}

async fn list_slots(State(state): State<AppState>) -> Json<Vec<SlotStatus>> {
    Json(state.status.read().await.slots.clone())
}

async fn get_slot(
    State(state): State<AppState>,
    Path(slot_id): Path<u32>,
) -> Result<Json<SlotStatus>> {
    state
        .status
        .read()
        .await
        .slots
        .iter()
        .find(|s| s.slot_id == slot_id)
        .cloned()
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("slot {}", slot_id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::PassOutcome;
    use serde_json::Value;

    async fn serve(state: AppState) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, create_router(state)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn slot(slot_id: u32) -> SlotStatus {
        SlotStatus {
            slot_id,
            port: slot_id,
            mac_address: "aa:bb".to_string(),
            ip_address: "10.0.0.1".to_string(),
            location: "Gate".to_string(),
            confirmed: true,
            pid: Some(4242),
            started_at: None,
        }
    }

    #[tokio::test]
    async fn test_health_reports_last_pass() {
        let state = AppState::new();
        {
            let mut status = state.status.write().await;
            status.passes = 3;
            status.last_outcome = Some(PassOutcome::Unchanged);
            let mut unconfirmed = slot(5001);
            unconfirmed.confirmed = false;
            unconfirmed.pid = None;
            let mut not_running = slot(5002);
            not_running.pid = None;
            status.slots = vec![slot(5000), unconfirmed, not_running];
        }
        let base = serve(state).await;

        let body: Value = reqwest::get(format!("{}/api/health", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["passes"], 3);
        assert_eq!(body["last_outcome"], "unchanged");
        assert_eq!(body["slots"], 3);
        assert_eq!(body["active_slots"], 1);
    }

    #[tokio::test]
    async fn test_slot_lookup() {
        let state = AppState::new();
        state.status.write().await.slots = vec![slot(5000), slot(5001)];
        let base = serve(state).await;

        let list: Value = reqwest::get(format!("{}/api/slots", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(list.as_array().unwrap().len(), 2);

        let one: Value = reqwest::get(format!("{}/api/slots/5001", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(one["pid"], 4242);

        let missing = reqwest::get(format!("{}/api/slots/6000", base)).await.unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
    }
}
