//! WebAPI - Read-only Status Endpoints
//!
//! ## Responsibilities
//!
//! - Health of the reconciliation loop
//! - Current slot table (slot, device, relay pid)

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.status.read().await;

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "passes": status.passes,
        "last_pass_at": status.last_pass_at,
        "last_outcome": status.last_outcome,
        "slots": status.slots.len(),
        "active_slots": status.slots.iter().filter(|s| s.is_active()).count(),
    }))
}
