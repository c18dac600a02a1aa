use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    status: String,
    timestamp: String,
    uptime_seconds: u64,
    environment: String,
    mode: String,
    version: String,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: state.started_at.elapsed().as_secs(),
            environment: state.settings.server.environment.clone(),
            mode: state.mode.name().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

pub async fn service_info() -> Json<Value> {
    Json(json!({
        "name": "editstream-server",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "GET /health",
            "edit": "POST /api/agentic/edit",
            "inpaint": "POST /api/images/inpaint"
        }
    }))
}
