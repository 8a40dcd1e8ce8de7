use std::time::SystemTime;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/live", get(live))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    store_records: usize,
    pending_attempts: usize,
    persist_mode: &'static str,
    started_at: String,
    timestamp: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LivenessResponse {
    status: &'static str,
    uptime: u64,
    timestamp: String,
}

async fn root(State(state): State<AppState>) -> Response {
    let engine = state.engine();
    Json(HealthResponse {
        status: "ok",
        store_records: engine.store().record_count(),
        pending_attempts: engine.pending_count(),
        persist_mode: engine.persist_mode().as_str(),
        started_at: system_time_iso(state.started_at_system()),
        timestamp: now_iso(),
    })
    .into_response()
}

async fn live(State(state): State<AppState>) -> Response {
    Json(LivenessResponse {
        status: "healthy",
        uptime: state.uptime_seconds(),
        timestamp: now_iso(),
    })
    .into_response()
}

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn system_time_iso(time: SystemTime) -> String {
    chrono::DateTime::<chrono::Utc>::from(time).to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
