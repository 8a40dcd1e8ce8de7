use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use serde::Serialize;

use crate::response::{ok, AppError};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/flush", post(flush))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FlushData {
    applied_pending: usize,
    store_records: usize,
}

async fn flush(State(state): State<AppState>) -> Result<Response, AppError> {
    let engine = state.engine();
    let applied_pending = engine.flush_pending().await?;
    engine.flush().await?;
    tracing::info!(applied_pending, "mastery store flushed");

    Ok(ok(FlushData {
        applied_pending,
        store_records: engine.store().record_count(),
    })
    .into_response())
}
