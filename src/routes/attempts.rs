use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::mastery::engine::AppliedAttempt;
use crate::mastery::{QuizAttempt, SkillId, StudentId};
use crate::response::{ok, AppError};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(ingest))
        .route("/batch", post(ingest_batch))
        .route("/pending", post(enqueue))
}

#[derive(Debug, Deserialize)]
struct BatchRequest {
    attempts: Vec<QuizAttempt>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IngestData {
    student_id: StudentId,
    skill_id: SkillId,
    mastery: f64,
}

#[derive(Debug, Serialize)]
struct RejectedEntry {
    index: usize,
    reason: String,
}

#[derive(Debug, Serialize)]
struct BatchData {
    applied: Vec<AppliedAttempt>,
    rejected: Vec<RejectedEntry>,
}

#[derive(Debug, Serialize)]
struct QueuedData {
    queued: bool,
}

async fn ingest(
    State(state): State<AppState>,
    payload: Result<Json<QuizAttempt>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(attempt) = payload.map_err(|e| AppError::bad_request(e.body_text()))?;
    let student_id = attempt.student_id.clone();
    let skill_id = attempt.skill_id.clone();

    let mastery = state.engine().ingest(attempt).await?;

    Ok(ok(IngestData {
        student_id,
        skill_id,
        mastery,
    })
    .into_response())
}

async fn ingest_batch(
    State(state): State<AppState>,
    payload: Result<Json<BatchRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(body) = payload.map_err(|e| AppError::bad_request(e.body_text()))?;

    let outcome = state.engine().ingest_batch(body.attempts).await?;
    let rejected = outcome
        .rejected
        .into_iter()
        .map(|r| RejectedEntry {
            index: r.index,
            reason: r.reason.to_string(),
        })
        .collect();

    Ok(ok(BatchData {
        applied: outcome.applied,
        rejected,
    })
    .into_response())
}

async fn enqueue(
    State(state): State<AppState>,
    payload: Result<Json<QuizAttempt>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(attempt) = payload.map_err(|e| AppError::bad_request(e.body_text()))?;
    state.engine().enqueue(attempt)?;
    Ok((StatusCode::ACCEPTED, ok(QueuedData { queued: true })).into_response())
}
