use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Serialize;

use crate::mastery::StudentId;
use crate::response::ok;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/:student_id/mastery", get(mastery))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MasteryData {
    student_id: StudentId,
    skills: BTreeMap<String, f64>,
    last_attempt_at: Option<String>,
}

async fn mastery(State(state): State<AppState>, Path(student_id): Path<String>) -> Response {
    let student_id = StudentId::new(student_id);
    let engine = state.engine();
    let last_attempt_at = engine
        .last_attempt_at(&student_id)
        .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true));
    let skills = engine
        .mastery_of(&student_id)
        .into_iter()
        .map(|(skill, p)| (skill.as_str().to_string(), p))
        .collect();

    ok(MasteryData {
        student_id,
        skills,
        last_attempt_at,
    })
    .into_response()
}
