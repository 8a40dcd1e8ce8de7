use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::mastery::{RankedSkill, Recommendation, RecommendationRequest, SkillId, StudentId};
use crate::response::{ok, AppError};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(recommend))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecommendBody {
    student_id: StudentId,
    candidate_skills: Vec<SkillId>,
    top_n: Option<usize>,
}

#[derive(Debug, Serialize)]
struct RecommendData {
    status: &'static str,
    skills: Vec<RankedSkill>,
}

async fn recommend(
    State(state): State<AppState>,
    payload: Result<Json<RecommendBody>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(body) = payload.map_err(|e| AppError::bad_request(e.body_text()))?;

    let result = state
        .engine()
        .recommend(RecommendationRequest {
            student_id: body.student_id,
            candidate_skills: body.candidate_skills,
            top_n: body.top_n,
        })
        .await?;

    let status = result.status();
    let skills = match result {
        Recommendation::Ranked(skills) => skills,
        Recommendation::FullyMastered | Recommendation::NoData => Vec::new(),
    };

    Ok(ok(RecommendData { status, skills }).into_response())
}
