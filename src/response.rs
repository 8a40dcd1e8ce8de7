use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::mastery::{IngestError, RecommendError, StoreError};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse<T> {
    pub success: bool,
    pub data: T,
}

pub fn ok<T: Serialize>(data: T) -> Json<SuccessResponse<T>> {
    Json(SuccessResponse {
        success: true,
        data,
    })
}

#[derive(Debug, Clone)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl AppError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_code(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::with_code(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::with_code(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::with_code(
            StatusCode::INTERNAL_SERVER_ERROR,
            "PERSISTENCE_ERROR",
            message,
        )
    }

    fn with_code(
        status: StatusCode,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Invalid { .. } => Self::validation(err.to_string()),
            IngestError::Persist(_) => Self::persistence(err.to_string()),
        }
    }
}

impl From<RecommendError> for AppError {
    fn from(err: RecommendError) -> Self {
        match err {
            RecommendError::NoCandidates | RecommendError::ZeroTopN => {
                Self::validation(err.to_string())
            }
            RecommendError::Persist(_) => Self::persistence(err.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        Self::persistence(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = %self.code, error = %self.message, "request failed");
        }

        let body = ErrorResponse {
            success: false,
            error: self.message,
            code: self.code,
        };

        (self.status, Json(body)).into_response()
    }
}
