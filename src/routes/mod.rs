mod admin;
mod attempts;
mod health;
mod recommendations;
mod students;

use axum::response::{IntoResponse, Response};
use axum::Router;

use crate::response::AppError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let enable_admin = env_bool("MASTERY_ENABLE_ADMIN_ROUTES").unwrap_or(true);

    let mut app = Router::new()
        .nest("/health", health::router())
        .nest("/api/attempts", attempts::router())
        .nest("/api/recommendations", recommendations::router())
        .nest("/api/students", students::router());

    if enable_admin {
        app = app.nest("/api/admin", admin::router());
    }

    app.fallback(fallback_handler).with_state(state)
}

fn env_bool(key: &str) -> Option<bool> {
    let value = std::env::var(key).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

async fn fallback_handler() -> Response {
    AppError::not_found("route not found").into_response()
}
