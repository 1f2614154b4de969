mod concept_events;
mod curriculum;
mod health;
mod lesson_sessions;
mod memory;
mod progress;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;

use crate::config::env_bool;
use crate::response::json_error;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let enable_replay = env_bool("ENABLE_REPLAY_ENDPOINT", true);

    Router::new()
        .nest("/api/concept-events", concept_events::router())
        .nest("/api/lesson-sessions", lesson_sessions::router())
        .nest("/api/progress", progress::router())
        .nest("/api/memory", memory::router(enable_replay))
        .nest("/api/curriculum", curriculum::router())
        .nest("/health", health::router())
        .fallback(fallback_handler)
        .with_state(state)
}

async fn fallback_handler() -> Response {
    json_error(StatusCode::NOT_FOUND, "NOT_FOUND", "route not found").into_response()
}
