use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::response::{ok, AppError};
use crate::services::lesson_sessions::{
    create_session, end_session, get_session, list_sessions, update_session, CreateSessionInput,
    ListSessionsInput, SessionError, UpdateSessionInput,
};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndSessionRequest {
    duration_seconds: Option<i64>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/:sessionId", get(get_one).patch(update))
        .route("/:sessionId/end", post(end))
}

async fn create(
    State(state): State<AppState>,
    Json(payload): Json<CreateSessionInput>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let session = create_session(proxy.as_ref(), payload)
        .await
        .map_err(map_session_error)?;
    Ok((StatusCode::CREATED, ok(session)))
}

async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListSessionsInput>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let sessions = list_sessions(proxy.as_ref(), query)
        .await
        .map_err(map_session_error)?;
    Ok(ok(sessions))
}

async fn get_one(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let session = get_session(proxy.as_ref(), &session_id)
        .await
        .map_err(map_session_error)?;
    Ok(ok(session))
}

async fn update(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(payload): Json<UpdateSessionInput>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let session = update_session(proxy.as_ref(), &session_id, payload)
        .await
        .map_err(map_session_error)?;
    Ok(ok(session))
}

async fn end(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(payload): Json<EndSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let outcome = end_session(proxy.as_ref(), &session_id, payload.duration_seconds)
        .await
        .map_err(map_session_error)?;
    Ok(ok(outcome))
}

fn map_session_error(err: SessionError) -> AppError {
    match err {
        SessionError::Validation(message) => AppError::validation(message),
        SessionError::NotFound(id) => AppError::not_found(format!("session not found: {id}")),
        SessionError::Closed(id) => {
            AppError::conflict("SESSION_CLOSED", format!("session {id} is already closed"))
        }
        SessionError::Sql(err) => AppError::database(&err),
    }
}
