use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::response::{json_error, ok, AppError};
use crate::services::concept_events::{
    list_events, record_event, EventError, ListEventsInput, RecordEventInput,
};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list).post(record))
}

async fn record(
    State(state): State<AppState>,
    Json(payload): Json<RecordEventInput>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let recorded = record_event(proxy.as_ref(), state.policy(), payload)
        .await
        .map_err(map_event_error)?;

    let status = if recorded.duplicate {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, ok(recorded)))
}

async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListEventsInput>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let events = list_events(proxy.as_ref(), query)
        .await
        .map_err(map_event_error)?;
    Ok(ok(events))
}

fn map_event_error(err: EventError) -> AppError {
    match err {
        EventError::Validation(message) => AppError::validation(message),
        EventError::SessionNotFound(id) => AppError::not_found(format!("session not found: {id}")),
        mismatch @ EventError::SessionLanguageMismatch { .. } => AppError::validation(mismatch.to_string()),
        EventError::SchedulerUpdate { event_id, source } => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "SCHEDULER_UPDATE_FAILED",
            format!("event recorded but concept schedule was not updated: {source}"),
        )
        .with_event_id(event_id),
        EventError::Sql(err) => AppError::database(&err),
    }
}
