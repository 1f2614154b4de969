use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;

use crate::response::{ok, AppError};
use crate::services::progress::{get_progress, upsert_progress, ProgressError, UpsertProgressInput};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProgressQuery {
    user_id: Option<String>,
    language_code: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(read))
        .route("/:languageCode", put(upsert))
}

async fn read(
    State(state): State<AppState>,
    Query(query): Query<ProgressQuery>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let view = get_progress(
        proxy.as_ref(),
        query.user_id.as_deref(),
        query.language_code.as_deref(),
    )
    .await
    .map_err(map_progress_error)?;
    Ok(ok(view))
}

async fn upsert(
    State(state): State<AppState>,
    Path(language_code): Path<String>,
    Json(payload): Json<UpsertProgressInput>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let progress = upsert_progress(proxy.as_ref(), &language_code, payload)
        .await
        .map_err(map_progress_error)?;
    Ok(ok(progress))
}

fn map_progress_error(err: ProgressError) -> AppError {
    match err {
        ProgressError::Validation(message) => AppError::validation(message),
        ProgressError::Sql(err) => AppError::database(&err),
    }
}
