use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

use crate::response::{ok, AppError};
use crate::services::lesson_planner::{plan_next_lesson, PlanError, PlanInput};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:languageCode", get(show))
        .route("/:languageCode/next", get(next))
}

async fn show(
    State(state): State<AppState>,
    Path(language_code): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let curricula = state.curriculum();
    let curriculum = curricula
        .get(&language_code)
        .cloned()
        .ok_or_else(|| AppError::not_found(format!("no curriculum for language {language_code}")))?;
    Ok(ok(curriculum))
}

async fn next(
    State(state): State<AppState>,
    Path(language_code): Path<String>,
    Query(query): Query<PlanInput>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let curricula = state.curriculum();
    let plan = plan_next_lesson(
        proxy.as_ref(),
        curricula.as_ref(),
        state.policy(),
        &language_code,
        query,
    )
    .await
    .map_err(|err| match err {
        PlanError::Validation(message) => AppError::validation(message),
        PlanError::Sql(err) => AppError::database(&err),
    })?;
    Ok(ok(plan))
}
