use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::db::operations::store_now;
use crate::response::{json_error, ok, AppError};
use crate::services::concept_memory::{replay_concept, MemoryUpdateError, ReplayInput};
use crate::services::overview::mastery_overview;
use crate::services::realtime_query::{run_query, QueryError, QueryRequest};
use crate::services::required_text;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OverviewQuery {
    user_id: Option<String>,
    language_code: Option<String>,
}

pub fn router(enable_replay: bool) -> Router<AppState> {
    let router = Router::new()
        .route("/query", post(query))
        .route("/overview", get(overview));

    if enable_replay {
        router.route("/replay", post(replay))
    } else {
        router
    }
}

async fn query(
    State(state): State<AppState>,
    Json(payload): Json<QueryRequest>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let curricula = state.curriculum();
    let response = run_query(
        proxy.as_ref(),
        curricula.as_ref(),
        state.policy(),
        payload,
        store_now(),
    )
    .await
    .map_err(|err| match err {
        QueryError::Validation(message) => AppError::validation(message),
        QueryError::UnknownQueryType(query_type) => json_error(
            StatusCode::BAD_REQUEST,
            "UNKNOWN_QUERY_TYPE",
            format!("unknown query type: {query_type}"),
        ),
        QueryError::Sql(err) => AppError::database(&err),
    })?;
    Ok(ok(response))
}

async fn replay(
    State(state): State<AppState>,
    Json(payload): Json<ReplayInput>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let key = payload.concept_key().map_err(AppError::validation)?;

    let outcome = replay_concept(proxy.as_ref(), &key, store_now(), state.policy())
        .await
        .map_err(|err| match err {
            MemoryUpdateError::Sql(err) => AppError::database(&err),
            contended @ MemoryUpdateError::Contended { .. } => json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "SCHEDULER_UPDATE_FAILED",
                contended.to_string(),
            ),
        })?
        .ok_or_else(|| AppError::not_found(format!("no events recorded for concept {key}")))?;

    Ok(ok(outcome))
}

async fn overview(
    State(state): State<AppState>,
    Query(query): Query<OverviewQuery>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let user_id = required_text(query.user_id.as_deref(), "userId").map_err(AppError::validation)?;
    let language = required_text(query.language_code.as_deref(), "languageCode")
        .map_err(AppError::validation)?;

    let overview = mastery_overview(proxy.as_ref(), state.policy(), &user_id, &language, store_now())
        .await
        .map_err(|err| AppError::database(&err))?;
    Ok(ok(overview))
}
