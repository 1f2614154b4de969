use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::{clamp_limit, normalize_language, optional_text, required_text};
use crate::db::operations::events::{self, TouchedConcept};
use crate::db::operations::sessions::{self, LessonSession, SessionPatch, SessionType};
use crate::db::operations::{progress, store_now};
use crate::db::DatabaseProxy;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0}")]
    Validation(String),
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("session {0} is already closed")]
    Closed(String),
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionInput {
    pub user_id: Option<String>,
    pub language_code: Option<String>,
    pub session_type: Option<String>,
    pub curriculum_id: Option<String>,
    pub lesson_id: Option<i64>,
    pub topic: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSessionInput {
    pub session_type: Option<String>,
    pub curriculum_id: Option<String>,
    pub lesson_id: Option<i64>,
    pub topic: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndSessionOutcome {
    pub session: LessonSession,
    pub already_closed: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub language_code: String,
    pub session_type: SessionType,
    pub curriculum_id: Option<String>,
    pub lesson_id: Option<i64>,
    pub topic: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub event_count: i64,
    pub concepts_touched: Vec<TouchedConcept>,
}

fn parse_session_type(raw: Option<&str>) -> Result<Option<SessionType>, SessionError> {
    optional_text(raw)
        .map(|value| value.parse::<SessionType>())
        .transpose()
        .map_err(SessionError::Validation)
}

fn validate_lesson_id(lesson_id: Option<i64>) -> Result<(), SessionError> {
    match lesson_id {
        Some(id) if id <= 0 => Err(SessionError::Validation(
            "lessonId must be a positive integer".to_string(),
        )),
        _ => Ok(()),
    }
}

pub async fn create_session(
    proxy: &DatabaseProxy,
    input: CreateSessionInput,
) -> Result<LessonSession, SessionError> {
    let user_id = required_text(input.user_id.as_deref(), "userId").map_err(SessionError::Validation)?;
    let language_code = required_text(input.language_code.as_deref(), "languageCode")
        .map_err(SessionError::Validation)?;
    validate_lesson_id(input.lesson_id)?;

    let session_type = parse_session_type(input.session_type.as_deref())?.unwrap_or(
        if input.lesson_id.is_some() {
            SessionType::Curriculum
        } else {
            SessionType::Free
        },
    );

    let now = store_now();
    let session = LessonSession {
        id: Uuid::new_v4().to_string(),
        user_id,
        language_code: normalize_language(&language_code),
        session_type,
        curriculum_id: optional_text(input.curriculum_id.as_deref()),
        lesson_id: input.lesson_id,
        topic: optional_text(input.topic.as_deref()),
        started_at: now,
        ended_at: None,
        duration_seconds: None,
        updated_at: now,
    };

    sessions::insert(proxy, &session).await?;
    tracing::info!(
        session_id = %session.id,
        user_id = %session.user_id,
        language = %session.language_code,
        session_type = %session.session_type,
        "lesson session opened"
    );
    Ok(session)
}

pub async fn get_session(
    proxy: &DatabaseProxy,
    session_id: &str,
) -> Result<LessonSession, SessionError> {
    sessions::find(proxy, session_id)
        .await?
        .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
}

/// Closes the session. A second close is a no-op that returns the stored row.
pub async fn end_session(
    proxy: &DatabaseProxy,
    session_id: &str,
    duration_seconds: Option<i64>,
) -> Result<EndSessionOutcome, SessionError> {
    let duration = duration_seconds
        .ok_or_else(|| SessionError::Validation("durationSeconds is required".to_string()))?;
    if duration < 0 {
        return Err(SessionError::Validation(
            "durationSeconds must not be negative".to_string(),
        ));
    }

    let now = store_now();
    let closed = sessions::close(proxy, session_id, duration, now).await?;
    let session = get_session(proxy, session_id).await?;

    if !closed {
        tracing::debug!(session_id = %session_id, "session already closed, ignoring end");
        return Ok(EndSessionOutcome {
            session,
            already_closed: true,
        });
    }

    let completed_lesson = match session.session_type {
        SessionType::Curriculum => session.lesson_id,
        _ => None,
    };
    if let Err(err) = progress::record_session(
        proxy,
        &session.user_id,
        &session.language_code,
        duration,
        completed_lesson,
        now,
    )
    .await
    {
        tracing::error!(
            session_id = %session.id,
            error = %err,
            "failed to update language progress after session close"
        );
    }

    tracing::info!(
        session_id = %session.id,
        user_id = %session.user_id,
        duration_seconds = duration,
        "lesson session closed"
    );

    Ok(EndSessionOutcome {
        session,
        already_closed: false,
    })
}

pub async fn update_session(
    proxy: &DatabaseProxy,
    session_id: &str,
    input: UpdateSessionInput,
) -> Result<LessonSession, SessionError> {
    validate_lesson_id(input.lesson_id)?;
    let patch = SessionPatch {
        session_type: parse_session_type(input.session_type.as_deref())?,
        curriculum_id: optional_text(input.curriculum_id.as_deref()),
        lesson_id: input.lesson_id,
        topic: optional_text(input.topic.as_deref()),
    };

    let existing = get_session(proxy, session_id).await?;
    if !existing.is_open() {
        return Err(SessionError::Closed(session_id.to_string()));
    }
    if patch.is_empty() {
        return Ok(existing);
    }

    if !sessions::update_metadata(proxy, session_id, &patch, store_now()).await? {
        return Err(SessionError::Closed(session_id.to_string()));
    }
    get_session(proxy, session_id).await
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSessionsInput {
    pub user_id: Option<String>,
    pub language_code: Option<String>,
    pub limit: Option<i64>,
}

pub async fn list_sessions(
    proxy: &DatabaseProxy,
    input: ListSessionsInput,
) -> Result<Vec<LessonSession>, SessionError> {
    let user_id = required_text(input.user_id.as_deref(), "userId").map_err(SessionError::Validation)?;
    let language = optional_text(input.language_code.as_deref()).map(|l| normalize_language(&l));
    let limit = clamp_limit(input.limit, 10, 100);
    Ok(sessions::list(proxy, &user_id, language.as_deref(), limit).await?)
}

/// Most recent closed session with the concepts it touched.
pub async fn last_session_summary(
    proxy: &DatabaseProxy,
    user_id: &str,
    language_code: &str,
) -> Result<Option<SessionSummary>, sqlx::Error> {
    let Some(session) =
        sessions::latest_closed(proxy, user_id, &normalize_language(language_code)).await?
    else {
        return Ok(None);
    };

    let concepts_touched = events::concepts_touched_by_session(proxy, &session.id).await?;
    let event_count = events::count_for_session(proxy, &session.id).await?;

    Ok(Some(SessionSummary {
        session_id: session.id,
        language_code: session.language_code,
        session_type: session.session_type,
        curriculum_id: session.curriculum_id,
        lesson_id: session.lesson_id,
        topic: session.topic,
        started_at: session.started_at,
        ended_at: session.ended_at,
        duration_seconds: session.duration_seconds,
        event_count,
        concepts_touched,
    }))
}
