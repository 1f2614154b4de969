use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{from_millis, from_millis_opt, to_millis};
use crate::db::DatabaseProxy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    Curriculum,
    Custom,
    Free,
}

impl SessionType {
    pub const fn as_str(self) -> &'static str {
        match self {
            SessionType::Curriculum => "curriculum",
            SessionType::Custom => "custom",
            SessionType::Free => "free",
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "curriculum" => Ok(SessionType::Curriculum),
            "custom" => Ok(SessionType::Custom),
            "free" => Ok(SessionType::Free),
            other => Err(format!("unknown session type: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonSession {
    pub id: String,
    pub user_id: String,
    pub language_code: String,
    pub session_type: SessionType,
    pub curriculum_id: Option<String>,
    pub lesson_id: Option<i64>,
    pub topic: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

impl LessonSession {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// Metadata changes allowed while a session is open. `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub session_type: Option<SessionType>,
    pub curriculum_id: Option<String>,
    pub lesson_id: Option<i64>,
    pub topic: Option<String>,
}

impl SessionPatch {
    pub fn is_empty(&self) -> bool {
        self.session_type.is_none()
            && self.curriculum_id.is_none()
            && self.lesson_id.is_none()
            && self.topic.is_none()
    }
}

const SESSION_COLUMNS: &str = r#""id", "userId", "languageCode", "sessionType", "curriculumId",
    "lessonId", "topic", "startedAt", "endedAt", "durationSeconds", "updatedAt""#;

pub async fn insert(proxy: &DatabaseProxy, session: &LessonSession) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO "lesson_sessions" (
               "id", "userId", "languageCode", "sessionType", "curriculumId", "lessonId",
               "topic", "startedAt", "endedAt", "durationSeconds", "updatedAt"
           ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&session.id)
    .bind(&session.user_id)
    .bind(&session.language_code)
    .bind(session.session_type.as_str())
    .bind(session.curriculum_id.as_deref())
    .bind(session.lesson_id)
    .bind(session.topic.as_deref())
    .bind(to_millis(session.started_at))
    .bind(session.ended_at.map(to_millis))
    .bind(session.duration_seconds)
    .bind(to_millis(session.updated_at))
    .execute(proxy.pool())
    .await?;
    Ok(())
}

pub async fn find(
    proxy: &DatabaseProxy,
    session_id: &str,
) -> Result<Option<LessonSession>, sqlx::Error> {
    let sql = format!(r#"SELECT {SESSION_COLUMNS} FROM "lesson_sessions" WHERE "id" = ? LIMIT 1"#);
    let row = sqlx::query(&sql)
        .bind(session_id)
        .fetch_optional(proxy.pool())
        .await?;
    row.as_ref().map(map_session).transpose()
}

/// Closes an open session. Returns `false` if it was already closed (or absent).
pub async fn close(
    proxy: &DatabaseProxy,
    session_id: &str,
    duration_seconds: i64,
    ended_at: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"UPDATE "lesson_sessions"
           SET "endedAt" = ?, "durationSeconds" = ?, "updatedAt" = ?
           WHERE "id" = ? AND "endedAt" IS NULL"#,
    )
    .bind(to_millis(ended_at))
    .bind(duration_seconds)
    .bind(to_millis(ended_at))
    .bind(session_id)
    .execute(proxy.pool())
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Applies `patch` to an open session. Returns `false` if the session is closed.
pub async fn update_metadata(
    proxy: &DatabaseProxy,
    session_id: &str,
    patch: &SessionPatch,
    updated_at: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"UPDATE "lesson_sessions" SET
               "sessionType" = COALESCE(?, "sessionType"),
               "curriculumId" = COALESCE(?, "curriculumId"),
               "lessonId" = COALESCE(?, "lessonId"),
               "topic" = COALESCE(?, "topic"),
               "updatedAt" = ?
           WHERE "id" = ? AND "endedAt" IS NULL"#,
    )
    .bind(patch.session_type.map(SessionType::as_str))
    .bind(patch.curriculum_id.as_deref())
    .bind(patch.lesson_id)
    .bind(patch.topic.as_deref())
    .bind(to_millis(updated_at))
    .bind(session_id)
    .execute(proxy.pool())
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Most recently started first.
pub async fn list(
    proxy: &DatabaseProxy,
    user_id: &str,
    language_code: Option<&str>,
    limit: i64,
) -> Result<Vec<LessonSession>, sqlx::Error> {
    let sql = format!(
        r#"SELECT {SESSION_COLUMNS} FROM "lesson_sessions"
           WHERE "userId" = ? AND (? IS NULL OR "languageCode" = ?)
           ORDER BY "startedAt" DESC, rowid DESC
           LIMIT ?"#
    );
    let rows = sqlx::query(&sql)
        .bind(user_id)
        .bind(language_code)
        .bind(language_code)
        .bind(limit)
        .fetch_all(proxy.pool())
        .await?;
    rows.iter().map(map_session).collect()
}

pub async fn latest_closed(
    proxy: &DatabaseProxy,
    user_id: &str,
    language_code: &str,
) -> Result<Option<LessonSession>, sqlx::Error> {
    let sql = format!(
        r#"SELECT {SESSION_COLUMNS} FROM "lesson_sessions"
           WHERE "userId" = ? AND "languageCode" = ? AND "endedAt" IS NOT NULL
           ORDER BY "endedAt" DESC, rowid DESC
           LIMIT 1"#
    );
    let row = sqlx::query(&sql)
        .bind(user_id)
        .bind(language_code)
        .fetch_optional(proxy.pool())
        .await?;
    row.as_ref().map(map_session).transpose()
}

/// Lesson ids of closed curriculum sessions.
pub async fn completed_curriculum_lessons(
    proxy: &DatabaseProxy,
    user_id: &str,
    language_code: &str,
) -> Result<Vec<i64>, sqlx::Error> {
    sqlx::query_scalar(
        r#"SELECT DISTINCT "lessonId" FROM "lesson_sessions"
           WHERE "userId" = ? AND "languageCode" = ? AND "sessionType" = 'curriculum'
             AND "endedAt" IS NOT NULL AND "lessonId" IS NOT NULL
           ORDER BY "lessonId""#,
    )
    .bind(user_id)
    .bind(language_code)
    .fetch_all(proxy.pool())
    .await
}

fn map_session(row: &SqliteRow) -> Result<LessonSession, sqlx::Error> {
    let session_type: String = row.try_get("sessionType")?;
    let session_type = session_type
        .parse::<SessionType>()
        .map_err(|err| sqlx::Error::Decode(err.into()))?;

    Ok(LessonSession {
        id: row.try_get("id")?,
        user_id: row.try_get("userId")?,
        language_code: row.try_get("languageCode")?,
        session_type,
        curriculum_id: row.try_get("curriculumId")?,
        lesson_id: row.try_get("lessonId")?,
        topic: row.try_get("topic")?,
        started_at: from_millis(row.try_get("startedAt")?),
        ended_at: from_millis_opt(row.try_get("endedAt")?),
        duration_seconds: row.try_get("durationSeconds")?,
        updated_at: from_millis(row.try_get("updatedAt")?),
    })
}
