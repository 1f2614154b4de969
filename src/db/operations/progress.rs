use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{from_millis, from_millis_opt, to_millis};
use crate::db::DatabaseProxy;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageProgress {
    pub user_id: String,
    pub language_code: String,
    pub proficiency_level: Option<String>,
    pub current_lesson_id: Option<i64>,
    pub completed_lesson_ids: Vec<i64>,
    pub total_sessions: i64,
    pub total_practice_seconds: i64,
    pub last_practiced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    pub proficiency_level: Option<String>,
    pub current_lesson_id: Option<i64>,
    /// Replaces the stored set when present.
    pub completed_lesson_ids: Option<Vec<i64>>,
}

const PROGRESS_COLUMNS: &str = r#""userId", "languageCode", "proficiencyLevel", "currentLessonId",
    "completedLessonIds", "totalSessions", "totalPracticeSeconds", "lastPracticedAt",
    "createdAt", "updatedAt""#;

pub async fn get(
    proxy: &DatabaseProxy,
    user_id: &str,
    language_code: &str,
) -> Result<Option<LanguageProgress>, sqlx::Error> {
    let sql = format!(
        r#"SELECT {PROGRESS_COLUMNS} FROM "language_progress"
           WHERE "userId" = ? AND "languageCode" = ? LIMIT 1"#
    );
    let row = sqlx::query(&sql)
        .bind(user_id)
        .bind(language_code)
        .fetch_optional(proxy.pool())
        .await?;
    row.as_ref().map(map_progress).transpose()
}

pub async fn list(
    proxy: &DatabaseProxy,
    user_id: &str,
) -> Result<Vec<LanguageProgress>, sqlx::Error> {
    let sql = format!(
        r#"SELECT {PROGRESS_COLUMNS} FROM "language_progress"
           WHERE "userId" = ? ORDER BY "languageCode""#
    );
    let rows = sqlx::query(&sql)
        .bind(user_id)
        .fetch_all(proxy.pool())
        .await?;
    rows.iter().map(map_progress).collect()
}

pub async fn upsert(
    proxy: &DatabaseProxy,
    user_id: &str,
    language_code: &str,
    update: &ProgressUpdate,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    let completed = update
        .completed_lesson_ids
        .as_ref()
        .map(|ids| serde_json::Value::from(ids.clone()).to_string());

    sqlx::query(
        r#"INSERT INTO "language_progress" (
               "userId", "languageCode", "proficiencyLevel", "currentLessonId",
               "completedLessonIds", "createdAt", "updatedAt"
           ) VALUES (?, ?, ?, ?, COALESCE(?, '[]'), ?, ?)
           ON CONFLICT ("userId", "languageCode") DO UPDATE SET
               "proficiencyLevel" = COALESCE(excluded."proficiencyLevel", "language_progress"."proficiencyLevel"),
               "currentLessonId" = COALESCE(excluded."currentLessonId", "language_progress"."currentLessonId"),
               "completedLessonIds" = COALESCE(?, "language_progress"."completedLessonIds"),
               "updatedAt" = excluded."updatedAt""#,
    )
    .bind(user_id)
    .bind(language_code)
    .bind(update.proficiency_level.as_deref())
    .bind(update.current_lesson_id)
    .bind(completed.as_deref())
    .bind(to_millis(now))
    .bind(to_millis(now))
    .bind(completed.as_deref())
    .execute(proxy.pool())
    .await?;
    Ok(())
}

/// Counts one finished session and, when given, marks its lesson completed.
/// Single statement, so concurrent session closes never lose an increment.
pub async fn record_session(
    proxy: &DatabaseProxy,
    user_id: &str,
    language_code: &str,
    duration_seconds: i64,
    completed_lesson_id: Option<i64>,
    at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO "language_progress" (
               "userId", "languageCode", "completedLessonIds", "totalSessions",
               "totalPracticeSeconds", "lastPracticedAt", "createdAt", "updatedAt"
           ) VALUES (?, ?, CASE WHEN ? IS NULL THEN '[]' ELSE json_array(?) END, 1, ?, ?, ?, ?)
           ON CONFLICT ("userId", "languageCode") DO UPDATE SET
               "totalSessions" = "language_progress"."totalSessions" + 1,
               "totalPracticeSeconds" = "language_progress"."totalPracticeSeconds" + excluded."totalPracticeSeconds",
               "lastPracticedAt" = excluded."lastPracticedAt",
               "updatedAt" = excluded."updatedAt",
               "completedLessonIds" = CASE
                   WHEN ? IS NULL THEN "language_progress"."completedLessonIds"
                   WHEN EXISTS (
                       SELECT 1 FROM json_each("language_progress"."completedLessonIds") WHERE value = ?
                   ) THEN "language_progress"."completedLessonIds"
                   ELSE json_insert("language_progress"."completedLessonIds", '$[#]', ?)
               END"#,
    )
    .bind(user_id)
    .bind(language_code)
    .bind(completed_lesson_id)
    .bind(completed_lesson_id)
    .bind(duration_seconds.max(0))
    .bind(to_millis(at))
    .bind(to_millis(at))
    .bind(to_millis(at))
    .bind(completed_lesson_id)
    .bind(completed_lesson_id)
    .bind(completed_lesson_id)
    .execute(proxy.pool())
    .await?;
    Ok(())
}

fn map_progress(row: &SqliteRow) -> Result<LanguageProgress, sqlx::Error> {
    let completed: String = row.try_get("completedLessonIds")?;
    let mut completed_lesson_ids: Vec<i64> = serde_json::from_str(&completed).unwrap_or_default();
    completed_lesson_ids.sort_unstable();
    completed_lesson_ids.dedup();

    Ok(LanguageProgress {
        user_id: row.try_get("userId")?,
        language_code: row.try_get("languageCode")?,
        proficiency_level: row.try_get("proficiencyLevel")?,
        current_lesson_id: row.try_get("currentLessonId")?,
        completed_lesson_ids,
        total_sessions: row.try_get("totalSessions")?,
        total_practice_seconds: row.try_get("totalPracticeSeconds")?,
        last_practiced_at: from_millis_opt(row.try_get("lastPracticedAt")?),
        created_at: from_millis(row.try_get("createdAt")?),
        updated_at: from_millis(row.try_get("updatedAt")?),
    })
}
