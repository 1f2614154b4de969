use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{from_millis, from_millis_opt, to_millis};
use crate::db::DatabaseProxy;
use crate::memory::{ConceptKey, ConceptMemory, ConceptType};

const MEMORY_COLUMNS: &str = r#""id", "userId", "languageCode", "conceptType", "conceptIdentifier",
    "conceptId", "easeFactor", "intervalDays", "repetitionCount", "consecutiveFailures",
    "dueAt", "lastQuality", "lastReviewedAt", "lastEventSeq", "version", "createdAt", "updatedAt""#;

pub async fn find(
    proxy: &DatabaseProxy,
    key: &ConceptKey,
) -> Result<Option<ConceptMemory>, sqlx::Error> {
    let sql = format!(
        r#"SELECT {MEMORY_COLUMNS} FROM "concept_memories"
           WHERE "userId" = ? AND "languageCode" = ? AND "conceptType" = ? AND "conceptIdentifier" = ?
           LIMIT 1"#
    );
    let row = sqlx::query(&sql)
        .bind(&key.user_id)
        .bind(&key.language_code)
        .bind(key.concept_type.as_str())
        .bind(&key.concept_identifier)
        .fetch_optional(proxy.pool())
        .await?;

    row.as_ref().map(map_memory).transpose()
}

/// Writes a new row unless another writer created the concept first.
/// Returns `false` when the key already exists.
pub async fn insert_if_absent(
    proxy: &DatabaseProxy,
    memory: &ConceptMemory,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"INSERT INTO "concept_memories" (
               "id", "userId", "languageCode", "conceptType", "conceptIdentifier", "conceptId",
               "easeFactor", "intervalDays", "repetitionCount", "consecutiveFailures", "dueAt",
               "lastQuality", "lastReviewedAt", "lastEventSeq", "version", "createdAt", "updatedAt"
           ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT ("userId", "languageCode", "conceptType", "conceptIdentifier") DO NOTHING"#,
    )
    .bind(&memory.id)
    .bind(&memory.key.user_id)
    .bind(&memory.key.language_code)
    .bind(memory.key.concept_type.as_str())
    .bind(&memory.key.concept_identifier)
    .bind(memory.concept_id.as_deref())
    .bind(memory.ease_factor)
    .bind(memory.interval_days)
    .bind(memory.repetition_count)
    .bind(memory.consecutive_failures)
    .bind(to_millis(memory.due_at))
    .bind(memory.last_quality.map(i64::from))
    .bind(memory.last_reviewed_at.map(to_millis))
    .bind(memory.last_event_seq)
    .bind(memory.version)
    .bind(to_millis(memory.created_at))
    .bind(to_millis(memory.updated_at))
    .execute(proxy.pool())
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Overwrites the scheduling state only if the row still carries
/// `expected_version`. Returns `false` when another writer got there first.
pub async fn compare_and_swap(
    proxy: &DatabaseProxy,
    next: &ConceptMemory,
    expected_version: i64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"UPDATE "concept_memories" SET
               "conceptId" = COALESCE(?, "conceptId"),
               "easeFactor" = ?,
               "intervalDays" = ?,
               "repetitionCount" = ?,
               "consecutiveFailures" = ?,
               "dueAt" = ?,
               "lastQuality" = ?,
               "lastReviewedAt" = ?,
               "lastEventSeq" = ?,
               "version" = ?,
               "updatedAt" = ?
           WHERE "id" = ? AND "version" = ?"#,
    )
    .bind(next.concept_id.as_deref())
    .bind(next.ease_factor)
    .bind(next.interval_days)
    .bind(next.repetition_count)
    .bind(next.consecutive_failures)
    .bind(to_millis(next.due_at))
    .bind(next.last_quality.map(i64::from))
    .bind(next.last_reviewed_at.map(to_millis))
    .bind(next.last_event_seq)
    .bind(next.version)
    .bind(to_millis(next.updated_at))
    .bind(&next.id)
    .bind(expected_version)
    .execute(proxy.pool())
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn list_for_language(
    proxy: &DatabaseProxy,
    user_id: &str,
    language_code: &str,
    concept_type: Option<ConceptType>,
) -> Result<Vec<ConceptMemory>, sqlx::Error> {
    let sql = format!(
        r#"SELECT {MEMORY_COLUMNS} FROM "concept_memories"
           WHERE "userId" = ? AND "languageCode" = ? AND (? IS NULL OR "conceptType" = ?)
           ORDER BY "conceptType", "conceptIdentifier""#
    );
    let type_filter = concept_type.map(ConceptType::as_str);
    let rows = sqlx::query(&sql)
        .bind(user_id)
        .bind(language_code)
        .bind(type_filter)
        .bind(type_filter)
        .fetch_all(proxy.pool())
        .await?;

    rows.iter().map(map_memory).collect()
}

/// Rows due at or before `now`; ranking is left to the scheduler.
pub async fn list_due(
    proxy: &DatabaseProxy,
    user_id: &str,
    language_code: &str,
    concept_type: ConceptType,
    now: DateTime<Utc>,
) -> Result<Vec<ConceptMemory>, sqlx::Error> {
    let sql = format!(
        r#"SELECT {MEMORY_COLUMNS} FROM "concept_memories"
           WHERE "userId" = ? AND "languageCode" = ? AND "conceptType" = ? AND "dueAt" <= ?"#
    );
    let rows = sqlx::query(&sql)
        .bind(user_id)
        .bind(language_code)
        .bind(concept_type.as_str())
        .bind(to_millis(now))
        .fetch_all(proxy.pool())
        .await?;

    rows.iter().map(map_memory).collect()
}

pub async fn list_struggling(
    proxy: &DatabaseProxy,
    user_id: &str,
    language_code: &str,
    min_failures: i64,
) -> Result<Vec<ConceptMemory>, sqlx::Error> {
    let sql = format!(
        r#"SELECT {MEMORY_COLUMNS} FROM "concept_memories"
           WHERE "userId" = ? AND "languageCode" = ? AND "consecutiveFailures" >= ?
           ORDER BY "consecutiveFailures" DESC, "dueAt" ASC, "conceptIdentifier" ASC"#
    );
    let rows = sqlx::query(&sql)
        .bind(user_id)
        .bind(language_code)
        .bind(min_failures)
        .fetch_all(proxy.pool())
        .await?;

    rows.iter().map(map_memory).collect()
}

fn map_memory(row: &SqliteRow) -> Result<ConceptMemory, sqlx::Error> {
    let concept_type: String = row.try_get("conceptType")?;
    let concept_type = concept_type
        .parse::<ConceptType>()
        .map_err(|err| sqlx::Error::ColumnDecode {
            index: "conceptType".to_string(),
            source: Box::new(err),
        })?;
    let last_quality: Option<i64> = row.try_get("lastQuality")?;

    Ok(ConceptMemory {
        id: row.try_get("id")?,
        key: ConceptKey {
            user_id: row.try_get("userId")?,
            language_code: row.try_get("languageCode")?,
            concept_type,
            concept_identifier: row.try_get("conceptIdentifier")?,
        },
        concept_id: row.try_get("conceptId")?,
        ease_factor: row.try_get("easeFactor")?,
        interval_days: row.try_get("intervalDays")?,
        repetition_count: row.try_get("repetitionCount")?,
        consecutive_failures: row.try_get("consecutiveFailures")?,
        due_at: from_millis(row.try_get("dueAt")?),
        last_quality: last_quality.and_then(|q| u8::try_from(q).ok()),
        last_reviewed_at: from_millis_opt(row.try_get("lastReviewedAt")?),
        last_event_seq: row.try_get("lastEventSeq")?,
        version: row.try_get("version")?,
        created_at: from_millis(row.try_get("createdAt")?),
        updated_at: from_millis(row.try_get("updatedAt")?),
    })
}
