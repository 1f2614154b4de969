use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{from_millis, to_millis};
use crate::db::DatabaseProxy;
use crate::memory::{ConceptKey, ConceptType, EventType};

/// One learner action. Rows are append-only.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptEvent {
    /// Position in the log. Zero until the row is written.
    pub seq: i64,
    pub id: String,
    pub user_id: String,
    pub session_id: Option<String>,
    pub language_code: String,
    pub event_type: EventType,
    pub concept_type: ConceptType,
    pub concept_identifier: String,
    pub concept_id: Option<String>,
    pub context: Map<String, Value>,
    pub session_timestamp_seconds: Option<f64>,
    pub quality_score: Option<u8>,
    pub late_for_session: bool,
    pub client_event_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ConceptEvent {
    pub fn concept_key(&self) -> ConceptKey {
        ConceptKey {
            user_id: self.user_id.clone(),
            language_code: self.language_code.clone(),
            concept_type: self.concept_type,
            concept_identifier: self.concept_identifier.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub user_id: String,
    pub language_code: Option<String>,
    pub concept_type: Option<ConceptType>,
    pub concept_identifier: Option<String>,
    pub limit: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TouchedConcept {
    pub concept_type: ConceptType,
    pub concept_identifier: String,
}

const EVENT_COLUMNS: &str = r#""seq", "id", "userId", "sessionId", "languageCode", "eventType",
    "conceptType", "conceptIdentifier", "conceptId", "context", "sessionTimestampSeconds",
    "qualityScore", "lateForSession", "clientEventId", "createdAt""#;

/// Appends the event and returns its log position.
pub async fn insert(proxy: &DatabaseProxy, event: &ConceptEvent) -> Result<i64, sqlx::Error> {
    let context = Value::Object(event.context.clone()).to_string();
    let result = sqlx::query(
        r#"INSERT INTO "concept_events" (
               "id", "userId", "sessionId", "languageCode", "eventType", "conceptType",
               "conceptIdentifier", "conceptId", "context", "sessionTimestampSeconds",
               "qualityScore", "lateForSession", "clientEventId", "createdAt"
           ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&event.id)
    .bind(&event.user_id)
    .bind(event.session_id.as_deref())
    .bind(&event.language_code)
    .bind(event.event_type.as_str())
    .bind(event.concept_type.as_str())
    .bind(&event.concept_identifier)
    .bind(event.concept_id.as_deref())
    .bind(context)
    .bind(event.session_timestamp_seconds)
    .bind(event.quality_score.map(i64::from))
    .bind(event.late_for_session)
    .bind(event.client_event_id.as_deref())
    .bind(to_millis(event.created_at))
    .execute(proxy.pool())
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn find_by_client_id(
    proxy: &DatabaseProxy,
    user_id: &str,
    client_event_id: &str,
) -> Result<Option<ConceptEvent>, sqlx::Error> {
    let sql = format!(
        r#"SELECT {EVENT_COLUMNS} FROM "concept_events"
           WHERE "userId" = ? AND "clientEventId" = ? LIMIT 1"#
    );
    let row = sqlx::query(&sql)
        .bind(user_id)
        .bind(client_event_id)
        .fetch_optional(proxy.pool())
        .await?;
    row.as_ref().map(map_event).transpose()
}

/// Newest first; ties on `createdAt` fall back to insertion order.
pub async fn list(
    proxy: &DatabaseProxy,
    filter: &EventFilter,
) -> Result<Vec<ConceptEvent>, sqlx::Error> {
    let sql = format!(
        r#"SELECT {EVENT_COLUMNS} FROM "concept_events"
           WHERE "userId" = ?
             AND (? IS NULL OR "languageCode" = ?)
             AND (? IS NULL OR "conceptType" = ?)
             AND (? IS NULL OR "conceptIdentifier" = ?)
           ORDER BY "createdAt" DESC, "seq" DESC
           LIMIT ?"#
    );
    let concept_type = filter.concept_type.map(ConceptType::as_str);
    let rows = sqlx::query(&sql)
        .bind(&filter.user_id)
        .bind(filter.language_code.as_deref())
        .bind(filter.language_code.as_deref())
        .bind(concept_type)
        .bind(concept_type)
        .bind(filter.concept_identifier.as_deref())
        .bind(filter.concept_identifier.as_deref())
        .bind(filter.limit)
        .fetch_all(proxy.pool())
        .await?;
    rows.iter().map(map_event).collect()
}

/// Full history of one concept in log order.
pub async fn list_for_concept(
    proxy: &DatabaseProxy,
    key: &ConceptKey,
) -> Result<Vec<ConceptEvent>, sqlx::Error> {
    list_for_concept_after(proxy, key, 0).await
}

/// Events of one concept logged after position `after_seq`, in log order.
pub async fn list_for_concept_after(
    proxy: &DatabaseProxy,
    key: &ConceptKey,
    after_seq: i64,
) -> Result<Vec<ConceptEvent>, sqlx::Error> {
    let sql = format!(
        r#"SELECT {EVENT_COLUMNS} FROM "concept_events"
           WHERE "userId" = ? AND "languageCode" = ? AND "conceptType" = ? AND "conceptIdentifier" = ?
             AND "seq" > ?
           ORDER BY "seq" ASC"#
    );
    let rows = sqlx::query(&sql)
        .bind(&key.user_id)
        .bind(&key.language_code)
        .bind(key.concept_type.as_str())
        .bind(&key.concept_identifier)
        .bind(after_seq)
        .fetch_all(proxy.pool())
        .await?;
    rows.iter().map(map_event).collect()
}

/// Distinct concepts referenced by a session, in first-touched order.
pub async fn concepts_touched_by_session(
    proxy: &DatabaseProxy,
    session_id: &str,
) -> Result<Vec<TouchedConcept>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT "conceptType", "conceptIdentifier", MIN("seq") AS "firstSeen"
           FROM "concept_events"
           WHERE "sessionId" = ?
           GROUP BY "conceptType", "conceptIdentifier"
           ORDER BY "firstSeen" ASC"#,
    )
    .bind(session_id)
    .fetch_all(proxy.pool())
    .await?;

    rows.iter()
        .map(|row| {
            Ok(TouchedConcept {
                concept_type: decode_concept_type(row)?,
                concept_identifier: row.try_get("conceptIdentifier")?,
            })
        })
        .collect()
}

pub async fn count_for_session(
    proxy: &DatabaseProxy,
    session_id: &str,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(r#"SELECT COUNT(*) FROM "concept_events" WHERE "sessionId" = ?"#)
        .bind(session_id)
        .fetch_one(proxy.pool())
        .await
}

fn decode_concept_type(row: &SqliteRow) -> Result<ConceptType, sqlx::Error> {
    let raw: String = row.try_get("conceptType")?;
    raw.parse::<ConceptType>()
        .map_err(|err| sqlx::Error::ColumnDecode {
            index: "conceptType".to_string(),
            source: Box::new(err),
        })
}

fn map_event(row: &SqliteRow) -> Result<ConceptEvent, sqlx::Error> {
    let event_type: String = row.try_get("eventType")?;
    let context: String = row.try_get("context")?;
    let context = match serde_json::from_str::<Value>(&context) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    let quality_score: Option<i64> = row.try_get("qualityScore")?;

    Ok(ConceptEvent {
        seq: row.try_get("seq")?,
        id: row.try_get("id")?,
        user_id: row.try_get("userId")?,
        session_id: row.try_get("sessionId")?,
        language_code: row.try_get("languageCode")?,
        event_type: EventType::from(event_type),
        concept_type: decode_concept_type(row)?,
        concept_identifier: row.try_get("conceptIdentifier")?,
        concept_id: row.try_get("conceptId")?,
        context,
        session_timestamp_seconds: row.try_get("sessionTimestampSeconds")?,
        quality_score: quality_score.and_then(|q| u8::try_from(q).ok()),
        late_for_session: row.try_get("lateForSession")?,
        client_event_id: row.try_get("clientEventId")?,
        created_at: from_millis(row.try_get("createdAt")?),
    })
}
