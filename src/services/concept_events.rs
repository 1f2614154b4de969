use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use super::concept_memory::{apply_logged_events, MemoryUpdateError};
use super::{clamp_limit, normalize_language, optional_text, required_text};
use crate::db::operations::events::{self, ConceptEvent, EventFilter};
use crate::db::operations::{concepts, sessions, store_now};
use crate::db::DatabaseProxy;
use crate::memory::model::normalize_identifier;
use crate::memory::scheduler::classify;
use crate::memory::{
    assess_quality, ConceptKey, ConceptMemory, ConceptType, EventType, MasteryLevel,
    SchedulerPolicy,
};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordEventInput {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub language_code: Option<String>,
    pub event_type: Option<String>,
    pub concept_type: Option<String>,
    pub concept_identifier: Option<String>,
    pub concept_id: Option<String>,
    pub context: Option<Value>,
    pub session_timestamp_seconds: Option<f64>,
    pub client_event_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedEvent {
    pub event: ConceptEvent,
    pub quality_score: Option<u8>,
    pub memory: Option<ConceptMemory>,
    pub mastery: Option<MasteryLevel>,
    pub duplicate: bool,
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("{0}")]
    Validation(String),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("session {session_id} is for language {session_language}, not {event_language}")]
    SessionLanguageMismatch {
        session_id: String,
        session_language: String,
        event_language: String,
    },
    #[error("event {event_id} recorded but scheduler update failed: {source}")]
    SchedulerUpdate {
        event_id: String,
        source: MemoryUpdateError,
    },
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

struct ValidatedEvent {
    key: ConceptKey,
    session_id: Option<String>,
    event_type: EventType,
    concept_id: Option<String>,
    context: Map<String, Value>,
    session_timestamp_seconds: Option<f64>,
    client_event_id: Option<String>,
}

fn validate(input: RecordEventInput) -> Result<ValidatedEvent, EventError> {
    let user_id = required_text(input.user_id.as_deref(), "userId").map_err(EventError::Validation)?;
    let language_code = required_text(input.language_code.as_deref(), "languageCode")
        .map_err(EventError::Validation)?;
    let event_type =
        required_text(input.event_type.as_deref(), "eventType").map_err(EventError::Validation)?;
    let concept_type = required_text(input.concept_type.as_deref(), "conceptType")
        .map_err(EventError::Validation)?
        .parse::<ConceptType>()
        .map_err(|err| EventError::Validation(err.to_string()))?;
    let identifier = required_text(input.concept_identifier.as_deref(), "conceptIdentifier")
        .map_err(EventError::Validation)?;

    let context = match input.context {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map,
        Some(_) => {
            return Err(EventError::Validation(
                "context must be a JSON object".to_string(),
            ))
        }
    };

    if let Some(ts) = input.session_timestamp_seconds {
        if !ts.is_finite() || ts < 0.0 {
            return Err(EventError::Validation(
                "sessionTimestampSeconds must be a non-negative number".to_string(),
            ));
        }
    }

    Ok(ValidatedEvent {
        key: ConceptKey::new(user_id, normalize_language(&language_code), concept_type, &identifier),
        session_id: optional_text(input.session_id.as_deref()),
        event_type: EventType::from(event_type),
        concept_id: optional_text(input.concept_id.as_deref()),
        context,
        session_timestamp_seconds: input.session_timestamp_seconds,
        client_event_id: optional_text(input.client_event_id.as_deref()),
    })
}

pub async fn record_event(
    proxy: &DatabaseProxy,
    policy: &SchedulerPolicy,
    input: RecordEventInput,
) -> Result<RecordedEvent, EventError> {
    record_event_at(proxy, policy, input, store_now()).await
}

/// Logs the event, then advances the concept's schedule. The log write is the
/// source of truth: a failed schedule update leaves the event in place and is
/// reported with its id so the concept can be replayed.
pub async fn record_event_at(
    proxy: &DatabaseProxy,
    policy: &SchedulerPolicy,
    input: RecordEventInput,
    now: DateTime<Utc>,
) -> Result<RecordedEvent, EventError> {
    let validated = validate(input)?;

    if let Some(client_event_id) = validated.client_event_id.as_deref() {
        if let Some(existing) =
            events::find_by_client_id(proxy, &validated.key.user_id, client_event_id).await?
        {
            return duplicate_of(proxy, policy, existing).await;
        }
    }

    let mut late_for_session = false;
    if let Some(session_id) = validated.session_id.as_deref() {
        let session = sessions::find(proxy, session_id)
            .await?
            .filter(|s| s.user_id == validated.key.user_id)
            .ok_or_else(|| EventError::SessionNotFound(session_id.to_string()))?;
        if session.language_code != validated.key.language_code {
            return Err(EventError::SessionLanguageMismatch {
                session_id: session_id.to_string(),
                session_language: session.language_code,
                event_language: validated.key.language_code.clone(),
            });
        }
        if !session.is_open() {
            late_for_session = true;
            tracing::warn!(
                user_id = %validated.key.user_id,
                session_id = %session_id,
                concept = %validated.key,
                "event received after session was closed"
            );
        }
    }

    let assessment = assess_quality(&validated.event_type, &validated.context);
    let mut event = ConceptEvent {
        seq: 0,
        id: Uuid::new_v4().to_string(),
        user_id: validated.key.user_id.clone(),
        session_id: validated.session_id.clone(),
        language_code: validated.key.language_code.clone(),
        event_type: validated.event_type.clone(),
        concept_type: validated.key.concept_type,
        concept_identifier: validated.key.concept_identifier.clone(),
        concept_id: validated.concept_id.clone(),
        context: validated.context,
        session_timestamp_seconds: validated.session_timestamp_seconds,
        quality_score: assessment.quality(),
        late_for_session,
        client_event_id: validated.client_event_id.clone(),
        created_at: now,
    };

    match events::insert(proxy, &event).await {
        Ok(seq) => event.seq = seq,
        Err(err) => {
            let unique_violation = err
                .as_database_error()
                .map(|db| db.is_unique_violation())
                .unwrap_or(false);
            if let (true, Some(client_event_id)) =
                (unique_violation, event.client_event_id.as_deref())
            {
                if let Some(existing) =
                    events::find_by_client_id(proxy, &event.user_id, client_event_id).await?
                {
                    return duplicate_of(proxy, policy, existing).await;
                }
            }
            return Err(err.into());
        }
    }

    let memory = match apply_logged_events(proxy, &validated.key, event.seq, policy).await {
        Ok(memory) => memory,
        Err(source) => {
            tracing::error!(
                event_id = %event.id,
                concept = %validated.key,
                error = %source,
                "scheduler update failed after event was recorded"
            );
            return Err(EventError::SchedulerUpdate {
                event_id: event.id,
                source,
            });
        }
    };

    tracing::debug!(
        user_id = %event.user_id,
        concept = %validated.key,
        event_type = %event.event_type,
        quality = ?event.quality_score,
        interval_days = ?memory.as_ref().map(|m| m.interval_days),
        "concept event recorded"
    );

    Ok(RecordedEvent {
        quality_score: event.quality_score,
        mastery: memory.as_ref().map(|m| classify(m, policy)),
        memory,
        event,
        duplicate: false,
    })
}

async fn duplicate_of(
    proxy: &DatabaseProxy,
    policy: &SchedulerPolicy,
    existing: ConceptEvent,
) -> Result<RecordedEvent, EventError> {
    tracing::debug!(
        event_id = %existing.id,
        client_event_id = ?existing.client_event_id,
        "duplicate event delivery ignored"
    );
    let memory = concepts::find(proxy, &existing.concept_key()).await?;
    Ok(RecordedEvent {
        quality_score: existing.quality_score,
        mastery: memory.as_ref().map(|m| classify(m, policy)),
        memory,
        event: existing,
        duplicate: true,
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListEventsInput {
    pub user_id: Option<String>,
    pub language_code: Option<String>,
    pub concept_type: Option<String>,
    pub concept_identifier: Option<String>,
    pub limit: Option<i64>,
}

pub async fn list_events(
    proxy: &DatabaseProxy,
    input: ListEventsInput,
) -> Result<Vec<ConceptEvent>, EventError> {
    let user_id = required_text(input.user_id.as_deref(), "userId").map_err(EventError::Validation)?;
    let concept_type = optional_text(input.concept_type.as_deref())
        .map(|raw| raw.parse::<ConceptType>())
        .transpose()
        .map_err(|err| EventError::Validation(err.to_string()))?;

    let filter = EventFilter {
        user_id,
        language_code: optional_text(input.language_code.as_deref()).map(|l| normalize_language(&l)),
        concept_type,
        concept_identifier: optional_text(input.concept_identifier.as_deref())
            .map(|id| normalize_identifier(&id)),
        limit: clamp_limit(input.limit, 20, 200),
    };

    Ok(events::list(proxy, &filter).await?)
}
