//! Read-modify-write of one concept's scheduling state.
//!
//! The event log is the source of truth. A stored `ConceptMemory` records the
//! log position it has folded up to (`last_event_seq`); an update folds every
//! later event for the concept in log order and writes the result only if the
//! row version is still the one that was read. The stored state therefore
//! always equals a replay of some prefix of the log, whatever order concurrent
//! writers win their races in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{normalize_language, required_text};
use crate::db::operations::{concepts, events};
use crate::db::DatabaseProxy;
use crate::memory::scheduler::advance;
use crate::memory::{
    assess_quality, Assessment, ConceptKey, ConceptMemory, ConceptType, EventType, SchedulerPolicy,
};

#[derive(Debug, Error)]
pub enum MemoryUpdateError {
    #[error("concept {concept} still contended after {attempts} attempts")]
    Contended { concept: String, attempts: u32 },
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

/// Brings the stored state of `key` up to date with its log, at least through
/// position `through_seq`. Returns the state after the update, or `None` when
/// the log holds nothing for the concept.
///
/// Events left unapplied by an earlier failure are picked up here as well.
pub async fn apply_logged_events(
    proxy: &DatabaseProxy,
    key: &ConceptKey,
    through_seq: i64,
    policy: &SchedulerPolicy,
) -> Result<Option<ConceptMemory>, MemoryUpdateError> {
    let max_attempts = proxy.cas_max_retries();

    for attempt in 1..=max_attempts {
        let current = concepts::find(proxy, key).await?;
        if let Some(existing) = current.as_ref() {
            if existing.last_event_seq >= through_seq {
                return Ok(current);
            }
        }

        let after = current.as_ref().map_or(0, |m| m.last_event_seq);
        let pending = events::list_for_concept_after(proxy, key, after).await?;
        let (folded, changed) = fold_events(current.clone(), key, &pending, policy);
        let Some(mut next) = folded else {
            return Ok(None);
        };
        if !changed {
            // Only exposures of a tracked concept: nothing to write.
            return Ok(current);
        }

        let written = match &current {
            None => {
                next.version = 1;
                concepts::insert_if_absent(proxy, &next).await?
            }
            Some(existing) => {
                next.version = existing.version + 1;
                concepts::compare_and_swap(proxy, &next, existing.version).await?
            }
        };

        if written {
            return Ok(Some(next));
        }

        tracing::debug!(concept = %key, attempt, "concept version conflict, retrying");
        tokio::task::yield_now().await;
    }

    Err(MemoryUpdateError::Contended {
        concept: key.to_string(),
        attempts: max_attempts,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayOutcome {
    pub memory: ConceptMemory,
    pub events_applied: usize,
    pub previous: Option<ConceptMemory>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayInput {
    pub user_id: Option<String>,
    pub language_code: Option<String>,
    pub concept_type: Option<String>,
    pub concept_identifier: Option<String>,
}

impl ReplayInput {
    /// The concept to rebuild, or a validation message.
    pub fn concept_key(&self) -> Result<ConceptKey, String> {
        let user_id = required_text(self.user_id.as_deref(), "userId")?;
        let language = required_text(self.language_code.as_deref(), "languageCode")?;
        let concept_type = required_text(self.concept_type.as_deref(), "conceptType")?
            .parse::<ConceptType>()
            .map_err(|err| err.to_string())?;
        let identifier = required_text(self.concept_identifier.as_deref(), "conceptIdentifier")?;
        Ok(ConceptKey::new(
            user_id,
            normalize_language(&language),
            concept_type,
            &identifier,
        ))
    }
}

/// How an already logged event feeds the scheduler.
pub fn assessment_for_replay(event: &events::ConceptEvent) -> Assessment {
    if event.event_type == EventType::Exposure {
        return Assessment::Exposure;
    }
    match event.quality_score {
        Some(q) => Assessment::Graded(q),
        None => assess_quality(&event.event_type, &event.context),
    }
}

/// Folds `events` onto `start` in the order given. The flag reports whether
/// any event moved the schedule; exposures of a tracked concept do not.
fn fold_events(
    start: Option<ConceptMemory>,
    key: &ConceptKey,
    events: &[events::ConceptEvent],
    policy: &SchedulerPolicy,
) -> (Option<ConceptMemory>, bool) {
    let mut state = start;
    let mut changed = false;

    for event in events {
        if let Some(next) = advance(
            state.as_ref(),
            key,
            event.concept_id.as_deref(),
            assessment_for_replay(event),
            event.created_at,
            policy,
        ) {
            state = Some(next);
            changed = true;
        }
        if let Some(memory) = state.as_mut() {
            memory.last_event_seq = event.seq;
        }
    }

    (state, changed)
}

/// Folds a concept's full history through the scheduler in log order.
/// `None` when the concept has no events.
pub fn rebuild_from_events(
    key: &ConceptKey,
    history: &[events::ConceptEvent],
    policy: &SchedulerPolicy,
) -> Option<ConceptMemory> {
    fold_events(None, key, history, policy).0
}

/// Recomputes the stored state of `key` from its event log and writes it back.
/// Returns `Ok(None)` if the log holds no events for the concept.
pub async fn replay_concept(
    proxy: &DatabaseProxy,
    key: &ConceptKey,
    now: DateTime<Utc>,
    policy: &SchedulerPolicy,
) -> Result<Option<ReplayOutcome>, MemoryUpdateError> {
    let max_attempts = proxy.cas_max_retries();
    for attempt in 1..=max_attempts {
        let history = events::list_for_concept(proxy, key).await?;
        let Some(rebuilt) = rebuild_from_events(key, &history, policy) else {
            return Ok(None);
        };

        let current = concepts::find(proxy, key).await?;
        let mut next = rebuilt;
        next.updated_at = now;

        let written = match &current {
            None => {
                next.version = 1;
                concepts::insert_if_absent(proxy, &next).await?
            }
            Some(existing) => {
                next.id = existing.id.clone();
                next.created_at = existing.created_at;
                next.version = existing.version + 1;
                concepts::compare_and_swap(proxy, &next, existing.version).await?
            }
        };

        if written {
            tracing::info!(
                concept = %key,
                events = history.len(),
                "concept state rebuilt from event log"
            );
            return Ok(Some(ReplayOutcome {
                memory: next,
                events_applied: history.len(),
                previous: current,
            }));
        }

        tracing::debug!(concept = %key, attempt, "replay version conflict, retrying");
        tokio::task::yield_now().await;
    }

    Err(MemoryUpdateError::Contended {
        concept: key.to_string(),
        attempts: max_attempts,
    })
}
