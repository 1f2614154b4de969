use std::cmp::Reverse;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::model::{ConceptKey, ConceptMemory, MasteryLevel};
use super::quality::{Assessment, MAX_QUALITY};
use crate::config::{env_f64, env_i64, env_usize};

/// Review-scheduling constants. Defaults follow the classic SM-2 rule; every
/// value can be overridden through `SRS_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerPolicy {
    pub initial_ease: f64,
    pub min_ease: f64,
    pub failure_ease_penalty: f64,
    pub passing_quality: u8,
    pub first_interval_days: i64,
    pub second_interval_days: i64,
    pub failure_interval_days: i64,
    pub max_interval_days: i64,
    pub mastered_min_repetitions: i64,
    pub mastered_min_interval_days: i64,
    pub struggling_failures: i64,
    pub review_item_cap: usize,
    pub context_grammar_cap: usize,
}

impl Default for SchedulerPolicy {
    fn default() -> Self {
        Self {
            initial_ease: 2.5,
            min_ease: 1.3,
            failure_ease_penalty: 0.2,
            passing_quality: 3,
            first_interval_days: 1,
            second_interval_days: 6,
            failure_interval_days: 1,
            max_interval_days: 36500,
            mastered_min_repetitions: 3,
            mastered_min_interval_days: 21,
            struggling_failures: 2,
            review_item_cap: 20,
            context_grammar_cap: 10,
        }
    }
}

impl SchedulerPolicy {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let min_ease = env_f64("SRS_MIN_EASE", defaults.min_ease).max(1.0);
        let passing_quality = env_i64("SRS_PASSING_QUALITY", defaults.passing_quality as i64)
            .clamp(1, MAX_QUALITY as i64) as u8;

        Self {
            initial_ease: env_f64("SRS_INITIAL_EASE", defaults.initial_ease).max(min_ease),
            min_ease,
            failure_ease_penalty: env_f64("SRS_FAILURE_EASE_PENALTY", defaults.failure_ease_penalty)
                .max(0.0),
            passing_quality,
            first_interval_days: env_i64("SRS_FIRST_INTERVAL_DAYS", defaults.first_interval_days)
                .max(1),
            second_interval_days: env_i64(
                "SRS_SECOND_INTERVAL_DAYS",
                defaults.second_interval_days,
            )
            .max(1),
            failure_interval_days: env_i64(
                "SRS_FAILURE_INTERVAL_DAYS",
                defaults.failure_interval_days,
            )
            .max(1),
            max_interval_days: env_i64("SRS_MAX_INTERVAL_DAYS", defaults.max_interval_days)
                .clamp(1, 36500),
            mastered_min_repetitions: env_i64(
                "SRS_MASTERED_MIN_REPETITIONS",
                defaults.mastered_min_repetitions,
            )
            .max(1),
            mastered_min_interval_days: env_i64(
                "SRS_MASTERED_MIN_INTERVAL_DAYS",
                defaults.mastered_min_interval_days,
            )
            .max(0),
            struggling_failures: env_i64("SRS_STRUGGLING_FAILURES", defaults.struggling_failures)
                .max(1),
            review_item_cap: env_usize("SRS_REVIEW_ITEM_CAP", defaults.review_item_cap).max(1),
            context_grammar_cap: env_usize("SRS_CONTEXT_GRAMMAR_CAP", defaults.context_grammar_cap)
                .max(1),
        }
    }
}

/// A concept seen for the first time: not yet reviewed, due immediately.
pub fn fresh_memory(
    key: &ConceptKey,
    concept_id: Option<&str>,
    now: DateTime<Utc>,
    policy: &SchedulerPolicy,
) -> ConceptMemory {
    ConceptMemory {
        id: Uuid::new_v4().to_string(),
        key: key.clone(),
        concept_id: concept_id.map(str::to_string),
        ease_factor: policy.initial_ease,
        interval_days: 0,
        repetition_count: 0,
        consecutive_failures: 0,
        due_at: now,
        last_quality: None,
        last_reviewed_at: None,
        last_event_seq: 0,
        version: 0,
        created_at: now,
        updated_at: now,
    }
}

/// Applies one graded review to `memory`. Pure: the same inputs always give the
/// same output. The row version is left for the store to bump.
pub fn apply_quality(
    memory: &ConceptMemory,
    quality: u8,
    now: DateTime<Utc>,
    policy: &SchedulerPolicy,
) -> ConceptMemory {
    let q = quality.min(MAX_QUALITY);
    let mut next = memory.clone();

    if q < policy.passing_quality {
        next.repetition_count = 0;
        next.consecutive_failures = memory.consecutive_failures + 1;
        next.interval_days = policy.failure_interval_days;
        next.ease_factor = (memory.ease_factor - policy.failure_ease_penalty).max(policy.min_ease);
    } else {
        next.consecutive_failures = 0;
        next.repetition_count = memory.repetition_count + 1;
        next.interval_days = match next.repetition_count {
            1 => policy.first_interval_days,
            2 => policy.second_interval_days,
            _ => ((memory.interval_days.max(1) as f64) * memory.ease_factor).round() as i64,
        }
        .min(policy.max_interval_days);
        let miss = f64::from(MAX_QUALITY - q);
        let delta = 0.1 - miss * (0.08 + miss * 0.02);
        next.ease_factor = (memory.ease_factor + delta).max(policy.min_ease);
    }

    next.due_at = now + Duration::days(next.interval_days);
    next.last_quality = Some(q);
    next.last_reviewed_at = Some(now);
    next.updated_at = now;
    next
}

/// Get-or-default followed by the transition for one assessed event.
///
/// Returns `None` when nothing has to be written: an exposure of a concept
/// that is already tracked.
pub fn advance(
    current: Option<&ConceptMemory>,
    key: &ConceptKey,
    concept_id: Option<&str>,
    assessment: Assessment,
    now: DateTime<Utc>,
    policy: &SchedulerPolicy,
) -> Option<ConceptMemory> {
    match (current, assessment) {
        (Some(_), Assessment::Exposure) => None,
        (None, Assessment::Exposure) => Some(fresh_memory(key, concept_id, now, policy)),
        (Some(existing), Assessment::Graded(q)) => {
            let mut next = apply_quality(existing, q, now, policy);
            if next.concept_id.is_none() {
                next.concept_id = concept_id.map(str::to_string);
            }
            Some(next)
        }
        (None, Assessment::Graded(q)) => {
            let seed = fresh_memory(key, concept_id, now, policy);
            Some(apply_quality(&seed, q, now, policy))
        }
    }
}

pub fn classify(memory: &ConceptMemory, policy: &SchedulerPolicy) -> MasteryLevel {
    if memory.consecutive_failures >= policy.struggling_failures {
        MasteryLevel::Struggling
    } else if memory.repetition_count == 0 {
        MasteryLevel::New
    } else if memory.repetition_count >= policy.mastered_min_repetitions
        && memory.interval_days >= policy.mastered_min_interval_days
    {
        MasteryLevel::Mastered
    } else {
        MasteryLevel::Learning
    }
}

pub fn is_due(memory: &ConceptMemory, now: DateTime<Utc>) -> bool {
    memory.due_at <= now
}

/// Due concepts, most at-risk first: struggling, then earliest due date, then
/// fewest repetitions.
pub fn rank_due_items(
    items: Vec<ConceptMemory>,
    now: DateTime<Utc>,
    policy: &SchedulerPolicy,
) -> Vec<ConceptMemory> {
    let mut due: Vec<ConceptMemory> = items.into_iter().filter(|m| is_due(m, now)).collect();
    due.sort_by_cached_key(|m| {
        (
            Reverse(classify(m, policy) == MasteryLevel::Struggling),
            m.due_at,
            m.repetition_count,
            m.key.concept_identifier.clone(),
        )
    });
    due
}
