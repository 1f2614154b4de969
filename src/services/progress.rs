use std::collections::BTreeSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{normalize_language, optional_text, required_text};
use crate::db::operations::progress::{self, LanguageProgress, ProgressUpdate};
use crate::db::operations::{sessions, store_now};
use crate::db::DatabaseProxy;

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ProgressView {
    Single(LanguageProgress),
    All(Vec<LanguageProgress>),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertProgressInput {
    pub user_id: Option<String>,
    pub proficiency_level: Option<String>,
    pub current_lesson_id: Option<i64>,
    pub completed_lesson_ids: Option<Vec<i64>>,
}

fn empty_progress(user_id: &str, language_code: &str) -> LanguageProgress {
    let now = Utc::now();
    LanguageProgress {
        user_id: user_id.to_string(),
        language_code: language_code.to_string(),
        proficiency_level: None,
        current_lesson_id: None,
        completed_lesson_ids: Vec::new(),
        total_sessions: 0,
        total_practice_seconds: 0,
        last_practiced_at: None,
        created_at: now,
        updated_at: now,
    }
}

/// One language, or every language the user has practised. An untouched
/// language reads as empty progress rather than an error.
pub async fn get_progress(
    proxy: &DatabaseProxy,
    user_id: Option<&str>,
    language_code: Option<&str>,
) -> Result<ProgressView, ProgressError> {
    let user_id = required_text(user_id, "userId").map_err(ProgressError::Validation)?;

    match optional_text(language_code) {
        Some(language) => {
            let language = normalize_language(&language);
            let stored = progress::get(proxy, &user_id, &language).await?;
            Ok(ProgressView::Single(
                stored.unwrap_or_else(|| empty_progress(&user_id, &language)),
            ))
        }
        None => Ok(ProgressView::All(progress::list(proxy, &user_id).await?)),
    }
}

pub async fn upsert_progress(
    proxy: &DatabaseProxy,
    language_code: &str,
    input: UpsertProgressInput,
) -> Result<LanguageProgress, ProgressError> {
    let user_id = required_text(input.user_id.as_deref(), "userId").map_err(ProgressError::Validation)?;
    let language = required_text(Some(language_code), "languageCode")
        .map(|l| normalize_language(&l))
        .map_err(ProgressError::Validation)?;

    let completed_lesson_ids = match input.completed_lesson_ids {
        Some(ids) => {
            if ids.iter().any(|id| *id <= 0) {
                return Err(ProgressError::Validation(
                    "completedLessonIds must contain positive integers".to_string(),
                ));
            }
            Some(ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect())
        }
        None => None,
    };
    if matches!(input.current_lesson_id, Some(id) if id <= 0) {
        return Err(ProgressError::Validation(
            "currentLessonId must be a positive integer".to_string(),
        ));
    }

    let update = ProgressUpdate {
        proficiency_level: optional_text(input.proficiency_level.as_deref()),
        current_lesson_id: input.current_lesson_id,
        completed_lesson_ids,
    };
    progress::upsert(proxy, &user_id, &language, &update, store_now()).await?;

    progress::get(proxy, &user_id, &language)
        .await?
        .ok_or_else(|| ProgressError::Sql(sqlx::Error::RowNotFound))
}

/// Completed lessons: the stored progress set plus every closed curriculum session.
pub async fn completed_lessons(
    proxy: &DatabaseProxy,
    user_id: &str,
    language_code: &str,
) -> Result<BTreeSet<i64>, sqlx::Error> {
    let language = normalize_language(language_code);
    let mut completed: BTreeSet<i64> = progress::get(proxy, user_id, &language)
        .await?
        .map(|p| p.completed_lesson_ids.into_iter().collect())
        .unwrap_or_default();
    completed.extend(sessions::completed_curriculum_lessons(proxy, user_id, &language).await?);
    Ok(completed)
}
