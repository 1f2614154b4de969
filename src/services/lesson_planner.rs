use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::progress::completed_lessons;
use super::{normalize_language, required_text};
use crate::curriculum::sequencer::{mastered_content, select_lesson, LessonContext, LessonSelection};
use crate::curriculum::CurriculumRegistry;
use crate::db::operations::concepts;
use crate::db::DatabaseProxy;
use crate::memory::SchedulerPolicy;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FreeFormReason {
    NoCurriculum,
    LessonNotFound,
    CurriculumComplete,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LessonPlan {
    #[serde(rename_all = "camelCase")]
    Curriculum {
        context: LessonContext,
        completed_lesson_ids: Vec<i64>,
    },
    /// The caller should generate an open-ended lesson instead.
    #[serde(rename_all = "camelCase")]
    FreeForm {
        reason: FreeFormReason,
        language_code: String,
        requested_lesson_id: Option<i64>,
        completed_lesson_ids: Vec<i64>,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanInput {
    pub user_id: Option<String>,
    pub lesson_id: Option<i64>,
    /// Comma-separated ids; overrides the stored progress when present.
    pub completed_lesson_ids: Option<String>,
}

fn parse_completed(raw: Option<&str>) -> Result<Option<BTreeSet<i64>>, PlanError> {
    let Some(raw) = raw.map(str::trim) else {
        return Ok(None);
    };
    if raw.is_empty() {
        return Ok(Some(BTreeSet::new()));
    }
    raw.split(',')
        .map(|part| {
            part.trim().parse::<i64>().map_err(|_| {
                PlanError::Validation(format!("completedLessonIds has an invalid id: {part}"))
            })
        })
        .collect::<Result<BTreeSet<_>, _>>()
        .map(Some)
}

/// Chooses the next lesson for the learner and assembles its context, or says
/// why the lesson has to be free-form.
pub async fn plan_next_lesson(
    proxy: &DatabaseProxy,
    curricula: &CurriculumRegistry,
    policy: &SchedulerPolicy,
    language_code: &str,
    input: PlanInput,
) -> Result<LessonPlan, PlanError> {
    let user_id = required_text(input.user_id.as_deref(), "userId").map_err(PlanError::Validation)?;
    let language = normalize_language(language_code);

    let completed = match parse_completed(input.completed_lesson_ids.as_deref())? {
        Some(ids) => ids,
        None => completed_lessons(proxy, &user_id, &language).await?,
    };
    let completed_ids: Vec<i64> = completed.iter().copied().collect();

    let curriculum = curricula.get(&language);
    let free_form = |reason| LessonPlan::FreeForm {
        reason,
        language_code: language.clone(),
        requested_lesson_id: input.lesson_id,
        completed_lesson_ids: completed_ids.clone(),
    };

    let (curriculum, lesson) = match (curriculum, select_lesson(curriculum, &completed, input.lesson_id)) {
        (Some(curriculum), LessonSelection::Lesson(lesson)) => (curriculum, lesson),
        (_, LessonSelection::LessonNotFound(lesson_id)) => {
            tracing::info!(language = %language, lesson_id, "requested lesson not found, planning free-form");
            return Ok(free_form(FreeFormReason::LessonNotFound));
        }
        (_, LessonSelection::CurriculumComplete) => {
            return Ok(free_form(FreeFormReason::CurriculumComplete))
        }
        _ => return Ok(free_form(FreeFormReason::NoCurriculum)),
    };

    let memories = concepts::list_for_language(proxy, &user_id, &language, None).await?;
    let content = mastered_content(curriculum, &completed, &memories, policy);

    Ok(LessonPlan::Curriculum {
        context: LessonContext::build(curriculum, lesson, content),
        completed_lesson_ids: completed_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_ids_parse_from_csv() {
        assert_eq!(parse_completed(None).unwrap(), None);
        assert_eq!(parse_completed(Some("")).unwrap(), Some(BTreeSet::new()));
        assert_eq!(
            parse_completed(Some("2, 1,2")).unwrap(),
            Some(BTreeSet::from([1, 2]))
        );
        assert!(parse_completed(Some("1,x")).is_err());
    }
}
