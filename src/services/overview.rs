use chrono::{DateTime, Utc};
use serde::Serialize;

use super::normalize_language;
use crate::db::operations::concepts;
use crate::db::DatabaseProxy;
use crate::memory::scheduler::{classify, is_due};
use crate::memory::{ConceptType, MasteryLevel, SchedulerPolicy};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelCounts {
    pub new: usize,
    pub learning: usize,
    pub mastered: usize,
    pub struggling: usize,
    pub total: usize,
    pub due: usize,
}

impl LevelCounts {
    fn add(&mut self, level: MasteryLevel, due: bool) {
        match level {
            MasteryLevel::New => self.new += 1,
            MasteryLevel::Learning => self.learning += 1,
            MasteryLevel::Mastered => self.mastered += 1,
            MasteryLevel::Struggling => self.struggling += 1,
        }
        self.total += 1;
        if due {
            self.due += 1;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryOverview {
    pub user_id: String,
    pub language_code: String,
    pub overall: LevelCounts,
    pub vocabulary: LevelCounts,
    pub grammar: LevelCounts,
    pub generated_at: DateTime<Utc>,
}

pub async fn mastery_overview(
    proxy: &DatabaseProxy,
    policy: &SchedulerPolicy,
    user_id: &str,
    language_code: &str,
    now: DateTime<Utc>,
) -> Result<MasteryOverview, sqlx::Error> {
    let language = normalize_language(language_code);
    let memories = concepts::list_for_language(proxy, user_id, &language, None).await?;

    let mut overview = MasteryOverview {
        user_id: user_id.to_string(),
        language_code: language,
        overall: LevelCounts::default(),
        vocabulary: LevelCounts::default(),
        grammar: LevelCounts::default(),
        generated_at: now,
    };

    for memory in &memories {
        let level = classify(memory, policy);
        let due = is_due(memory, now);
        overview.overall.add(level, due);
        match memory.key.concept_type {
            ConceptType::Vocabulary => overview.vocabulary.add(level, due),
            ConceptType::Grammar => overview.grammar.add(level, due),
        }
    }

    Ok(overview)
}
