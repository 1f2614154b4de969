//! In-lesson lookups over the concept store and curricula. Every query here is
//! read-only, so a caller may abandon one at any point.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::lesson_sessions::{last_session_summary, SessionSummary};
use super::nl_router::{self, Route};
use super::{normalize_language, required_text};
use crate::curriculum::CurriculumRegistry;
use crate::db::operations::concepts;
use crate::db::DatabaseProxy;
use crate::memory::scheduler::{classify, rank_due_items};
use crate::memory::{ConceptKey, ConceptMemory, ConceptType, MasteryLevel, SchedulerPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    CheckVocabulary,
    GetReviewItems,
    GetLastSession,
    GetStrugglingAreas,
    GetRelatedVocabulary,
    NaturalLanguage,
}

impl QueryType {
    pub const fn as_str(self) -> &'static str {
        match self {
            QueryType::CheckVocabulary => "check_vocabulary",
            QueryType::GetReviewItems => "get_review_items",
            QueryType::GetLastSession => "get_last_session",
            QueryType::GetStrugglingAreas => "get_struggling_areas",
            QueryType::GetRelatedVocabulary => "get_related_vocabulary",
            QueryType::NaturalLanguage => "natural_language",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryType {
    type Err = QueryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "check_vocabulary" => Ok(QueryType::CheckVocabulary),
            "get_review_items" => Ok(QueryType::GetReviewItems),
            "get_last_session" => Ok(QueryType::GetLastSession),
            "get_struggling_areas" => Ok(QueryType::GetStrugglingAreas),
            "get_related_vocabulary" => Ok(QueryType::GetRelatedVocabulary),
            "natural_language" => Ok(QueryType::NaturalLanguage),
            other => Err(QueryError::UnknownQueryType(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("{0}")]
    Validation(String),
    #[error("unknown query type: {0}")]
    UnknownQueryType(String),
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub user_id: Option<String>,
    pub language_code: Option<String>,
    pub query_type: Option<String>,
    #[serde(default)]
    pub params: Option<Map<String, Value>>,
}

/// A concept as shown to the learner mid-lesson.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptSnapshot {
    pub concept_type: ConceptType,
    pub concept_identifier: String,
    pub concept_id: Option<String>,
    pub mastery: MasteryLevel,
    pub ease_factor: f64,
    pub interval_days: i64,
    pub repetition_count: i64,
    pub consecutive_failures: i64,
    pub due_at: DateTime<Utc>,
    pub last_quality: Option<u8>,
    pub last_reviewed_at: Option<DateTime<Utc>>,
}

impl ConceptSnapshot {
    pub fn from_memory(memory: &ConceptMemory, policy: &SchedulerPolicy) -> Self {
        Self {
            concept_type: memory.key.concept_type,
            concept_identifier: memory.key.concept_identifier.clone(),
            concept_id: memory.concept_id.clone(),
            mastery: classify(memory, policy),
            ease_factor: memory.ease_factor,
            interval_days: memory.interval_days,
            repetition_count: memory.repetition_count,
            consecutive_failures: memory.consecutive_failures,
            due_at: memory.due_at,
            last_quality: memory.last_quality,
            last_reviewed_at: memory.last_reviewed_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedWord {
    pub term: String,
    pub translation: String,
    pub part_of_speech: Option<String>,
    pub tags: Vec<String>,
    pub lesson_id: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryResult {
    #[serde(rename_all = "camelCase")]
    Vocabulary {
        term: String,
        seen: bool,
        concept: Option<ConceptSnapshot>,
    },
    #[serde(rename_all = "camelCase")]
    ReviewItems {
        vocabulary: Vec<ConceptSnapshot>,
        grammar: Vec<ConceptSnapshot>,
        vocabulary_due: usize,
        grammar_due: usize,
    },
    #[serde(rename_all = "camelCase")]
    LastSession { session: Option<SessionSummary> },
    #[serde(rename_all = "camelCase")]
    StrugglingAreas {
        vocabulary: Vec<ConceptSnapshot>,
        grammar: Vec<ConceptSnapshot>,
    },
    #[serde(rename_all = "camelCase")]
    RelatedVocabulary {
        category: String,
        curriculum_found: bool,
        items: Vec<RelatedWord>,
    },
    #[serde(rename_all = "camelCase")]
    Unrecognized { query: String, message: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub query_type: QueryType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interpreted_as: Option<QueryType>,
    pub result: QueryResult,
}

pub async fn run_query(
    proxy: &DatabaseProxy,
    curricula: &CurriculumRegistry,
    policy: &SchedulerPolicy,
    request: QueryRequest,
    now: DateTime<Utc>,
) -> Result<QueryResponse, QueryError> {
    let user_id = required_text(request.user_id.as_deref(), "userId").map_err(QueryError::Validation)?;
    let language = required_text(request.language_code.as_deref(), "languageCode")
        .map(|l| normalize_language(&l))
        .map_err(QueryError::Validation)?;
    let query_type: QueryType = required_text(request.query_type.as_deref(), "queryType")
        .map_err(QueryError::Validation)?
        .parse()?;
    let params = request.params.unwrap_or_default();
    let scope = Scope {
        proxy,
        curricula,
        policy,
        user_id: &user_id,
        language: &language,
        now,
    };

    let route = match query_type {
        QueryType::CheckVocabulary => Route::CheckVocabulary {
            term: required_param(&params, &["term", "word"])?,
        },
        QueryType::GetReviewItems => Route::ReviewItems,
        QueryType::GetLastSession => Route::LastSession,
        QueryType::GetStrugglingAreas => Route::StrugglingAreas,
        QueryType::GetRelatedVocabulary => Route::RelatedVocabulary {
            category: required_param(&params, &["category", "tag"])?,
        },
        QueryType::NaturalLanguage => {
            let question = required_param(&params, &["query", "question", "text"])?;
            return natural_language(&scope, &question).await;
        }
    };

    let result = scope.execute(route).await?;
    Ok(QueryResponse {
        query_type,
        interpreted_as: None,
        result,
    })
}

async fn natural_language(scope: &Scope<'_>, question: &str) -> Result<QueryResponse, QueryError> {
    let route = nl_router::route(question);
    let Some(interpreted_as) = route_query_type(&route) else {
        tracing::info!(user_id = %scope.user_id, query = %question, "natural language query not interpreted");
        return Ok(QueryResponse {
            query_type: QueryType::NaturalLanguage,
            interpreted_as: None,
            result: unrecognized(question),
        });
    };

    let result = scope.execute(route).await?;
    Ok(QueryResponse {
        query_type: QueryType::NaturalLanguage,
        interpreted_as: Some(interpreted_as),
        result,
    })
}

fn unrecognized(question: &str) -> QueryResult {
    QueryResult::Unrecognized {
        query: question.to_string(),
        message: "unable to interpret the question".to_string(),
    }
}

fn route_query_type(route: &Route) -> Option<QueryType> {
    match route {
        Route::CheckVocabulary { .. } => Some(QueryType::CheckVocabulary),
        Route::ReviewItems => Some(QueryType::GetReviewItems),
        Route::LastSession => Some(QueryType::GetLastSession),
        Route::StrugglingAreas => Some(QueryType::GetStrugglingAreas),
        Route::RelatedVocabulary { .. } => Some(QueryType::GetRelatedVocabulary),
        Route::Unrecognized => None,
    }
}

fn required_param(params: &Map<String, Value>, names: &[&str]) -> Result<String, QueryError> {
    names
        .iter()
        .find_map(|name| params.get(*name).and_then(Value::as_str))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| QueryError::Validation(format!("params.{} is required", names[0])))
}

struct Scope<'a> {
    proxy: &'a DatabaseProxy,
    curricula: &'a CurriculumRegistry,
    policy: &'a SchedulerPolicy,
    user_id: &'a str,
    language: &'a str,
    now: DateTime<Utc>,
}

impl Scope<'_> {
    async fn execute(&self, route: Route) -> Result<QueryResult, QueryError> {
        match route {
            Route::CheckVocabulary { term } => self.check_vocabulary(term).await,
            Route::ReviewItems => self.review_items().await,
            Route::LastSession => Ok(QueryResult::LastSession {
                session: last_session_summary(self.proxy, self.user_id, self.language).await?,
            }),
            Route::StrugglingAreas => self.struggling_areas().await,
            Route::RelatedVocabulary { category } => Ok(self.related_vocabulary(category)),
            Route::Unrecognized => Ok(unrecognized("")),
        }
    }

    async fn check_vocabulary(&self, term: String) -> Result<QueryResult, QueryError> {
        let key = ConceptKey::new(self.user_id, self.language, ConceptType::Vocabulary, &term);
        let memory = concepts::find(self.proxy, &key).await?;
        Ok(QueryResult::Vocabulary {
            term: key.concept_identifier,
            seen: memory.is_some(),
            concept: memory.map(|m| ConceptSnapshot::from_memory(&m, self.policy)),
        })
    }

    async fn review_items(&self) -> Result<QueryResult, QueryError> {
        let (vocabulary, vocabulary_due) = self.due_for(ConceptType::Vocabulary).await?;
        let (grammar, grammar_due) = self.due_for(ConceptType::Grammar).await?;
        Ok(QueryResult::ReviewItems {
            vocabulary,
            grammar,
            vocabulary_due,
            grammar_due,
        })
    }

    async fn due_for(&self, concept_type: ConceptType) -> Result<(Vec<ConceptSnapshot>, usize), QueryError> {
        let rows = concepts::list_due(self.proxy, self.user_id, self.language, concept_type, self.now).await?;
        let ranked = rank_due_items(rows, self.now, self.policy);
        let total = ranked.len();
        let items = ranked
            .iter()
            .take(self.policy.review_item_cap)
            .map(|m| ConceptSnapshot::from_memory(m, self.policy))
            .collect();
        Ok((items, total))
    }

    async fn struggling_areas(&self) -> Result<QueryResult, QueryError> {
        let rows = concepts::list_struggling(
            self.proxy,
            self.user_id,
            self.language,
            self.policy.struggling_failures,
        )
        .await?;
        let (grammar, vocabulary): (Vec<ConceptSnapshot>, Vec<ConceptSnapshot>) = rows
            .iter()
            .map(|m| ConceptSnapshot::from_memory(m, self.policy))
            .filter(|s| s.mastery == MasteryLevel::Struggling)
            .partition(|s| s.concept_type == ConceptType::Grammar);
        Ok(QueryResult::StrugglingAreas {
            vocabulary,
            grammar,
        })
    }

    fn related_vocabulary(&self, category: String) -> QueryResult {
        let Some(curriculum) = self.curricula.get(self.language) else {
            return QueryResult::RelatedVocabulary {
                category,
                curriculum_found: false,
                items: Vec::new(),
            };
        };

        let mut seen = std::collections::HashSet::new();
        let items = curriculum
            .lessons
            .iter()
            .flat_map(|lesson| lesson.vocabulary.iter().map(move |item| (lesson.id, item)))
            .filter(|(_, item)| item.has_tag(&category))
            .filter(|(_, item)| seen.insert(item.term.to_lowercase()))
            .map(|(lesson_id, item)| RelatedWord {
                term: item.term.clone(),
                translation: item.translation.clone(),
                part_of_speech: item.part_of_speech.clone(),
                tags: item.tags.clone(),
                lesson_id,
            })
            .collect();

        QueryResult::RelatedVocabulary {
            category,
            curriculum_found: true,
            items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_type_parsing_rejects_unknown() {
        assert_eq!(
            "get_review_items".parse::<QueryType>().ok(),
            Some(QueryType::GetReviewItems)
        );
        assert!(matches!(
            "get_everything".parse::<QueryType>(),
            Err(QueryError::UnknownQueryType(t)) if t == "get_everything"
        ));
    }

    #[test]
    fn required_param_accepts_aliases() {
        let mut params = Map::new();
        params.insert("word".to_string(), Value::String(" kula ".to_string()));
        assert_eq!(required_param(&params, &["term", "word"]).unwrap(), "kula");
        assert!(matches!(
            required_param(&Map::new(), &["category"]),
            Err(QueryError::Validation(_))
        ));
    }
}
