use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConceptType {
    Vocabulary,
    Grammar,
}

impl ConceptType {
    pub const fn as_str(self) -> &'static str {
        match self {
            ConceptType::Vocabulary => "vocabulary",
            ConceptType::Grammar => "grammar",
        }
    }
}

impl fmt::Display for ConceptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown concept type: {0}")]
pub struct UnknownConceptType(pub String);

impl FromStr for ConceptType {
    type Err = UnknownConceptType;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "vocabulary" | "vocab" => Ok(ConceptType::Vocabulary),
            "grammar" => Ok(ConceptType::Grammar),
            other => Err(UnknownConceptType(other.to_string())),
        }
    }
}

/// Learner action kinds. Anything the front end sends that is not one of the
/// known kinds is kept verbatim as `Other` so ingestion never rejects it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    Exposure,
    RecallSuccess,
    RecallFailure,
    SelfCorrection,
    Production,
    Other(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::Exposure => "exposure",
            EventType::RecallSuccess => "recall_success",
            EventType::RecallFailure => "recall_failure",
            EventType::SelfCorrection => "self_correction",
            EventType::Production => "production",
            EventType::Other(raw) => raw.as_str(),
        }
    }
}

impl From<String> for EventType {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "exposure" => EventType::Exposure,
            "recall_success" => EventType::RecallSuccess,
            "recall_failure" => EventType::RecallFailure,
            "self_correction" => EventType::SelfCorrection,
            "production" => EventType::Production,
            _ => EventType::Other(value),
        }
    }
}

impl From<&str> for EventType {
    fn from(value: &str) -> Self {
        EventType::from(value.to_string())
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        match value {
            EventType::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one tracked concept: (user, language, type, identifier).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptKey {
    pub user_id: String,
    pub language_code: String,
    pub concept_type: ConceptType,
    pub concept_identifier: String,
}

impl ConceptKey {
    pub fn new(
        user_id: impl Into<String>,
        language_code: impl Into<String>,
        concept_type: ConceptType,
        concept_identifier: &str,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            language_code: language_code.into(),
            concept_type,
            concept_identifier: normalize_identifier(concept_identifier),
        }
    }
}

impl fmt::Display for ConceptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.user_id, self.language_code, self.concept_type, self.concept_identifier
        )
    }
}

/// Identifiers are matched case-insensitively with surrounding whitespace removed.
pub fn normalize_identifier(raw: &str) -> String {
    raw.trim().to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptMemory {
    pub id: String,
    #[serde(flatten)]
    pub key: ConceptKey,
    pub concept_id: Option<String>,
    pub ease_factor: f64,
    pub interval_days: i64,
    pub repetition_count: i64,
    pub consecutive_failures: i64,
    pub due_at: DateTime<Utc>,
    pub last_quality: Option<u8>,
    pub last_reviewed_at: Option<DateTime<Utc>>,
    /// Log position of the last event folded into this state.
    #[serde(default)]
    pub last_event_seq: i64,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MasteryLevel {
    New,
    Learning,
    Mastered,
    Struggling,
}

impl MasteryLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            MasteryLevel::New => "new",
            MasteryLevel::Learning => "learning",
            MasteryLevel::Mastered => "mastered",
            MasteryLevel::Struggling => "struggling",
        }
    }

    /// `learning` or `mastered`. Struggling concepts have been reviewed but are
    /// not counted as known.
    pub const fn is_at_least_learning(self) -> bool {
        matches!(self, MasteryLevel::Learning | MasteryLevel::Mastered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_parses_known_and_keeps_unknown() {
        assert_eq!(EventType::from("Recall_Success"), EventType::RecallSuccess);
        assert_eq!(EventType::from("production"), EventType::Production);
        assert_eq!(
            EventType::from("gesture"),
            EventType::Other("gesture".to_string())
        );
    }

    #[test]
    fn event_type_serializes_as_plain_string() {
        let json = serde_json::to_string(&EventType::SelfCorrection).unwrap();
        assert_eq!(json, "\"self_correction\"");
        let parsed: EventType = serde_json::from_str("\"exposure\"").unwrap();
        assert_eq!(parsed, EventType::Exposure);
    }

    #[test]
    fn concept_type_rejects_unknown_values() {
        assert_eq!("Grammar".parse::<ConceptType>(), Ok(ConceptType::Grammar));
        assert!("idiom".parse::<ConceptType>().is_err());
    }

    #[test]
    fn concept_key_normalizes_identifier() {
        let key = ConceptKey::new("u1", "sw", ConceptType::Vocabulary, "  Kulala ");
        assert_eq!(key.concept_identifier, "kulala");
    }
}
