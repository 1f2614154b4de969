//! Maps one in-lesson event to a 0-5 recall quality.
//!
//! Context flags are read leniently: booleans, `"true"`/`"false"` strings and
//! 0/1 numbers are all accepted, and missing keys mean "not set".

use serde_json::{Map, Value};

use super::model::EventType;

pub const MAX_QUALITY: u8 = 5;
pub const NEUTRAL_QUALITY: u8 = 3;

/// Result of assessing one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assessment {
    /// First sight of a concept; creates the row but never moves the schedule.
    Exposure,
    Graded(u8),
}

impl Assessment {
    pub fn quality(self) -> Option<u8> {
        match self {
            Assessment::Exposure => None,
            Assessment::Graded(q) => Some(q),
        }
    }
}

pub fn assess_quality(event_type: &EventType, context: &Map<String, Value>) -> Assessment {
    match event_type {
        EventType::Exposure => Assessment::Exposure,
        EventType::RecallFailure => Assessment::Graded(failure_quality(context)),
        EventType::SelfCorrection => Assessment::Graded(3),
        EventType::RecallSuccess => Assessment::Graded(success_quality(context)),
        EventType::Production => Assessment::Graded(MAX_QUALITY),
        EventType::Other(raw) => {
            tracing::warn!(
                event_type = %raw,
                quality = NEUTRAL_QUALITY,
                "unknown event type, using neutral quality"
            );
            Assessment::Graded(NEUTRAL_QUALITY)
        }
    }
}

fn failure_quality(context: &Map<String, Value>) -> u8 {
    let no_attempt = flag(context, "noAttempt") == Some(true)
        || flag(context, "attempted") == Some(false);
    if no_attempt {
        return 0;
    }
    if flag(context, "nearMiss") == Some(true) || flag(context, "partial") == Some(true) {
        return 2;
    }
    1
}

fn success_quality(context: &Map<String, Value>) -> u8 {
    let hesitated = flag(context, "hesitation") == Some(true)
        || flag(context, "hesitated") == Some(true);
    let hint_used = flag(context, "hintUsed") == Some(true);
    let confident =
        flag(context, "fast") == Some(true) || flag(context, "confident") == Some(true);

    if confident && !hesitated && !hint_used {
        MAX_QUALITY
    } else {
        4
    }
}

fn flag(context: &Map<String, Value>, key: &str) -> Option<bool> {
    match context.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn exposure_is_not_graded() {
        assert_eq!(
            assess_quality(&EventType::Exposure, &Map::new()),
            Assessment::Exposure
        );
    }

    #[test]
    fn failure_without_attempt_scores_lower_than_wrong_attempt() {
        let none = assess_quality(&EventType::RecallFailure, &ctx(json!({"noAttempt": true})));
        let wrong = assess_quality(&EventType::RecallFailure, &Map::new());
        let near = assess_quality(&EventType::RecallFailure, &ctx(json!({"nearMiss": "true"})));
        assert_eq!(none, Assessment::Graded(0));
        assert_eq!(wrong, Assessment::Graded(1));
        assert_eq!(near, Assessment::Graded(2));
        assert_eq!(
            assess_quality(&EventType::RecallFailure, &ctx(json!({"attempted": false}))),
            Assessment::Graded(0)
        );
    }

    #[test]
    fn success_is_five_only_when_fast_and_unassisted() {
        assert_eq!(
            assess_quality(&EventType::RecallSuccess, &Map::new()),
            Assessment::Graded(4)
        );
        assert_eq!(
            assess_quality(&EventType::RecallSuccess, &ctx(json!({"fast": true}))),
            Assessment::Graded(5)
        );
        assert_eq!(
            assess_quality(
                &EventType::RecallSuccess,
                &ctx(json!({"confident": true, "hintUsed": true}))
            ),
            Assessment::Graded(4)
        );
        assert_eq!(
            assess_quality(
                &EventType::RecallSuccess,
                &ctx(json!({"fast": 1, "hesitation": true}))
            ),
            Assessment::Graded(4)
        );
    }

    #[test]
    fn fixed_scores_for_correction_and_production() {
        assert_eq!(
            assess_quality(&EventType::SelfCorrection, &Map::new()),
            Assessment::Graded(3)
        );
        assert_eq!(
            assess_quality(&EventType::Production, &Map::new()),
            Assessment::Graded(5)
        );
    }

    #[test]
    fn unknown_event_type_is_neutral() {
        let event = EventType::from("pointed_at_picture");
        assert_eq!(assess_quality(&event, &Map::new()), Assessment::Graded(3));
    }
}
