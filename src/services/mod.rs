pub mod concept_events;
pub mod concept_memory;
pub mod lesson_planner;
pub mod lesson_sessions;
pub mod nl_router;
pub mod overview;
pub mod progress;
pub mod realtime_query;

/// Trimmed value of a required text field, or the validation message for it.
pub(crate) fn required_text(value: Option<&str>, field: &str) -> Result<String, String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| format!("{field} is required"))
}

/// Language codes are compared case-insensitively.
pub(crate) fn normalize_language(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

pub(crate) fn optional_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub(crate) fn clamp_limit(limit: Option<i64>, default: i64, max: i64) -> i64 {
    limit.unwrap_or(default).clamp(1, max)
}
