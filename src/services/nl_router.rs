//! Keyword routing of free-text learner questions onto structured queries.
//!
//! Best effort only: anything that does not match a known phrasing comes back
//! as `Route::Unrecognized` instead of an error.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    CheckVocabulary { term: String },
    ReviewItems,
    LastSession,
    StrugglingAreas,
    RelatedVocabulary { category: String },
    Unrecognized,
}

const LAST_SESSION_MARKERS: &[&str] = &[
    "last session",
    "last lesson",
    "last time",
    "previous session",
    "previous lesson",
    "yesterday",
];

const STRUGGLING_MARKERS: &[&str] = &[
    "struggl",
    "difficult",
    "trouble",
    "weak",
    "keep forgetting",
    "mistakes",
    "hard for me",
];

const REVIEW_MARKERS: &[&str] = &[
    "review",
    "revise",
    "due",
    "practice",
    "practise",
    "what should i study",
];

const RELATED_MARKERS: &[&str] = &[
    "words related to ",
    "vocabulary related to ",
    "words about ",
    "vocabulary about ",
    "words for ",
    "vocabulary for ",
    "words in the category ",
    "related to ",
];

const CHECK_MARKERS: &[&str] = &[
    "do i know ",
    "did i learn ",
    "have i learned ",
    "have i learnt ",
    "have i seen ",
    "have i studied ",
    "did we cover ",
    "have we covered ",
    "do i remember ",
];

const TERM_PREFIXES: &[&str] = &["the word ", "the phrase ", "the term ", "the verb ", "the noun "];

pub fn route(question: &str) -> Route {
    let text = question.trim().to_lowercase();
    if text.is_empty() {
        return Route::Unrecognized;
    }

    if contains_any(&text, LAST_SESSION_MARKERS) {
        return Route::LastSession;
    }
    if let Some(term) = argument_after(&text, CHECK_MARKERS) {
        return Route::CheckVocabulary { term };
    }
    if let Some(category) = argument_after(&text, RELATED_MARKERS) {
        return Route::RelatedVocabulary { category };
    }
    if contains_any(&text, STRUGGLING_MARKERS) {
        return Route::StrugglingAreas;
    }
    if contains_any(&text, REVIEW_MARKERS) {
        return Route::ReviewItems;
    }
    if let Some(term) = quoted(&text) {
        if text.contains("know") || text.contains("mean") || text.contains("seen") {
            return Route::CheckVocabulary { term };
        }
    }

    Route::Unrecognized
}

fn contains_any(text: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| text.contains(m))
}

fn argument_after(text: &str, markers: &[&str]) -> Option<String> {
    markers.iter().find_map(|marker| {
        let start = text.find(marker)? + marker.len();
        clean_argument(&text[start..])
    })
}

fn clean_argument(raw: &str) -> Option<String> {
    let mut arg = raw.trim();
    for prefix in TERM_PREFIXES {
        if let Some(rest) = arg.strip_prefix(prefix) {
            arg = rest;
            break;
        }
    }
    let arg = arg.trim_end_matches(|c: char| matches!(c, '?' | '.' | '!' | ',' | ' '));
    let arg = arg
        .strip_suffix(" yet")
        .unwrap_or(arg)
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | ' '));
    (!arg.is_empty()).then(|| arg.to_string())
}

fn quoted(text: &str) -> Option<String> {
    let start = text.find(['"', '\''])?;
    let quote = text[start..].chars().next()?;
    let rest = &text[start + quote.len_utf8()..];
    let end = rest.find(quote)?;
    clean_argument(&rest[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_vocabulary_checks_with_term() {
        assert_eq!(
            route("Do I know the word kulala?"),
            Route::CheckVocabulary {
                term: "kulala".to_string()
            }
        );
        assert_eq!(
            route("have I learned 'buenos dias' yet?"),
            Route::CheckVocabulary {
                term: "buenos dias".to_string()
            }
        );
        assert_eq!(
            route("what does \"hermano\" mean"),
            Route::CheckVocabulary {
                term: "hermano".to_string()
            }
        );
    }

    #[test]
    fn routes_aggregate_questions() {
        assert_eq!(route("What did we do last session?"), Route::LastSession);
        assert_eq!(route("What did we cover last time?"), Route::LastSession);
        assert_eq!(route("Which words am I struggling with"), Route::StrugglingAreas);
        assert_eq!(route("what should I review today"), Route::ReviewItems);
        assert_eq!(
            route("show me words about food."),
            Route::RelatedVocabulary {
                category: "food".to_string()
            }
        );
    }

    #[test]
    fn unmatched_questions_are_unrecognized() {
        assert_eq!(route("tell me a joke"), Route::Unrecognized);
        assert_eq!(route("   "), Route::Unrecognized);
        assert_eq!(route("do i know ?"), Route::Unrecognized);
    }
}
