//! Static, language-scoped lesson plans.
//!
//! Curricula are loaded once at startup, either from the copies embedded in the
//! binary or from a `CURRICULUM_DIR` of `<language>.json` files, and shared
//! read-only for the life of the process.

pub mod sequencer;

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::model::normalize_identifier;

const BUILTIN_CURRICULA: &[(&str, &str)] = &[
    ("es.json", include_str!("../../curricula/es.json")),
    ("sw.json", include_str!("../../curricula/sw.json")),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Curriculum {
    pub language_code: String,
    pub title: String,
    pub lessons: Vec<Lesson>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: i64,
    pub title: String,
    pub teaching_prompt: String,
    #[serde(default)]
    pub grammar_points: Vec<GrammarPoint>,
    #[serde(default)]
    pub vocabulary: Vec<VocabularyItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrammarPoint {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VocabularyItem {
    pub term: String,
    pub translation: String,
    #[serde(default)]
    pub part_of_speech: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl VocabularyItem {
    pub fn has_tag(&self, tag: &str) -> bool {
        let wanted = normalize_identifier(tag);
        self.tags.iter().any(|t| normalize_identifier(t) == wanted)
    }
}

impl Curriculum {
    pub fn lesson(&self, lesson_id: i64) -> Option<&Lesson> {
        self.lessons.iter().find(|l| l.id == lesson_id)
    }

    pub fn lesson_ids(&self) -> BTreeSet<i64> {
        self.lessons.iter().map(|l| l.id).collect()
    }

    /// Lessons sorted by id, duplicate ids rejected.
    fn validate(mut self, source: &str) -> Result<Self, CurriculumError> {
        self.language_code = self.language_code.trim().to_ascii_lowercase();
        if self.language_code.is_empty() {
            return Err(CurriculumError::Invalid {
                source_name: source.to_string(),
                reason: "languageCode is empty".to_string(),
            });
        }
        self.lessons.sort_by_key(|l| l.id);
        if let Some(pair) = self.lessons.windows(2).find(|w| w[0].id == w[1].id) {
            return Err(CurriculumError::Invalid {
                source_name: source.to_string(),
                reason: format!("duplicate lesson id {}", pair[0].id),
            });
        }
        Ok(self)
    }
}

#[derive(Debug, Error)]
pub enum CurriculumError {
    #[error("failed to read curriculum {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse curriculum {source_name}: {source}")]
    Parse {
        source_name: String,
        source: serde_json::Error,
    },
    #[error("invalid curriculum {source_name}: {reason}")]
    Invalid { source_name: String, reason: String },
}

/// All known curricula, keyed by language code.
#[derive(Debug, Clone, Default)]
pub struct CurriculumRegistry {
    by_language: HashMap<String, Curriculum>,
}

impl CurriculumRegistry {
    pub fn builtin() -> Result<Self, CurriculumError> {
        let mut registry = Self::default();
        for (name, raw) in BUILTIN_CURRICULA {
            registry.insert(parse_curriculum(name, raw)?);
        }
        Ok(registry)
    }

    pub fn from_dir(dir: &Path) -> Result<Self, CurriculumError> {
        let entries = std::fs::read_dir(dir).map_err(|source| CurriculumError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut registry = Self::default();
        for entry in entries {
            let path = entry
                .map_err(|source| CurriculumError::Io {
                    path: dir.to_path_buf(),
                    source,
                })?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = std::fs::read_to_string(&path).map_err(|source| CurriculumError::Io {
                path: path.clone(),
                source,
            })?;
            let curriculum = parse_curriculum(&path.display().to_string(), &raw)?;
            tracing::info!(
                language = %curriculum.language_code,
                lessons = curriculum.lessons.len(),
                path = %path.display(),
                "curriculum loaded"
            );
            registry.insert(curriculum);
        }
        Ok(registry)
    }

    pub fn insert(&mut self, curriculum: Curriculum) {
        self.by_language
            .insert(curriculum.language_code.clone(), curriculum);
    }

    pub fn get(&self, language_code: &str) -> Option<&Curriculum> {
        self.by_language
            .get(language_code.trim().to_ascii_lowercase().as_str())
    }

    pub fn languages(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = self.by_language.keys().map(String::as_str).collect();
        codes.sort_unstable();
        codes
    }
}

fn parse_curriculum(source: &str, raw: &str) -> Result<Curriculum, CurriculumError> {
    let curriculum: Curriculum =
        serde_json::from_str(raw).map_err(|source_err| CurriculumError::Parse {
            source_name: source.to_string(),
            source: source_err,
        })?;
    curriculum.validate(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_curricula_load_sorted() {
        let registry = CurriculumRegistry::builtin().unwrap();
        assert_eq!(registry.languages(), vec!["es", "sw"]);
        let es = registry.get("ES").unwrap();
        assert_eq!(es.lesson_ids().into_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn duplicate_lesson_ids_are_rejected() {
        let raw = r#"{"languageCode":"xx","title":"t","lessons":[
            {"id":1,"title":"a","teachingPrompt":"p"},
            {"id":1,"title":"b","teachingPrompt":"p"}]}"#;
        assert!(matches!(
            parse_curriculum("inline", raw),
            Err(CurriculumError::Invalid { .. })
        ));
    }

    #[test]
    fn from_dir_reads_json_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("it.json"),
            r#"{"languageCode":"it","title":"Italiano","lessons":[{"id":2,"title":"b","teachingPrompt":"p"},{"id":1,"title":"a","teachingPrompt":"p"}]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let registry = CurriculumRegistry::from_dir(dir.path()).unwrap();
        assert_eq!(registry.languages(), vec!["it"]);
        assert_eq!(registry.get("it").unwrap().lessons[0].id, 1);
    }
}
