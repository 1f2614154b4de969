use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{Curriculum, GrammarPoint, Lesson};
use crate::memory::model::normalize_identifier;
use crate::memory::scheduler::classify;
use crate::memory::{ConceptMemory, ConceptType, MasteryLevel, SchedulerPolicy};

/// Lowest-id lesson not yet completed, or `None` once every lesson is done.
pub fn next_lesson<'a>(curriculum: &'a Curriculum, completed: &BTreeSet<i64>) -> Option<&'a Lesson> {
    curriculum
        .lessons
        .iter()
        .filter(|lesson| !completed.contains(&lesson.id))
        .min_by_key(|lesson| lesson.id)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LessonSelection<'a> {
    Lesson(&'a Lesson),
    NoCurriculum,
    LessonNotFound(i64),
    CurriculumComplete,
}

/// An explicit `lesson_override` bypasses sequencing but must exist.
pub fn select_lesson<'a>(
    curriculum: Option<&'a Curriculum>,
    completed: &BTreeSet<i64>,
    lesson_override: Option<i64>,
) -> LessonSelection<'a> {
    let Some(curriculum) = curriculum else {
        return LessonSelection::NoCurriculum;
    };

    match lesson_override {
        Some(lesson_id) => curriculum
            .lesson(lesson_id)
            .map(LessonSelection::Lesson)
            .unwrap_or(LessonSelection::LessonNotFound(lesson_id)),
        None => next_lesson(curriculum, completed)
            .map(LessonSelection::Lesson)
            .unwrap_or(LessonSelection::CurriculumComplete),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnownGrammar {
    pub id: String,
    pub name: String,
    pub description: String,
    pub mastery: MasteryLevel,
    pub due_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteredContent {
    /// Most recently reviewed first, capped for prompt size.
    pub grammar: Vec<KnownGrammar>,
    pub grammar_total: usize,
    pub vocabulary_count: usize,
}

/// Content introduced by completed lessons that the learner has actually
/// reviewed to at least `learning`.
pub fn mastered_content(
    curriculum: &Curriculum,
    completed: &BTreeSet<i64>,
    memories: &[ConceptMemory],
    policy: &SchedulerPolicy,
) -> MasteredContent {
    let completed_lessons: Vec<&Lesson> = curriculum
        .lessons
        .iter()
        .filter(|lesson| completed.contains(&lesson.id))
        .collect();

    let known: HashMap<(ConceptType, &str), &ConceptMemory> = memories
        .iter()
        .filter(|m| classify(m, policy).is_at_least_learning())
        .map(|m| ((m.key.concept_type, m.key.concept_identifier.as_str()), m))
        .collect();

    let mut seen_grammar = HashSet::new();
    let mut grammar: Vec<KnownGrammar> = completed_lessons
        .iter()
        .flat_map(|lesson| lesson.grammar_points.iter())
        .filter(|point| seen_grammar.insert(point.id.clone()))
        .filter_map(|point| {
            known_grammar_memory(point, &known).map(|memory| KnownGrammar {
                id: point.id.clone(),
                name: point.name.clone(),
                description: point.description.clone(),
                mastery: classify(memory, policy),
                due_at: memory.due_at,
            })
        })
        .collect();

    grammar.sort_by(|a, b| b.due_at.cmp(&a.due_at).then_with(|| a.id.cmp(&b.id)));
    let grammar_total = grammar.len();
    grammar.truncate(policy.context_grammar_cap);

    let introduced_terms: HashSet<String> = completed_lessons
        .iter()
        .flat_map(|lesson| lesson.vocabulary.iter())
        .map(|item| normalize_identifier(&item.term))
        .collect();
    let vocabulary_count = introduced_terms
        .iter()
        .filter(|term| known.contains_key(&(ConceptType::Vocabulary, term.as_str())))
        .count();

    MasteredContent {
        grammar,
        grammar_total,
        vocabulary_count,
    }
}

fn known_grammar_memory<'m>(
    point: &GrammarPoint,
    known: &HashMap<(ConceptType, &str), &'m ConceptMemory>,
) -> Option<&'m ConceptMemory> {
    [normalize_identifier(&point.id), normalize_identifier(&point.name)]
        .iter()
        .find_map(|identifier| known.get(&(ConceptType::Grammar, identifier.as_str())).copied())
}

/// Everything a lesson generator needs for the chosen lesson.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonContext {
    pub language_code: String,
    pub curriculum_title: String,
    pub lesson: Lesson,
    pub known_grammar: Vec<KnownGrammar>,
    pub known_grammar_total: usize,
    pub known_vocabulary_count: usize,
    pub prompt: String,
}

impl LessonContext {
    pub fn build(curriculum: &Curriculum, lesson: &Lesson, content: MasteredContent) -> Self {
        let prompt = render_prompt(curriculum, lesson, &content);
        Self {
            language_code: curriculum.language_code.clone(),
            curriculum_title: curriculum.title.clone(),
            lesson: lesson.clone(),
            known_grammar: content.grammar,
            known_grammar_total: content.grammar_total,
            known_vocabulary_count: content.vocabulary_count,
            prompt,
        }
    }
}

fn render_prompt(curriculum: &Curriculum, lesson: &Lesson, content: &MasteredContent) -> String {
    let mut prompt = format!(
        "Lesson {} of {}: {}\n{}\n",
        lesson.id, curriculum.title, lesson.title, lesson.teaching_prompt
    );

    if !lesson.grammar_points.is_empty() {
        prompt.push_str("\nNew grammar:\n");
        for point in &lesson.grammar_points {
            prompt.push_str(&format!("- {}: {}\n", point.name, point.description));
        }
    }

    if !lesson.vocabulary.is_empty() {
        let terms: Vec<String> = lesson
            .vocabulary
            .iter()
            .map(|item| format!("{} ({})", item.term, item.translation))
            .collect();
        prompt.push_str(&format!("\nNew vocabulary: {}\n", terms.join(", ")));
    }

    if !content.grammar.is_empty() {
        let names: Vec<&str> = content.grammar.iter().map(|g| g.name.as_str()).collect();
        prompt.push_str(&format!("\nThe learner already knows: {}", names.join(", ")));
        if content.grammar_total > content.grammar.len() {
            prompt.push_str(&format!(
                " (and {} more grammar points)",
                content.grammar_total - content.grammar.len()
            ));
        }
        prompt.push('\n');
    }

    if content.vocabulary_count > 0 {
        prompt.push_str(&format!(
            "Known vocabulary from earlier lessons: {} words\n",
            content.vocabulary_count
        ));
    }

    prompt
}
