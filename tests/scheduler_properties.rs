use std::collections::BTreeSet;

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

use lingo_backend::curriculum::sequencer::next_lesson;
use lingo_backend::curriculum::{Curriculum, Lesson};
use lingo_backend::memory::scheduler::fresh_memory;
use lingo_backend::memory::{
    apply_quality, classify, rank_due_items, ConceptKey, ConceptMemory, ConceptType, MasteryLevel,
    SchedulerPolicy,
};

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn memory_with(identifier: &str, reps: i64, interval: i64, ease: f64, failures: i64) -> ConceptMemory {
    let policy = SchedulerPolicy::default();
    let key = ConceptKey::new("u1", "es", ConceptType::Vocabulary, identifier);
    let mut memory = fresh_memory(&key, None, epoch(), &policy);
    memory.repetition_count = reps;
    memory.interval_days = interval;
    memory.ease_factor = ease;
    memory.consecutive_failures = failures;
    memory
}

fn curriculum_of(size: i64) -> Curriculum {
    Curriculum {
        language_code: "es".to_string(),
        title: "Test".to_string(),
        lessons: (1..=size)
            .map(|id| Lesson {
                id,
                title: format!("Lesson {id}"),
                teaching_prompt: String::new(),
                grammar_points: Vec::new(),
                vocabulary: Vec::new(),
            })
            .collect(),
    }
}

proptest! {
    #[test]
    fn failing_grade_resets_repetitions(
        reps in 0i64..20,
        interval in 0i64..2000,
        ease in 1.3f64..3.5,
        failures in 0i64..5,
        quality in 0u8..3,
    ) {
        let policy = SchedulerPolicy::default();
        let before = memory_with("gato", reps, interval, ease, failures);
        let after = apply_quality(&before, quality, epoch(), &policy);

        prop_assert_eq!(after.repetition_count, 0);
        prop_assert_eq!(after.interval_days, policy.failure_interval_days);
        prop_assert_eq!(after.consecutive_failures, failures + 1);
        prop_assert!(after.ease_factor >= policy.min_ease);
        prop_assert!(after.ease_factor <= before.ease_factor);
    }

    #[test]
    fn ease_and_interval_stay_in_bounds(grades in prop::collection::vec(0u8..=5, 1..60)) {
        let policy = SchedulerPolicy::default();
        let mut memory = memory_with("perro", 0, 0, policy.initial_ease, 0);
        let mut now = epoch();

        for q in grades {
            let next = apply_quality(&memory, q, now, &policy);
            prop_assert!(next.ease_factor >= policy.min_ease);
            prop_assert!(next.interval_days >= 1);
            prop_assert!(next.interval_days <= policy.max_interval_days);
            prop_assert_eq!(next.due_at, now + Duration::days(next.interval_days));
            if q >= policy.passing_quality {
                prop_assert_eq!(next.repetition_count, memory.repetition_count + 1);
                prop_assert_eq!(next.consecutive_failures, 0);
            }
            now = next.due_at;
            memory = next;
        }
    }

    #[test]
    fn same_history_gives_same_state(grades in prop::collection::vec(0u8..=5, 0..30)) {
        let policy = SchedulerPolicy::default();
        let start = memory_with("casa", 0, 0, policy.initial_ease, 0);

        let run = |start: &ConceptMemory| {
            grades.iter().enumerate().fold(start.clone(), |m, (i, q)| {
                apply_quality(&m, *q, epoch() + Duration::hours(i as i64), &policy)
            })
        };

        prop_assert_eq!(run(&start), run(&start));
    }

    #[test]
    fn repeated_failures_always_classify_as_struggling(
        reps in 0i64..50,
        interval in 0i64..500,
        failures in 2i64..10,
    ) {
        let policy = SchedulerPolicy::default();
        let memory = memory_with("libro", reps, interval, 2.5, failures);
        prop_assert_eq!(classify(&memory, &policy), MasteryLevel::Struggling);
    }

    #[test]
    fn ranked_review_items_are_all_due(
        offsets in prop::collection::vec((-30i64..30, 0i64..3), 0..40),
    ) {
        let policy = SchedulerPolicy::default();
        let now = epoch() + Duration::days(60);
        let items: Vec<ConceptMemory> = offsets
            .iter()
            .enumerate()
            .map(|(i, (offset, failures))| {
                let mut m = memory_with(&format!("w{i}"), 1, 1, 2.5, *failures);
                m.due_at = now + Duration::days(*offset);
                m
            })
            .collect();
        let expected_due = items.iter().filter(|m| m.due_at <= now).count();

        let ranked = rank_due_items(items, now, &policy);
        prop_assert_eq!(ranked.len(), expected_due);
        prop_assert!(ranked.iter().all(|m| m.due_at <= now));

        let first_calm = ranked
            .iter()
            .position(|m| classify(m, &policy) != MasteryLevel::Struggling)
            .unwrap_or(ranked.len());
        prop_assert!(ranked[first_calm..]
            .iter()
            .all(|m| classify(m, &policy) != MasteryLevel::Struggling));
        prop_assert!(ranked[first_calm..].windows(2).all(|w| w[0].due_at <= w[1].due_at));
    }

    #[test]
    fn next_lesson_skips_completed(
        size in 1i64..12,
        completed in prop::collection::btree_set(1i64..12, 0..12),
    ) {
        let curriculum = curriculum_of(size);
        let completed: BTreeSet<i64> = completed;
        let all_done = (1..=size).all(|id| completed.contains(&id));

        match next_lesson(&curriculum, &completed) {
            Some(lesson) => {
                prop_assert!(!completed.contains(&lesson.id));
                prop_assert!((1..lesson.id).all(|id| completed.contains(&id)));
            }
            None => prop_assert!(all_done),
        }
    }
}
