mod common;

use chrono::Duration;
use serde_json::json;

use lingo_backend::db::operations::{concepts, events, store_now};
use lingo_backend::memory::{ConceptKey, ConceptType, MasteryLevel, SchedulerPolicy};
use lingo_backend::services::concept_events::{record_event_at, EventError, RecordEventInput};
use lingo_backend::services::concept_memory::{rebuild_from_events, replay_concept};
use lingo_backend::services::lesson_planner::{plan_next_lesson, FreeFormReason, LessonPlan, PlanInput};
use lingo_backend::services::lesson_sessions::{
    create_session, end_session, last_session_summary, update_session, CreateSessionInput,
    SessionError, UpdateSessionInput,
};
use lingo_backend::services::progress::{
    get_progress, upsert_progress, ProgressError, ProgressView, UpsertProgressInput,
};
use lingo_backend::services::realtime_query::{run_query, QueryRequest, QueryResult};

fn event(user: &str, lang: &str, event_type: &str, concept_type: &str, identifier: &str) -> RecordEventInput {
    RecordEventInput {
        user_id: Some(user.to_string()),
        language_code: Some(lang.to_string()),
        event_type: Some(event_type.to_string()),
        concept_type: Some(concept_type.to_string()),
        concept_identifier: Some(identifier.to_string()),
        ..Default::default()
    }
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[tokio::test]
async fn kulala_progresses_from_exposure_through_two_reviews() {
    let (_dir, proxy) = common::test_proxy().await;
    let policy = SchedulerPolicy::default();
    let t0 = store_now();

    let seen = record_event_at(&proxy, &policy, event("u1", "sw", "exposure", "vocabulary", "kulala"), t0)
        .await
        .unwrap();
    assert_eq!(seen.quality_score, None);
    let memory = seen.memory.unwrap();
    assert_eq!(memory.repetition_count, 0);
    assert_eq!(memory.interval_days, 0);
    assert_eq!(memory.due_at, t0);
    assert_eq!(seen.mastery, Some(MasteryLevel::New));

    let day1 = t0 + Duration::days(1);
    let first = record_event_at(&proxy, &policy, event("u1", "sw", "recall_success", "vocabulary", "Kulala"), day1)
        .await
        .unwrap();
    assert_eq!(first.quality_score, Some(4));
    let memory = first.memory.unwrap();
    assert_eq!(memory.repetition_count, 1);
    assert_eq!(memory.interval_days, 1);
    assert_eq!(memory.due_at, day1 + Duration::days(1));
    assert!(approx(memory.ease_factor, 2.5));

    let day2 = day1 + Duration::days(1);
    let mut fast = event("u1", "sw", "recall_success", "vocabulary", "kulala");
    fast.context = Some(json!({ "fast": true }));
    let second = record_event_at(&proxy, &policy, fast, day2).await.unwrap();
    assert_eq!(second.quality_score, Some(5));
    let memory = second.memory.unwrap();
    assert_eq!(memory.repetition_count, 2);
    assert_eq!(memory.interval_days, 6);
    assert!(memory.ease_factor > 2.55);
    assert_eq!(memory.version, 3);
    assert_eq!(second.mastery, Some(MasteryLevel::Learning));
}

#[tokio::test]
async fn repeated_exposure_leaves_schedule_untouched() {
    let (_dir, proxy) = common::test_proxy().await;
    let policy = SchedulerPolicy::default();
    let t0 = store_now();

    record_event_at(&proxy, &policy, event("u1", "es", "exposure", "vocabulary", "hola"), t0)
        .await
        .unwrap();
    let again = record_event_at(
        &proxy,
        &policy,
        event("u1", "es", "exposure", "vocabulary", "hola"),
        t0 + Duration::hours(2),
    )
    .await
    .unwrap();

    let memory = again.memory.unwrap();
    assert_eq!(memory.version, 1);
    assert_eq!(memory.due_at, t0);
}

#[tokio::test]
async fn two_failures_mark_a_grammar_point_struggling() {
    let (_dir, proxy) = common::test_proxy().await;
    let policy = SchedulerPolicy::default();
    let curricula = common::curricula();
    let now = store_now();

    for offset in 0..2 {
        record_event_at(
            &proxy,
            &policy,
            event("u1", "es", "recall_failure", "grammar", "ser-present"),
            now + Duration::minutes(offset),
        )
        .await
        .unwrap();
    }
    record_event_at(&proxy, &policy, event("u1", "es", "recall_success", "vocabulary", "hola"), now)
        .await
        .unwrap();

    let response = run_query(
        &proxy,
        &curricula,
        &policy,
        QueryRequest {
            user_id: Some("u1".into()),
            language_code: Some("es".into()),
            query_type: Some("get_struggling_areas".into()),
            params: None,
        },
        now + Duration::minutes(5),
    )
    .await
    .unwrap();

    match response.result {
        QueryResult::StrugglingAreas { vocabulary, grammar } => {
            assert!(vocabulary.is_empty());
            assert_eq!(grammar.len(), 1);
            assert_eq!(grammar[0].concept_identifier, "ser-present");
            assert_eq!(grammar[0].mastery, MasteryLevel::Struggling);
            assert_eq!(grammar[0].repetition_count, 0);
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn review_items_only_include_due_concepts() {
    let (_dir, proxy) = common::test_proxy().await;
    let policy = SchedulerPolicy::default();
    let curricula = common::curricula();
    let now = store_now();

    record_event_at(&proxy, &policy, event("u1", "es", "recall_success", "vocabulary", "gracias"), now)
        .await
        .unwrap();
    record_event_at(&proxy, &policy, event("u1", "es", "exposure", "vocabulary", "hola"), now)
        .await
        .unwrap();

    let response = run_query(
        &proxy,
        &curricula,
        &policy,
        QueryRequest {
            user_id: Some("u1".into()),
            language_code: Some("es".into()),
            query_type: Some("get_review_items".into()),
            params: None,
        },
        now + Duration::minutes(1),
    )
    .await
    .unwrap();

    match response.result {
        QueryResult::ReviewItems {
            vocabulary,
            grammar,
            vocabulary_due,
            grammar_due,
        } => {
            let ids: Vec<_> = vocabulary.iter().map(|c| c.concept_identifier.as_str()).collect();
            assert_eq!(ids, vec!["hola"]);
            assert_eq!(vocabulary_due, 1);
            assert!(grammar.is_empty());
            assert_eq!(grammar_due, 0);
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn closed_session_summary_lists_touched_concepts() {
    let (_dir, proxy) = common::test_proxy().await;
    let policy = SchedulerPolicy::default();

    let session = create_session(
        &proxy,
        CreateSessionInput {
            user_id: Some("u1".into()),
            language_code: Some("ES".into()),
            lesson_id: Some(1),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(session.language_code, "es");

    let now = store_now();
    for (concept_type, identifier) in [("vocabulary", "hola"), ("grammar", "ser-present"), ("vocabulary", "hola")] {
        let mut input = event("u1", "es", "recall_success", concept_type, identifier);
        input.session_id = Some(session.id.clone());
        record_event_at(&proxy, &policy, input, now).await.unwrap();
    }

    let outcome = end_session(&proxy, &session.id, Some(420)).await.unwrap();
    assert!(!outcome.already_closed);
    assert_eq!(outcome.session.duration_seconds, Some(420));

    let summary = last_session_summary(&proxy, "u1", "es").await.unwrap().unwrap();
    assert_eq!(summary.session_id, session.id);
    assert_eq!(summary.duration_seconds, Some(420));
    assert_eq!(summary.event_count, 3);
    let touched: Vec<_> = summary
        .concepts_touched
        .iter()
        .map(|c| c.concept_identifier.as_str())
        .collect();
    assert_eq!(touched, vec!["hola", "ser-present"]);
}

#[tokio::test]
async fn ending_twice_is_a_no_op_and_closed_sessions_reject_edits() {
    let (_dir, proxy) = common::test_proxy().await;

    let session = create_session(
        &proxy,
        CreateSessionInput {
            user_id: Some("u1".into()),
            language_code: Some("sw".into()),
            topic: Some("market".into()),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    end_session(&proxy, &session.id, Some(300)).await.unwrap();
    let again = end_session(&proxy, &session.id, Some(999)).await.unwrap();
    assert!(again.already_closed);
    assert_eq!(again.session.duration_seconds, Some(300));

    let err = update_session(
        &proxy,
        &session.id,
        UpdateSessionInput {
            topic: Some("travel".into()),
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, SessionError::Closed(_)));

    let progress = get_progress(&proxy, Some("u1"), Some("sw")).await.unwrap();
    match progress {
        ProgressView::Single(p) => {
            assert_eq!(p.total_sessions, 1);
            assert_eq!(p.total_practice_seconds, 300);
            assert!(p.completed_lesson_ids.is_empty());
        }
        ProgressView::All(_) => panic!("expected a single language"),
    }
}

#[tokio::test]
async fn progress_upsert_replaces_completed_lessons() {
    let (_dir, proxy) = common::test_proxy().await;

    let stored = upsert_progress(
        &proxy,
        "ES",
        UpsertProgressInput {
            user_id: Some("u1".into()),
            proficiency_level: Some("A2".into()),
            current_lesson_id: Some(3),
            completed_lesson_ids: Some(vec![2, 1, 2]),
        },
    )
    .await
    .unwrap();
    assert_eq!(stored.language_code, "es");
    assert_eq!(stored.completed_lesson_ids, vec![1, 2]);
    assert_eq!(stored.proficiency_level.as_deref(), Some("A2"));

    let kept = upsert_progress(
        &proxy,
        "es",
        UpsertProgressInput {
            user_id: Some("u1".into()),
            current_lesson_id: Some(2),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(kept.completed_lesson_ids, vec![1, 2]);
    assert_eq!(kept.current_lesson_id, Some(2));
    assert_eq!(kept.proficiency_level.as_deref(), Some("A2"));

    let err = upsert_progress(
        &proxy,
        "es",
        UpsertProgressInput {
            user_id: Some("u1".into()),
            completed_lesson_ids: Some(vec![0]),
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ProgressError::Validation(_)));
}

#[tokio::test]
async fn events_after_close_are_flagged_late_but_still_scheduled() {
    let (_dir, proxy) = common::test_proxy().await;
    let policy = SchedulerPolicy::default();

    let session = create_session(
        &proxy,
        CreateSessionInput {
            user_id: Some("u1".into()),
            language_code: Some("es".into()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    end_session(&proxy, &session.id, Some(60)).await.unwrap();

    let mut input = event("u1", "es", "production", "vocabulary", "adios");
    input.session_id = Some(session.id.clone());
    let recorded = record_event_at(&proxy, &policy, input, store_now()).await.unwrap();

    assert!(recorded.event.late_for_session);
    assert_eq!(recorded.quality_score, Some(5));
    assert_eq!(recorded.memory.unwrap().repetition_count, 1);
}

#[tokio::test]
async fn unknown_or_foreign_sessions_are_rejected() {
    let (_dir, proxy) = common::test_proxy().await;
    let policy = SchedulerPolicy::default();

    let session = create_session(
        &proxy,
        CreateSessionInput {
            user_id: Some("owner".into()),
            language_code: Some("es".into()),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let mut foreign = event("intruder", "es", "exposure", "vocabulary", "hola");
    foreign.session_id = Some(session.id.clone());
    let err = record_event_at(&proxy, &policy, foreign, store_now()).await.unwrap_err();
    assert!(matches!(err, EventError::SessionNotFound(_)));

    let mut missing = event("owner", "es", "exposure", "vocabulary", "hola");
    missing.session_id = Some("no-such-session".into());
    let err = record_event_at(&proxy, &policy, missing, store_now()).await.unwrap_err();
    assert!(matches!(err, EventError::SessionNotFound(_)));

    let key = ConceptKey::new("owner", "es", ConceptType::Vocabulary, "hola");
    assert!(concepts::find(&proxy, &key).await.unwrap().is_none());
}

#[tokio::test]
async fn events_must_match_the_session_language() {
    let (_dir, proxy) = common::test_proxy().await;
    let policy = SchedulerPolicy::default();

    let session = create_session(
        &proxy,
        CreateSessionInput {
            user_id: Some("u1".into()),
            language_code: Some("sw".into()),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let mut spanish = event("u1", "es", "recall_success", "vocabulary", "hola");
    spanish.session_id = Some(session.id.clone());
    let err = record_event_at(&proxy, &policy, spanish, store_now()).await.unwrap_err();
    assert!(matches!(err, EventError::SessionLanguageMismatch { .. }));
    assert_eq!(events::count_for_session(&proxy, &session.id).await.unwrap(), 0);

    let mut swahili = event("u1", "SW", "recall_success", "vocabulary", "jambo");
    swahili.session_id = Some(session.id.clone());
    record_event_at(&proxy, &policy, swahili, store_now()).await.unwrap();
    assert_eq!(events::count_for_session(&proxy, &session.id).await.unwrap(), 1);
}

#[tokio::test]
async fn duplicate_client_event_id_is_applied_once() {
    let (_dir, proxy) = common::test_proxy().await;
    let policy = SchedulerPolicy::default();
    let now = store_now();

    let mut input = event("u1", "es", "recall_success", "vocabulary", "gato");
    input.client_event_id = Some("evt-42".into());

    let first = record_event_at(&proxy, &policy, input.clone(), now).await.unwrap();
    let second = record_event_at(&proxy, &policy, input, now + Duration::seconds(3))
        .await
        .unwrap();

    assert!(!first.duplicate);
    assert!(second.duplicate);
    assert_eq!(first.event.id, second.event.id);
    assert_eq!(second.memory.unwrap().repetition_count, 1);

    let key = ConceptKey::new("u1", "es", ConceptType::Vocabulary, "gato");
    assert_eq!(events::list_for_concept(&proxy, &key).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reviews_of_one_concept_are_all_applied() {
    let (_dir, proxy) = common::test_proxy_with(|config| config.cas_max_retries = 64).await;
    let policy = SchedulerPolicy::default();
    let now = store_now();

    record_event_at(&proxy, &policy, event("u1", "sw", "exposure", "vocabulary", "kula"), now)
        .await
        .unwrap();

    let writers = 8;
    let mut handles = Vec::new();
    for _ in 0..writers {
        let proxy = proxy.clone();
        let policy = policy.clone();
        handles.push(tokio::spawn(async move {
            record_event_at(
                &proxy,
                &policy,
                event("u1", "sw", "recall_success", "vocabulary", "kula"),
                now,
            )
            .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let key = ConceptKey::new("u1", "sw", ConceptType::Vocabulary, "kula");
    let memory = concepts::find(&proxy, &key).await.unwrap().unwrap();
    assert_eq!(memory.repetition_count, writers);
    assert!(memory.version <= writers + 1);
    let history = events::list_for_concept(&proxy, &key).await.unwrap();
    assert_eq!(history.len() as i64, writers + 1);
    assert_eq!(memory.last_event_seq, history.last().unwrap().seq);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_mixed_grades_follow_log_order() {
    let (_dir, proxy) = common::test_proxy_with(|config| config.cas_max_retries = 64).await;
    let policy = SchedulerPolicy::default();
    let now = store_now();

    for n in 0..40 {
        let identifier = format!("neno-{n}");
        record_event_at(
            &proxy,
            &policy,
            event("u1", "sw", "recall_success", "vocabulary", &identifier),
            now,
        )
        .await
        .unwrap();

        let mut handles = Vec::new();
        for event_type in ["recall_failure", "production", "recall_failure", "recall_success"] {
            let proxy = proxy.clone();
            let policy = policy.clone();
            let input = event("u1", "sw", event_type, "vocabulary", &identifier);
            handles.push(tokio::spawn(async move {
                record_event_at(&proxy, &policy, input, now).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let key = ConceptKey::new("u1", "sw", ConceptType::Vocabulary, &identifier);
        let live = concepts::find(&proxy, &key).await.unwrap().unwrap();
        let history = events::list_for_concept(&proxy, &key).await.unwrap();
        let rebuilt = rebuild_from_events(&key, &history, &policy).unwrap();

        assert_eq!(history.len(), 5);
        assert_eq!(live.repetition_count, rebuilt.repetition_count, "{identifier}");
        assert_eq!(live.consecutive_failures, rebuilt.consecutive_failures, "{identifier}");
        assert_eq!(live.interval_days, rebuilt.interval_days, "{identifier}");
        assert_eq!(live.due_at, rebuilt.due_at, "{identifier}");
        assert_eq!(live.last_quality, rebuilt.last_quality, "{identifier}");
        assert_eq!(live.last_event_seq, rebuilt.last_event_seq, "{identifier}");
        assert!((live.ease_factor - rebuilt.ease_factor).abs() < 1e-9, "{identifier}");
    }
}

#[tokio::test]
async fn next_event_picks_up_an_unapplied_one() {
    let (_dir, proxy) = common::test_proxy().await;
    let policy = SchedulerPolicy::default();
    let t0 = store_now();

    let first = record_event_at(&proxy, &policy, event("u1", "es", "production", "vocabulary", "mesa"), t0)
        .await
        .unwrap();

    // Logged but never folded into the stored state.
    let mut stranded = first.event.clone();
    stranded.seq = 0;
    stranded.id = "stranded-failure".to_string();
    stranded.event_type = "recall_failure".to_string().into();
    stranded.quality_score = Some(1);
    stranded.client_event_id = None;
    stranded.created_at = t0 + Duration::days(1);
    events::insert(&proxy, &stranded).await.unwrap();

    let key = ConceptKey::new("u1", "es", ConceptType::Vocabulary, "mesa");
    assert_eq!(concepts::find(&proxy, &key).await.unwrap().unwrap().repetition_count, 1);

    let next = record_event_at(
        &proxy,
        &policy,
        event("u1", "es", "recall_failure", "vocabulary", "mesa"),
        t0 + Duration::days(2),
    )
    .await
    .unwrap();

    let memory = next.memory.unwrap();
    assert_eq!(memory.consecutive_failures, 2);
    assert_eq!(next.mastery, Some(MasteryLevel::Struggling));
    let history = events::list_for_concept(&proxy, &key).await.unwrap();
    assert_eq!(memory.last_event_seq, history.last().unwrap().seq);
}

#[tokio::test]
async fn replay_restores_state_from_the_event_log() {
    let (_dir, proxy) = common::test_proxy().await;
    let policy = SchedulerPolicy::default();
    let t0 = store_now();

    let steps = [
        ("exposure", 0),
        ("recall_success", 1),
        ("recall_failure", 2),
        ("self_correction", 3),
    ];
    let mut live = None;
    for (event_type, day) in steps {
        let recorded = record_event_at(
            &proxy,
            &policy,
            event("u1", "es", event_type, "vocabulary", "perro"),
            t0 + Duration::days(day),
        )
        .await
        .unwrap();
        live = recorded.memory;
    }
    let live = live.unwrap();

    sqlx::query(r#"UPDATE "concept_memories" SET "repetitionCount" = 99, "easeFactor" = 9.0"#)
        .execute(proxy.pool())
        .await
        .unwrap();

    let key = ConceptKey::new("u1", "es", ConceptType::Vocabulary, "perro");
    let outcome = replay_concept(&proxy, &key, t0 + Duration::days(10), &policy)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome.events_applied, 4);
    assert_eq!(outcome.previous.unwrap().repetition_count, 99);
    assert_eq!(outcome.memory.repetition_count, live.repetition_count);
    assert_eq!(outcome.memory.interval_days, live.interval_days);
    assert_eq!(outcome.memory.due_at, live.due_at);
    assert!(approx(outcome.memory.ease_factor, live.ease_factor));
    assert_eq!(outcome.memory.consecutive_failures, live.consecutive_failures);

    let missing = ConceptKey::new("u1", "es", ConceptType::Vocabulary, "never-seen");
    assert!(replay_concept(&proxy, &missing, t0, &policy).await.unwrap().is_none());
}

#[tokio::test]
async fn planner_walks_the_curriculum_and_falls_back_to_free_form() {
    let (_dir, proxy) = common::test_proxy().await;
    let policy = SchedulerPolicy::default();
    let curricula = common::curricula();

    let plan_for = |lesson_id: Option<i64>, completed: Option<&str>| PlanInput {
        user_id: Some("u1".into()),
        lesson_id,
        completed_lesson_ids: completed.map(str::to_string),
    };

    let plan = plan_next_lesson(&proxy, &curricula, &policy, "es", plan_for(None, None))
        .await
        .unwrap();
    match plan {
        LessonPlan::Curriculum { context, completed_lesson_ids } => {
            assert_eq!(context.lesson.id, 1);
            assert!(completed_lesson_ids.is_empty());
            assert!(context.prompt.contains(&context.lesson.title));
        }
        other => panic!("unexpected plan: {other:?}"),
    }

    let session = create_session(
        &proxy,
        CreateSessionInput {
            user_id: Some("u1".into()),
            language_code: Some("es".into()),
            lesson_id: Some(1),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    end_session(&proxy, &session.id, Some(600)).await.unwrap();

    let plan = plan_next_lesson(&proxy, &curricula, &policy, "es", plan_for(None, None))
        .await
        .unwrap();
    match plan {
        LessonPlan::Curriculum { context, completed_lesson_ids } => {
            assert_eq!(context.lesson.id, 2);
            assert_eq!(completed_lesson_ids, vec![1]);
        }
        other => panic!("unexpected plan: {other:?}"),
    }

    let complete = plan_next_lesson(&proxy, &curricula, &policy, "es", plan_for(None, Some("1,2,3")))
        .await
        .unwrap();
    assert!(matches!(
        complete,
        LessonPlan::FreeForm { reason: FreeFormReason::CurriculumComplete, .. }
    ));

    let missing = plan_next_lesson(&proxy, &curricula, &policy, "es", plan_for(Some(99), None))
        .await
        .unwrap();
    assert!(matches!(
        missing,
        LessonPlan::FreeForm { reason: FreeFormReason::LessonNotFound, requested_lesson_id: Some(99), .. }
    ));

    let none = plan_next_lesson(&proxy, &curricula, &policy, "xx", plan_for(None, None))
        .await
        .unwrap();
    assert!(matches!(
        none,
        LessonPlan::FreeForm { reason: FreeFormReason::NoCurriculum, .. }
    ));
}

#[tokio::test]
async fn planner_context_lists_known_grammar() {
    let (_dir, proxy) = common::test_proxy().await;
    let policy = SchedulerPolicy::default();
    let curricula = common::curricula();
    let now = store_now();

    record_event_at(&proxy, &policy, event("u1", "es", "recall_success", "grammar", "ser-present"), now)
        .await
        .unwrap();

    let plan = plan_next_lesson(
        &proxy,
        &curricula,
        &policy,
        "es",
        PlanInput {
            user_id: Some("u1".into()),
            lesson_id: None,
            completed_lesson_ids: Some("1".into()),
        },
    )
    .await
    .unwrap();

    match plan {
        LessonPlan::Curriculum { context, .. } => {
            assert_eq!(context.lesson.id, 2);
            assert_eq!(context.known_grammar_total, 1);
            assert_eq!(context.known_grammar.len(), 1);
        }
        other => panic!("unexpected plan: {other:?}"),
    }
}
