//! End-to-end tests of the foreground path and persistence, driven through
//! the public `Companion` handle with a scratch data directory.

use std::sync::Arc;

use companion_core::config::CompanionCfg;
use companion_core::context::{CoreContext, StaticGate};
use companion_core::error::ConfigValidationError;
use companion_core::intent::IntentEngine;
use companion_core::memory::MemoryFilter;
use companion_core::persistence::RestoreOutcome;
use companion_core::runtime::{BootState, Companion};
use companion_core::types::{
    IntentCandidate, InteractionKind, InteractionSignal, MemoryRecord, Mood, SignalContext, UserInput,
};

fn companion(dir: &std::path::Path) -> Companion {
    let ctx = CoreContext::new("ana", dir).with_gate(Arc::new(StaticGate(true)));
    Companion::new(CompanionCfg::default(), ctx).unwrap()
}

fn say(text: &str) -> UserInput {
    UserInput::new(text, InteractionSignal::from_kind(InteractionKind::Casual, 0.6))
}

/// Input → classify → compose → memory append → persona update.
#[tokio::test]
async fn pipeline_records_and_evolves() {
    let dir = tempfile::tempdir().unwrap();
    let mut c = companion(dir.path());
    assert_eq!(c.boot().await.unwrap(), BootState::Fresh);

    let before = c.persona().read();
    let reply = c
        .handle(say("tell me about black holes").with_topic("space"))
        .await;
    assert!(!reply.content.is_empty());
    let modulation = reply.modulation.expect("composed reply");
    assert_eq!(modulation.mood, before.mood);

    let after = c.persona().read();
    assert_eq!(after.revision, before.revision + 1);
    assert!(after.bond >= before.bond);
    assert_eq!(after.trust, before.trust);

    let records: Vec<_> = c.memory().query(MemoryFilter::default().topic("space")).iter().cloned().collect();
    assert_eq!(records.len(), 1);
    assert!(records[0].content.contains("black holes"));

    // second turn on the same topic recalls the first
    let reply = c.handle(say("and neutron stars?").with_topic("space")).await;
    assert!(reply.content.contains("We talked about space"), "{}", reply.content);
}

#[tokio::test]
async fn automatic_task_runs_and_learns() {
    let dir = tempfile::tempdir().unwrap();
    let mut c = companion(dir.path());
    let input = say("dim the lights").with_candidate(IntentCandidate::new("dim", "home", 0.9));
    let reply = c.handle(input).await;
    assert!(reply.content.contains("Done: dim the lights."), "{}", reply.content);

    // feedback on an automatic action reinforces its pattern
    let reply = c.handle(say("/accept")).await;
    assert_eq!(reply.content, "Glad that helped.");
    let weights = c.intent().lock().await.weights();
    assert_eq!(weights.len(), 1);
    assert!((weights[0].weight - 0.55).abs() < 1e-9);
}

#[tokio::test]
async fn backup_restore_round_trip_is_exact() {
    let dir = tempfile::tempdir().unwrap();
    let mut c = companion(dir.path());
    for text in ["good morning", "how was your night", "let's plan the day"] {
        c.handle(say(text).with_topic("routine")).await;
    }
    let before = c.gateway().snapshot().await;
    let reply = c.handle(say("/system backup")).await;
    assert!(reply.content.starts_with("Backup saved to "));

    let mut restored = companion(dir.path());
    assert!(matches!(restored.boot().await.unwrap(), BootState::Restored(_)));
    let after = restored.gateway().snapshot().await;
    assert_eq!(after.persona, before.persona);
    assert_eq!(after.memory, before.memory);
    for (a, b) in after.memory.iter().zip(&before.memory) {
        assert_eq!(a.timestamp, b.timestamp);
    }
}

#[tokio::test]
async fn corrupt_latest_backup_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let mut c = companion(dir.path());
    c.handle(say("remember this").with_topic("notes")).await;
    let good = c.gateway().backup().await.unwrap();
    std::fs::write(
        c.gateway().backup_dir().join("snapshot-99991231T000000.000000Z.json"),
        r#"{"schema_version": 2}"#,
    )
    .unwrap();

    let fresh = companion(dir.path());
    match fresh.gateway().restore_latest().await.unwrap() {
        RestoreOutcome::Restored(path) => assert_eq!(path, good),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(fresh.memory().len(), 1);
}

#[tokio::test]
async fn compaction_drops_expired_but_keeps_pinned() {
    let dir = tempfile::tempdir().unwrap();
    let c = companion(dir.path());
    let old = chrono::Utc::now() - chrono::Duration::days(31);
    c.memory()
        .append(MemoryRecord::new(Mood::Reflective, "old", "faded").at(old))
        .await
        .unwrap();
    c.memory()
        .append(MemoryRecord::new(Mood::Reflective, "anniversary", "kept").at(old).pinned())
        .await
        .unwrap();
    c.memory()
        .append(MemoryRecord::new(Mood::Playful, "today", "fresh"))
        .await
        .unwrap();

    let removed = c.memory().compact(chrono::Duration::days(30)).await.unwrap();
    assert_eq!(removed, 1);
    let topics: Vec<_> = c.memory().query(MemoryFilter::default()).iter().map(|r| r.topic.clone()).collect();
    assert_eq!(topics, ["today", "anniversary"]);
}

#[tokio::test]
async fn reset_aborts_on_anything_but_token() {
    let dir = tempfile::tempdir().unwrap();
    let mut c = companion(dir.path());
    c.handle(say("hi").with_topic("greetings")).await;
    let persona = c.persona().read();

    let warning = c.handle(say("/system reset persona")).await;
    assert!(warning.content.contains("CONFIRM RESET"));
    let reply = c.handle(say("confirm reset")).await;
    assert_eq!(reply.content, "Reset cancelled. Nothing changed.");
    assert_eq!(c.persona().read(), persona);
    assert_eq!(c.memory().len(), 1);
}

#[tokio::test]
async fn reset_with_token_restores_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let mut c = companion(dir.path());
    for _ in 0..5 {
        c.handle(say("you're the best").with_topic("us")).await;
    }
    c.handle(say("/system reset persona")).await;
    c.handle(say("CONFIRM RESET")).await;

    let defaults = CompanionCfg::default().default_profile();
    let persona = c.persona().read();
    assert_eq!(persona.traits, defaults.traits);
    assert_eq!(persona.bond, defaults.bond);
    assert_eq!(persona.trust, defaults.trust);
    assert_eq!(persona.mood, defaults.mood);
    assert!(c.memory().is_empty());
}

#[test]
fn inverted_thresholds_refuse_to_start() {
    let raw = r#"{ "intent": { "thresholds": { "suggestion": 0.9, "auto_complete": 0.8 } } }"#;
    let err = CompanionCfg::from_json(raw).unwrap_err();
    assert!(matches!(err, ConfigValidationError::ThresholdOrder { .. }));

    let mut cfg = CompanionCfg::default();
    cfg.intent.thresholds.suggestion = 0.95;
    assert!(IntentEngine::new(&cfg.intent).is_err());
}

#[test]
fn unknown_trait_rejected() {
    let raw = r#"{ "persona": { "personality_traits": { "sarcasm": 0.9 } } }"#;
    assert!(matches!(
        CompanionCfg::from_json(raw),
        Err(ConfigValidationError::Malformed(_))
    ));
}

#[tokio::test]
async fn persona_stays_bounded_under_extreme_signals() {
    let dir = tempfile::tempdir().unwrap();
    let mut c = companion(dir.path());
    let extremes = [1.0, -1.0, 1e9, -1e9, f64::NAN, 0.0];
    for (i, sentiment) in extremes.iter().cycle().take(60).enumerate() {
        let mut signal = InteractionSignal::new(SignalContext::from_sentiment(*sentiment));
        if i % 3 == 0 {
            signal = signal.with_bond(*sentiment);
        }
        c.handle(UserInput::new("...", signal)).await;
        let p = c.persona().read();
        assert!(p.in_bounds(), "out of bounds after step {i}: {p:?}");
    }
}
