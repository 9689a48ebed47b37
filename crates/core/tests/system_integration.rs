//! Background behavior: the thought scheduler running next to the
//! foreground path, proactive events, and graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use companion_core::config::CompanionCfg;
use companion_core::context::{CoreContext, StaticGate};
use companion_core::intent::TaskExecutor;
use companion_core::io::ProactiveEvent;
use companion_core::runtime::{Companion, ShutdownGuard};
use companion_core::types::{InteractionSignal, SignalContext, Task, TaskStatus, Trigger, UserInput};

fn fast_cfg(dir: &std::path::Path) -> CompanionCfg {
    let mut cfg = CompanionCfg::default();
    cfg.system.monitor_interval_seconds = 1;
    cfg.system.shutdown_grace_secs = 1;
    cfg.system.auto_backup = false;
    cfg.system.data_dir = dir.to_path_buf();
    cfg
}

fn companion(cfg: CompanionCfg, gate: bool) -> Companion {
    let ctx = CoreContext::new("ana", cfg.system.data_dir.clone()).with_gate(Arc::new(StaticGate(gate)));
    Companion::new(cfg, ctx).unwrap()
}

async fn next_event(rx: &mut companion_core::io::EventReceiver) -> ProactiveEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event within timeout")
        .expect("channel open")
}

#[tokio::test]
async fn scheduler_executes_due_task_and_shuts_down() {
    let dir = tempfile::tempdir().unwrap();
    let mut c = companion(fast_cfg(dir.path()), true);
    let id = c
        .intent()
        .lock()
        .await
        .add_task(Task::new("water plants", "home", "plants", 0.9, Trigger::Immediate));

    let mut guard = ShutdownGuard::new();
    let mut events = c.start_background(&mut guard);

    match next_event(&mut events).await {
        ProactiveEvent::TaskFinished { task_id, status, .. } => {
            assert_eq!(task_id, id);
            assert_eq!(status, TaskStatus::Completed);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let mut status = c.scheduler_status().unwrap();
    tokio::time::timeout(Duration::from_secs(5), status.wait_for(|s| s.cycles_completed >= 1))
        .await
        .unwrap()
        .unwrap();
    let report = c.status_report().await;
    assert!(report.contains("scheduler: running"), "{report}");

    let path = c.shutdown(guard).await.unwrap().expect("final backup");
    assert!(path.exists());
    let s = c.scheduler_status().unwrap().borrow().clone();
    assert!(!s.running);
    assert_eq!(s.cycles_failed, 0);
}

#[tokio::test]
async fn scheduler_suggestion_answered_from_foreground() {
    let dir = tempfile::tempdir().unwrap();
    let mut c = companion(fast_cfg(dir.path()), false);
    c.intent()
        .lock()
        .await
        .add_task(Task::new("call mom", "family", "call", 0.9, Trigger::Immediate));

    let mut guard = ShutdownGuard::new();
    let mut events = c.start_background(&mut guard);
    let task_id = match next_event(&mut events).await {
        ProactiveEvent::Suggestion { task_id, description } => {
            assert_eq!(description, "call mom");
            task_id
        }
        other => panic!("unexpected event: {other:?}"),
    };

    c.note_suggestion(task_id);
    let reply = c
        .handle(UserInput::new(
            "yes",
            InteractionSignal::new(SignalContext::from_sentiment(0.5)),
        ))
        .await;
    assert_eq!(reply.content, "Done: call mom.");
    c.shutdown(guard).await.unwrap();
}

#[tokio::test]
async fn foreground_and_background_interleave_safely() {
    let dir = tempfile::tempdir().unwrap();
    let mut c = companion(fast_cfg(dir.path()), true);
    let mut guard = ShutdownGuard::new();
    let _events = c.start_background(&mut guard);

    let mut status = c.scheduler_status().unwrap();
    let mut expected_revision = c.persona().read().revision;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    let mut turns = 0u64;
    while tokio::time::Instant::now() < deadline {
        let signal = InteractionSignal::new(SignalContext::from_sentiment(if turns % 2 == 0 { 1.0 } else { -1.0 }));
        c.handle(UserInput::new("chat", signal).with_topic("chat")).await;
        turns += 1;
        let p = c.persona().read();
        assert!(p.in_bounds());
        // every committed update, foreground or background, bumps the revision
        assert!(p.revision > expected_revision);
        expected_revision = p.revision;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    status.wait_for(|s| s.cycles_completed >= 1).await.unwrap();
    assert_eq!(c.memory().len() as u64, turns);
    c.shutdown(guard).await.unwrap();
}

struct Stalled;

#[async_trait]
impl TaskExecutor for Stalled {
    async fn execute(&self, _task: &Task) -> Result<(), String> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }
}

#[tokio::test]
async fn stalled_executor_fails_task_without_stalling_scheduler() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = fast_cfg(dir.path());
    cfg.system.collaborator_timeout_ms = 100;
    let ctx = CoreContext::new("ana", dir.path())
        .with_gate(Arc::new(StaticGate(true)))
        .with_executor(Arc::new(Stalled));
    let mut c = Companion::new(cfg, ctx).unwrap();
    c.intent()
        .lock()
        .await
        .add_task(Task::new("sync photos", "media", "photos", 0.95, Trigger::Immediate));

    let mut guard = ShutdownGuard::new();
    let mut events = c.start_background(&mut guard);
    match next_event(&mut events).await {
        ProactiveEvent::TaskFinished { status, .. } => assert_eq!(status, TaskStatus::Failed),
        other => panic!("unexpected event: {other:?}"),
    }
    let mut status = c.scheduler_status().unwrap();
    status.wait_for(|s| s.cycles_completed >= 2).await.unwrap();
    c.shutdown(guard).await.unwrap();
}
