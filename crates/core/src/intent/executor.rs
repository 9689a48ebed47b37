use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use super::engine::SharedIntentEngine;
use crate::error::CoreError;
use crate::types::{Task, TaskStatus};

/// External side effects of a task. Lives outside the core.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &Task) -> Result<(), String>;
}

/// Default executor: records the task in the log and reports success.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingExecutor;

#[async_trait]
impl TaskExecutor for LoggingExecutor {
    async fn execute(&self, task: &Task) -> Result<(), String> {
        tracing::info!(task = %task.id, category = %task.category, description = %task.description, "executing task");
        Ok(())
    }
}

/// Run one task through its lifecycle.
///
/// The engine lock is held only for the two transitions; the executor runs
/// unlocked and under `timeout`, so a cancel can land while it is in flight.
pub async fn run_task(
    engine: &SharedIntentEngine,
    executor: &dyn TaskExecutor,
    id: Uuid,
    timeout: Duration,
) -> Result<TaskStatus, CoreError> {
    let task = engine.lock().await.begin_execution(id)?;
    let result = match tokio::time::timeout(timeout, executor.execute(&task)).await {
        Ok(result) => result,
        Err(_) => Err(format!("executor timed out after {}ms", timeout.as_millis())),
    };
    let status = engine.lock().await.finish_execution(id, result)?;
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IntentCfg;
    use crate::intent::engine::IntentEngine;
    use crate::types::Trigger;

    struct Stalled;

    #[async_trait]
    impl TaskExecutor for Stalled {
        async fn execute(&self, _task: &Task) -> Result<(), String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    fn engine_with_task() -> (SharedIntentEngine, Uuid) {
        let mut engine = IntentEngine::new(&IntentCfg::default()).unwrap();
        let id = engine.add_task(Task::new("water plants", "home", "plants", 0.9, Trigger::Immediate));
        (engine.shared(), id)
    }

    #[tokio::test]
    async fn logging_executor_completes() {
        let (engine, id) = engine_with_task();
        let status = run_task(&engine, &LoggingExecutor, id, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn stalled_executor_fails_on_timeout() {
        let (engine, id) = engine_with_task();
        let status = run_task(&engine, &Stalled, id, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn finished_task_cannot_rerun() {
        let (engine, id) = engine_with_task();
        run_task(&engine, &LoggingExecutor, id, Duration::from_millis(100))
            .await
            .unwrap();
        let err = run_task(&engine, &LoggingExecutor, id, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Task(_)));
    }
}
