use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::intent::executor::{LoggingExecutor, TaskExecutor};

/// External verification window. Decides whether automatic execution is
/// currently allowed; the core only consumes the answer.
#[async_trait]
pub trait AutoExecutionGate: Send + Sync {
    async fn permits_auto_execution(&self) -> bool;
}

/// Gate with a fixed answer.
#[derive(Debug, Clone, Copy)]
pub struct StaticGate(pub bool);

#[async_trait]
impl AutoExecutionGate for StaticGate {
    async fn permits_auto_execution(&self) -> bool {
        self.0
    }
}

/// Explicit engine handle, created once and passed to every component.
#[derive(Clone)]
pub struct CoreContext {
    /// Identity of the bonded user.
    pub user_id: String,
    pub data_dir: PathBuf,
    pub gate: Arc<dyn AutoExecutionGate>,
    pub executor: Arc<dyn TaskExecutor>,
}

impl CoreContext {
    pub fn new(user_id: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            user_id: user_id.into(),
            data_dir: data_dir.into(),
            gate: Arc::new(StaticGate(true)),
            executor: Arc::new(LoggingExecutor),
        }
    }

    pub fn with_gate(mut self, gate: Arc<dyn AutoExecutionGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// Ask the gate. `None` means it timed out; callers treat that as not permitted
    /// and retry on a later cycle.
    pub async fn auto_execution_permitted(&self, timeout: Duration) -> Option<bool> {
        match tokio::time::timeout(timeout, self.gate.permits_auto_execution()).await {
            Ok(permitted) => Some(permitted),
            Err(_) => {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "execution gate timed out");
                None
            }
        }
    }
}

impl std::fmt::Debug for CoreContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreContext")
            .field("user_id", &self.user_id)
            .field("data_dir", &self.data_dir)
            .finish_non_exhaustive()
    }
}
