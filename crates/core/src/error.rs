use uuid::Uuid;

use crate::types::TaskStatus;

/// Invalid configuration. Fatal at startup; values are never clamped.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("{field} = {value} is outside {range}")]
    OutOfRange {
        field: String,
        value: f64,
        range: &'static str,
    },
    #[error(
        "thresholds must satisfy auto_complete >= routine >= prediction >= suggestion \
         (got auto_complete={auto_complete}, routine={routine}, prediction={prediction}, suggestion={suggestion})"
    )]
    ThresholdOrder {
        auto_complete: f64,
        routine: f64,
        prediction: f64,
        suggestion: f64,
    },
    #[error("malformed configuration: {0}")]
    Malformed(String),
    #[error("failed to access configuration file: {0}")]
    Io(#[from] std::io::Error),
}

/// Corrupt, unreadable, or version-mismatched persisted state.
#[derive(Debug, thiserror::Error)]
pub enum DataIntegrityError {
    #[error("snapshot schema version {found} is not supported (supported: {supported})")]
    SchemaVersion { found: u64, supported: u32 },
    #[error("snapshot is corrupt: {0}")]
    Corrupt(String),
    #[error("snapshot violates state invariants: {0}")]
    InvalidState(String),
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no valid backup found ({0} rejected)")]
    NoValidBackup(usize),
}

/// Task lifecycle violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("task {0} not found")]
    NotFound(Uuid),
    #[error("invalid task transition: {from:?} → {to:?}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },
}

/// Umbrella error for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigValidationError),
    #[error(transparent)]
    DataIntegrity(#[from] DataIntegrityError),
    #[error(transparent)]
    Task(#[from] TaskError),
    /// An atomic-update invariant was violated. Indicates a locking bug.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),
    #[error("{0} worker has stopped")]
    WorkerStopped(&'static str),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Plain message safe to show the user. Detail stays in the logs.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Config(_) => "My configuration is invalid, so I can't do that right now.",
            Self::DataIntegrity(_) => "I couldn't read my saved state.",
            Self::Task(TaskError::NotFound(_)) => "I couldn't find that task.",
            Self::Task(TaskError::InvalidTransition { .. }) => {
                "That task can't be changed anymore."
            }
            Self::ConcurrencyConflict(_) | Self::WorkerStopped(_) => {
                "Something went wrong inside me. Please try again."
            }
            Self::Io(_) | Self::Json(_) => "I couldn't save or load my data.",
        }
    }
}

/// Step of the background cycle that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStep {
    Compaction,
    Nudge,
    TaskScan,
    Proactive,
}

/// Failure of one background cycle. Logged and skipped, never propagated.
#[derive(Debug, thiserror::Error)]
#[error("scheduler cycle failed during {step:?}: {source}")]
pub struct SchedulerCycleError {
    pub step: CycleStep,
    #[source]
    pub source: CoreError,
}

impl SchedulerCycleError {
    pub fn at(step: CycleStep) -> impl FnOnce(CoreError) -> Self {
        move |source| Self { step, source }
    }
}
