pub mod engine;
pub mod executor;
pub mod patterns;
pub mod task;
pub mod tiers;

pub use engine::{Classification, IntentEngine, PlannedAction, SharedIntentEngine};
pub use executor::{LoggingExecutor, TaskExecutor, run_task};
pub use tiers::{ConfidenceTier, TierLadder};
