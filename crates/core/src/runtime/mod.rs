mod companion;
mod scheduler;
mod shutdown;

pub use companion::{BootState, Companion, Reply};
pub use scheduler::{CycleReport, SchedulerSettings, ThoughtScheduler};
pub use shutdown::ShutdownGuard;
pub use crate::types::SchedulerStatus;
