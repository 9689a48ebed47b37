pub mod commands;
pub mod feedback;

pub use commands::{CommandSurface, Step, SystemCommand};
pub use feedback::detect_keyword_feedback;
