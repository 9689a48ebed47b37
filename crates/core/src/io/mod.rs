pub mod output;

pub use output::{EventReceiver, EventSender, ProactiveEvent};
