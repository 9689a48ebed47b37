pub mod response;

pub use response::{IntentResult, ModulationParams, Response, ResponseAction, ResponseComposer};
