pub mod mood;
pub mod persona;

pub use persona::{PersonaHandle, PersonaSettings, PersonaState};
