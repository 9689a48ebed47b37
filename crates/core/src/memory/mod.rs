pub mod emotional;

pub use emotional::{MemoryFilter, MemoryLog, MemoryQuery, MemorySnapshot, MemoryStore, Order};
