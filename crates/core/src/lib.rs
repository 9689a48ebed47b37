//! Relationship engine for a personal companion: an evolving persona,
//! emotional memory, a confidence-tiered intent engine, and a background
//! thought scheduler, persisted through versioned snapshots.

pub mod cognition;
pub mod config;
pub mod context;
pub mod dialogue;
pub mod error;
pub mod identity;
pub mod intent;
pub mod io;
pub mod memory;
pub mod persistence;
pub mod runtime;
pub mod types;
