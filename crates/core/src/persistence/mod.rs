pub mod gateway;
pub mod snapshot;

pub use gateway::{PersistenceGateway, RestoreOutcome, spawn_auto_backup};
pub use snapshot::{SCHEMA_VERSION, Snapshot};
