use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DataIntegrityError;
use crate::intent::patterns::PatternWeight;
use crate::types::{MemoryRecord, PersonaProfile, RecurringTask, Task};

/// The only snapshot layout this build reads and writes.
pub const SCHEMA_VERSION: u32 = 1;

/// Versioned capture of all persisted engine state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Snapshot {
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
    pub user_id: String,
    pub persona: PersonaProfile,
    /// Records inside the retention window, plus pinned ones. Oldest first.
    pub memory: Vec<MemoryRecord>,
    /// Pending and scheduled tasks only.
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub recurring: Vec<RecurringTask>,
    #[serde(default)]
    pub weights: Vec<PatternWeight>,
}

impl Snapshot {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse, check the schema version, then check state invariants.
    /// The version is read before the body so a future layout reports a
    /// version mismatch instead of a parse error.
    pub fn from_json(raw: &str) -> Result<Self, DataIntegrityError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| DataIntegrityError::Corrupt(e.to_string()))?;
        let found = value
            .get("schema_version")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| DataIntegrityError::Corrupt("missing schema_version".into()))?;
        if found != u64::from(SCHEMA_VERSION) {
            return Err(DataIntegrityError::SchemaVersion {
                found,
                supported: SCHEMA_VERSION,
            });
        }
        let snapshot: Self =
            serde_json::from_value(value).map_err(|e| DataIntegrityError::Corrupt(e.to_string()))?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn validate(&self) -> Result<(), DataIntegrityError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(DataIntegrityError::SchemaVersion {
                found: u64::from(self.schema_version),
                supported: SCHEMA_VERSION,
            });
        }
        self.persona
            .check()
            .map_err(|e| DataIntegrityError::InvalidState(format!("persona {e}")))?;
        if self.memory.windows(2).any(|w| w[0].timestamp > w[1].timestamp) {
            return Err(DataIntegrityError::InvalidState("memory is out of order".into()));
        }
        if let Some(task) = self.tasks.iter().find(|t| !t.status.is_waiting()) {
            return Err(DataIntegrityError::InvalidState(format!(
                "task {} is {}",
                task.id,
                task.status.as_str()
            )));
        }
        if let Some(w) = self.weights.iter().find(|w| !(0.0..=1.0).contains(&w.weight)) {
            return Err(DataIntegrityError::InvalidState(format!(
                "weight {}/{} = {}",
                w.pattern, w.category, w.weight
            )));
        }
        Ok(())
    }
}
