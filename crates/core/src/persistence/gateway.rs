use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::snapshot::{SCHEMA_VERSION, Snapshot};
use crate::context::CoreContext;
use crate::error::{CoreError, DataIntegrityError};
use crate::identity::PersonaHandle;
use crate::intent::SharedIntentEngine;
use crate::memory::MemoryStore;

const BACKUP_DIR: &str = "backups";
const BACKUP_PREFIX: &str = "snapshot-";
/// Present once the user has confirmed a reset after unrecoverable state.
const RESET_MARKER: &str = "reset_acknowledged";

/// Result of looking for saved state at startup.
#[derive(Debug)]
pub enum RestoreOutcome {
    Restored(PathBuf),
    /// No backups exist yet.
    Fresh,
    /// Every backup was rejected, newest first.
    Unrecoverable(Vec<(PathBuf, String)>),
}

/// Snapshot, restore, and durable backups of persona, memory, and tasks.
/// Reads each owner's state; owns none of it.
#[derive(Debug, Clone)]
pub struct PersistenceGateway {
    user_id: String,
    data_dir: PathBuf,
    persona: PersonaHandle,
    memory: MemoryStore,
    intent: SharedIntentEngine,
    retention: chrono::Duration,
    max_backups: usize,
}

impl PersistenceGateway {
    pub fn new(
        ctx: &CoreContext,
        persona: PersonaHandle,
        memory: MemoryStore,
        intent: SharedIntentEngine,
        retention: chrono::Duration,
        max_backups: usize,
    ) -> Self {
        Self {
            user_id: ctx.user_id.clone(),
            data_dir: ctx.data_dir.clone(),
            persona,
            memory,
            intent,
            retention,
            max_backups: max_backups.max(1),
        }
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.data_dir.join(BACKUP_DIR)
    }

    /// Copy current state. Persona and memory come from published snapshots;
    /// the engine lock is held only while tasks and weights are cloned.
    pub async fn snapshot(&self) -> Snapshot {
        let now = Utc::now();
        let persona = self.persona.read();
        let memory = self.memory.window(self.retention, now);
        let (tasks, recurring, weights) = {
            let engine = self.intent.lock().await;
            (engine.waiting_tasks(), engine.recurring_tasks(), engine.weights())
        };
        Snapshot {
            schema_version: SCHEMA_VERSION,
            created_at: now,
            user_id: self.user_id.clone(),
            persona,
            memory,
            tasks,
            recurring,
            weights,
        }
    }

    /// Validate and hand each part back to its owner.
    pub async fn restore(&self, snapshot: Snapshot) -> Result<(), CoreError> {
        snapshot.validate()?;
        if snapshot.user_id != self.user_id {
            tracing::warn!(found = %snapshot.user_id, expected = %self.user_id, "snapshot belongs to another user");
            return Err(DataIntegrityError::InvalidState(format!(
                "snapshot belongs to {}",
                snapshot.user_id
            ))
            .into());
        }
        self.persona.replace(snapshot.persona).await?;
        self.memory.replace(snapshot.memory).await?;
        self.intent
            .lock()
            .await
            .restore(snapshot.tasks, snapshot.recurring, snapshot.weights);
        tracing::info!(created_at = %snapshot.created_at, "state restored");
        Ok(())
    }

    /// Snapshot and write durably. Returns the file path.
    pub async fn backup(&self) -> Result<PathBuf, CoreError> {
        let snapshot = self.snapshot().await;
        let body = snapshot.to_json()?;
        let dir = self.backup_dir();
        tokio::fs::create_dir_all(&dir).await?;
        let name = format!(
            "{BACKUP_PREFIX}{}.json",
            snapshot.created_at.format("%Y%m%dT%H%M%S%.6fZ")
        );
        let path = dir.join(name);
        write_atomic(&path, body.as_bytes()).await?;
        let pruned = self.prune().await?;
        tracing::info!(path = %path.display(), pruned, "backup written");
        Ok(path)
    }

    /// Backup files, newest first.
    pub async fn list_backups(&self) -> Result<Vec<PathBuf>, std::io::Error> {
        let dir = self.backup_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_backup = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(BACKUP_PREFIX) && n.ends_with(".json"));
            if is_backup {
                paths.push(path);
            }
        }
        // timestamped names sort chronologically
        paths.sort();
        paths.reverse();
        Ok(paths)
    }

    /// Keep the newest `max_backups`, plus the newest backup that loads when
    /// corrupt files crowd it out of that window.
    async fn prune(&self) -> Result<usize, std::io::Error> {
        let backups = self.list_backups().await?;
        if backups.len() <= self.max_backups {
            return Ok(0);
        }
        let mut newest_valid = None;
        for path in &backups {
            if Self::load(path).await.is_ok() {
                newest_valid = Some(path);
                break;
            }
        }
        let mut removed = 0;
        for old in backups.iter().skip(self.max_backups) {
            if newest_valid == Some(old) {
                tracing::warn!(path = %old.display(), "keeping last valid backup past the limit");
                continue;
            }
            tokio::fs::remove_file(old).await?;
            removed += 1;
        }
        Ok(removed)
    }

    pub async fn load(path: &Path) -> Result<Snapshot, DataIntegrityError> {
        let raw = tokio::fs::read_to_string(path).await?;
        Snapshot::from_json(&raw)
    }

    /// Restore from the newest backup that loads and applies cleanly,
    /// falling back to older ones.
    pub async fn restore_latest(&self) -> Result<RestoreOutcome, CoreError> {
        let backups = self.list_backups().await?;
        if backups.is_empty() {
            return Ok(RestoreOutcome::Fresh);
        }
        let mut rejected = Vec::new();
        for path in backups {
            let result = match Self::load(&path).await {
                Ok(snapshot) => self.restore(snapshot).await,
                Err(e) => Err(e.into()),
            };
            match result {
                Ok(()) => {
                    if !rejected.is_empty() {
                        tracing::warn!(skipped = rejected.len(), path = %path.display(), "restored from older backup");
                    }
                    return Ok(RestoreOutcome::Restored(path));
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "backup rejected");
                    rejected.push((path, e.to_string()));
                }
            }
        }
        tracing::error!(error = %DataIntegrityError::NoValidBackup(rejected.len()), "no usable saved state");
        Ok(RestoreOutcome::Unrecoverable(rejected))
    }

    pub fn reset_acknowledged(&self) -> bool {
        self.data_dir.join(RESET_MARKER).exists()
    }

    /// Remember that the user confirmed a reset, so later unrecoverable
    /// starts reset without asking.
    pub async fn acknowledge_reset(&self) -> Result<(), std::io::Error> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        tokio::fs::write(self.data_dir.join(RESET_MARKER), Utc::now().to_rfc3339()).await
    }
}

/// Write to a sibling temp file, flush to disk, then rename over `path`.
async fn write_atomic(path: &Path, body: &[u8]) -> Result<(), std::io::Error> {
    let tmp = path.with_extension("json.tmp");
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(body).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp, path).await
}

/// Spawn the periodic backup task. Stops on cancellation.
pub fn spawn_auto_backup(gateway: PersistenceGateway, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("auto backup task shutting down");
                    return;
                }
                _ = tokio::time::sleep(interval) => {}
            }

            if cancel.is_cancelled() {
                return;
            }

            if let Err(e) = gateway.backup().await {
                tracing::warn!(error = %e, "auto backup failed");
            }
        }
    })
}
