//! Command store with file-based JSON persistence
//!
//! Directory layout:
//! ```text
//! <storage>/commands/
//! ├── <id>.json
//! └── ...
//! ```
//!
//! Every mutation is written to disk (temp file + rename) before it becomes
//! visible in memory, so a relay restart never loses a submitted command.

use super::types::{CommandRecord, CommandResult};
use crate::error::{Error, Result};
use crate::protocol::{CommandKind, CommandPayload, CommandStatus};
use base64::Engine;
use chrono::Utc;
use rand::RngCore;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};

/// Error recorded on commands that were running when the relay went down
const INTERRUPTED_ERROR: &str = "Relay restarted before the agent reported a result";

/// Durable store of every command and its lifecycle state
pub struct CommandStore {
    dir: PathBuf,
    inner: RwLock<StoreInner>,
    /// Ids of records that just became terminal
    completions: broadcast::Sender<String>,
}

struct StoreInner {
    records: HashMap<String, CommandRecord>,
    next_seq: u64,
}

impl CommandStore {
    /// Open (or create) a store under `base_dir/commands`
    pub async fn open(base_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = base_dir.as_ref().join("commands");
        tokio::fs::create_dir_all(&dir).await?;

        let (completions, _) = broadcast::channel(1024);
        let store = Self {
            dir,
            inner: RwLock::new(StoreInner {
                records: HashMap::new(),
                next_seq: 1,
            }),
            completions,
        };

        store.load_from_disk().await;
        Ok(store)
    }

    /// Default base directory (platform data dir + `remote-relay`)
    pub fn default_dir() -> PathBuf {
        dirs_next::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("remote-relay")
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Allocate a new `pending` record and return its id
    pub async fn create(
        &self,
        kind: CommandKind,
        payload: CommandPayload,
        timeout_seconds: u64,
    ) -> Result<String> {
        if let Some(field) = payload.missing_field(kind) {
            return Err(Error::InvalidCommand(format!(
                "{} requires '{}'",
                kind, field
            )));
        }

        let mut inner = self.inner.write().await;
        let id = loop {
            let candidate = new_command_id();
            if !inner.records.contains_key(&candidate) {
                break candidate;
            }
        };

        let record = CommandRecord {
            id: id.clone(),
            seq: inner.next_seq,
            kind,
            status: CommandStatus::Pending,
            payload,
            timeout_seconds,
            result: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };

        self.persist(&record).await?;
        inner.next_seq += 1;
        inner.records.insert(id.clone(), record);

        tracing::debug!(command_id = %id, kind = %kind, "Command created");
        Ok(id)
    }

    /// `pending → running`. Returns `false` (no-op) when the record is
    /// missing or not pending.
    pub async fn mark_running(&self, id: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(current) = inner.records.get(id) else {
            return Ok(false);
        };
        if current.status != CommandStatus::Pending {
            return Ok(false);
        }

        let mut updated = current.clone();
        updated.status = CommandStatus::Running;
        updated.started_at = Some(Utc::now());

        self.persist(&updated).await?;
        inner.records.insert(id.to_string(), updated);
        Ok(true)
    }

    /// Terminal transition. Returns `false` when the record is missing or
    /// already terminal; the first terminal write wins.
    pub async fn complete(
        &self,
        id: &str,
        status: CommandStatus,
        output: Option<String>,
        error: Option<String>,
        exit_code: Option<i32>,
    ) -> Result<bool> {
        if !status.is_terminal() {
            return Err(Error::InvalidCommand(format!(
                "'{}' is not a terminal status",
                status
            )));
        }

        let mut inner = self.inner.write().await;
        let Some(current) = inner.records.get(id) else {
            tracing::warn!(command_id = %id, "Result for unknown command");
            return Ok(false);
        };
        if current.is_terminal() {
            tracing::debug!(
                command_id = %id,
                status = %current.status,
                "Ignoring duplicate result for finished command"
            );
            return Ok(false);
        }

        let mut updated = current.clone();
        updated.status = status;
        updated.result = Some(CommandResult {
            output,
            error,
            exit_code,
        });
        updated.completed_at = Some(Utc::now());

        self.persist(&updated).await?;
        inner.records.insert(id.to_string(), updated);
        drop(inner);

        // No subscribers is fine: nobody is waiting on this command
        let _ = self.completions.send(id.to_string());
        Ok(true)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get a record by id
    pub async fn get(&self, id: &str) -> Option<CommandRecord> {
        self.inner.read().await.records.get(id).cloned()
    }

    /// All `pending` records, oldest first
    pub async fn list_pending_oldest_first(&self) -> Vec<CommandRecord> {
        let inner = self.inner.read().await;
        let mut pending: Vec<CommandRecord> = inner
            .records
            .values()
            .filter(|r| r.status == CommandStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.seq.cmp(&b.seq)));
        pending
    }

    /// Most recent records, newest first
    pub async fn list_recent(&self, limit: usize) -> Vec<CommandRecord> {
        let inner = self.inner.read().await;
        let mut records: Vec<CommandRecord> = inner.records.values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.seq.cmp(&a.seq)));
        records.truncate(limit);
        records
    }

    /// Number of records in the store
    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Wait until `id` is terminal, for at most `budget`.
    ///
    /// Resolves as soon as the terminal transition happens. On budget
    /// exhaustion returns the last observed (non-terminal) record. `None`
    /// means the id is unknown.
    pub async fn wait_for_terminal(&self, id: &str, budget: Duration) -> Option<CommandRecord> {
        // Subscribe before reading so a completion between the two is not missed
        let mut completions = self.completions.subscribe();
        // Budgets past what `Instant` can represent mean "no deadline"
        let deadline = tokio::time::Instant::now().checked_add(budget);

        loop {
            let record = self.get(id).await?;
            if record.is_terminal() {
                return Some(record);
            }

            loop {
                let next = match deadline {
                    Some(deadline) => tokio::time::timeout_at(deadline, completions.recv()).await,
                    None => Ok(completions.recv().await),
                };
                match next {
                    Err(_) => return self.get(id).await,
                    Ok(Ok(done)) if done == id => break,
                    Ok(Ok(_)) => continue,
                    Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                        tracing::debug!(command_id = %id, skipped, "Completion feed lagged");
                        break;
                    }
                    Ok(Err(broadcast::error::RecvError::Closed)) => return self.get(id).await,
                }
            }
        }
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Load every record from disk and finalize the ones a previous relay
    /// process left `running`.
    async fn load_from_disk(&self) {
        let records = Self::load_json_files::<CommandRecord>(&self.dir);
        let mut inner = self.inner.write().await;

        for mut record in records {
            if record.status == CommandStatus::Running {
                record.status = CommandStatus::Failed;
                record.result = Some(CommandResult {
                    output: None,
                    error: Some(INTERRUPTED_ERROR.to_string()),
                    exit_code: None,
                });
                record.completed_at = Some(Utc::now());
                if let Err(e) = self.persist(&record).await {
                    tracing::warn!(command_id = %record.id, "Failed to persist recovery: {}", e);
                }
                tracing::warn!(command_id = %record.id, "Marked interrupted command as failed");
            }

            inner.next_seq = inner.next_seq.max(record.seq + 1);
            inner.records.insert(record.id.clone(), record);
        }

        if !inner.records.is_empty() {
            tracing::info!(count = inner.records.len(), "Loaded commands from disk");
        }
    }

    /// Load all JSON files from a directory into a Vec
    fn load_json_files<T: serde::de::DeserializeOwned>(dir: &Path) -> Vec<T> {
        let mut items = Vec::new();
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to read directory {}: {}", dir.display(), e);
                }
                return items;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read_to_string(&path) {
                Ok(data) => match serde_json::from_str(&data) {
                    Ok(item) => items.push(item),
                    Err(e) => {
                        tracing::warn!("Failed to parse {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read {}: {}", path.display(), e);
                }
            }
        }

        items
    }

    /// Write one record atomically
    async fn persist(&self, record: &CommandRecord) -> Result<()> {
        let path = self.dir.join(format!("{}.json", record.id));
        let tmp = self.dir.join(format!(".{}.json.tmp", record.id));
        let json = serde_json::to_vec_pretty(record)?;

        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| Error::Storage(format!("write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::Storage(format!("rename {}: {}", path.display(), e)))?;
        Ok(())
    }
}

/// 12 random bytes, URL-safe base64 (16 characters)
fn new_command_id() -> String {
    let mut bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}
