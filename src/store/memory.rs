use super::{Committed, Mutation, PlayerStore};
use crate::error::GameError;
use crate::types::{MiningState, PlayerId, PlayerRecord};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

type Slot = Arc<Mutex<Option<PlayerRecord>>>;

/// Process-local store with one lock per player.
///
/// The table lock is only held to look up or insert a slot; mutations run under
/// the slot lock alone, so unrelated players never wait on each other. With a
/// snapshot path the whole table is persisted as JSON on `flush`.
pub struct MemoryStore {
    slots: RwLock<HashMap<PlayerId, Slot>>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            snapshot_path: None,
        }
    }

    /// Restore from `path` if it exists; later flushes write back to it.
    ///
    /// The parent directory is created up front so the first flush can land.
    pub fn with_snapshot(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create snapshot directory {:?}", dir))?;
        }

        let mut slots = HashMap::new();

        if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read snapshot {:?}", path))?;
            let records: Vec<PlayerRecord> =
                serde_json::from_str(&raw).context("Failed to parse snapshot")?;

            info!("📂 Restored {} players from {:?}", records.len(), path);

            for record in records {
                slots.insert(record.id.clone(), Arc::new(Mutex::new(Some(record))));
            }
        }

        Ok(Self {
            slots: RwLock::new(slots),
            snapshot_path: Some(path.to_path_buf()),
        })
    }

    async fn slot(&self, id: &PlayerId) -> Option<Slot> {
        self.slots.read().await.get(id).cloned()
    }

    async fn slot_or_insert(&self, id: &PlayerId) -> Slot {
        if let Some(slot) = self.slot(id).await {
            return slot;
        }

        let mut slots = self.slots.write().await;
        slots
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Copies every record, taking one slot lock at a time.
    async fn records(&self) -> Vec<PlayerRecord> {
        let slots: Vec<Slot> = self.slots.read().await.values().cloned().collect();

        let mut records = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Some(record) = slot.lock().await.as_ref() {
                records.push(record.clone());
            }
        }
        records
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlayerStore for MemoryStore {
    async fn get(&self, id: &PlayerId) -> Result<PlayerRecord, GameError> {
        let slot = self
            .slot(id)
            .await
            .ok_or_else(|| GameError::NotFound(id.clone()))?;
        let guard = slot.lock().await;
        guard.clone().ok_or_else(|| GameError::NotFound(id.clone()))
    }

    async fn modify(
        &self,
        id: &PlayerId,
        defaults: Option<PlayerRecord>,
        mutation: Mutation,
    ) -> Result<Committed, GameError> {
        let slot = match defaults {
            Some(_) => self.slot_or_insert(id).await,
            None => self
                .slot(id)
                .await
                .ok_or_else(|| GameError::NotFound(id.clone()))?,
        };

        let mut guard = slot.lock().await;
        let previous = guard.clone();
        let mut working = match (&previous, defaults) {
            (Some(existing), _) => existing.clone(),
            (None, Some(defaults)) => defaults,
            (None, None) => return Err(GameError::NotFound(id.clone())),
        };

        mutation(&mut working)?;
        *guard = Some(working.clone());

        Ok(Committed {
            record: working,
            created: previous.is_none(),
            previous,
        })
    }

    async fn list_mining_in_progress(&self) -> Result<Vec<PlayerId>, GameError> {
        let mut ids: Vec<PlayerId> = self
            .records()
            .await
            .into_iter()
            .filter(|r| r.mining_state == MiningState::Mining)
            .map(|r| r.id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn count(&self) -> Result<usize, GameError> {
        Ok(self.records().await.len())
    }

    async fn top_by_points(&self, limit: usize) -> Result<Vec<PlayerRecord>, GameError> {
        let mut records = self.records().await;
        records.sort_by(|a, b| b.points.cmp(&a.points).then_with(|| a.id.cmp(&b.id)));
        records.truncate(limit);
        Ok(records)
    }

    async fn flush(&self) -> Result<(), GameError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let mut records = self.records().await;
        records.sort_by(|a, b| a.id.cmp(&b.id));

        let json = serde_json::to_string_pretty(&records)
            .map_err(|e| GameError::storage("flush", e))?;

        // Write-then-rename so a crash mid-write keeps the previous snapshot.
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| GameError::storage("flush", e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| GameError::storage("flush", e))?;

        debug!("Snapshot written: {} players -> {:?}", records.len(), path);
        Ok(())
    }
}
