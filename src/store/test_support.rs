use super::{Committed, MemoryStore, Mutation, PlayerStore};
use crate::error::GameError;
use crate::types::{PlayerId, PlayerRecord};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Longer than any operation timeout a test uses.
const HANG: Duration = Duration::from_secs(3600);

/// Memory store whose writes can be switched to fail with `StorageUnavailable`,
/// or made to hang for one player or for listings.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub failing: AtomicBool,
    hanging_id: Mutex<Option<PlayerId>>,
    hanging_listing: AtomicBool,
}

impl FlakyStore {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Writes for `id` never complete until cleared with `None`.
    pub fn hang_writes_for(&self, id: Option<PlayerId>) {
        *self.hanging_id.lock().unwrap() = id;
    }

    pub fn set_listing_hangs(&self, hangs: bool) {
        self.hanging_listing.store(hangs, Ordering::SeqCst);
    }

    fn check(&self, operation: &'static str) -> Result<(), GameError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(GameError::storage(operation, "connection refused"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PlayerStore for FlakyStore {
    async fn get(&self, id: &PlayerId) -> Result<PlayerRecord, GameError> {
        self.inner.get(id).await
    }

    async fn modify(
        &self,
        id: &PlayerId,
        defaults: Option<PlayerRecord>,
        mutation: Mutation,
    ) -> Result<Committed, GameError> {
        let hangs = self.hanging_id.lock().unwrap().as_ref() == Some(id);
        if hangs {
            tokio::time::sleep(HANG).await;
        }
        self.check("modify")?;
        self.inner.modify(id, defaults, mutation).await
    }

    async fn list_mining_in_progress(&self) -> Result<Vec<PlayerId>, GameError> {
        if self.hanging_listing.load(Ordering::SeqCst) {
            tokio::time::sleep(HANG).await;
        }
        self.inner.list_mining_in_progress().await
    }

    async fn count(&self) -> Result<usize, GameError> {
        self.inner.count().await
    }

    async fn top_by_points(&self, limit: usize) -> Result<Vec<PlayerRecord>, GameError> {
        self.inner.top_by_points(limit).await
    }
}
