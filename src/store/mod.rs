//! Player persistence.
//!
//! Every write for a given player goes through [`PlayerStore::modify`], which is
//! the per-player critical section: the mutation runs against a working copy and
//! is committed only when it returns `Ok`, so a rejected or failed operation
//! never leaves a half-applied record behind.

pub mod memory;
pub mod sqlite;

#[cfg(test)]
pub mod test_support;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::GameError;
use crate::types::{PlayerId, PlayerPatch, PlayerRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub type Mutation = Box<dyn FnOnce(&mut PlayerRecord) -> Result<(), GameError> + Send>;

/// Boxes a closure as a [`Mutation`].
pub fn mutation<F>(f: F) -> Mutation
where
    F: FnOnce(&mut PlayerRecord) -> Result<(), GameError> + Send + 'static,
{
    Box::new(f)
}

/// Result of a committed write.
#[derive(Debug, Clone, PartialEq)]
pub struct Committed {
    pub record: PlayerRecord,
    /// The record as it was before this write; `None` when it was just created.
    pub previous: Option<PlayerRecord>,
    /// The record did not exist before this write.
    pub created: bool,
}

#[async_trait]
pub trait PlayerStore: Send + Sync {
    async fn get(&self, id: &PlayerId) -> Result<PlayerRecord, GameError>;

    /// Atomic read-modify-write of one player.
    ///
    /// When the player is absent, `defaults` becomes the starting record; with
    /// no defaults the call fails with `NotFound`.
    async fn modify(
        &self,
        id: &PlayerId,
        defaults: Option<PlayerRecord>,
        mutation: Mutation,
    ) -> Result<Committed, GameError>;

    async fn upsert_patch(
        &self,
        id: &PlayerId,
        patch: PlayerPatch,
        defaults: PlayerRecord,
        now: DateTime<Utc>,
    ) -> Result<Committed, GameError> {
        self.modify(
            id,
            Some(defaults),
            mutation(move |record| {
                patch.apply(record, now);
                Ok(())
            }),
        )
        .await
    }

    /// Ids of players whose session is open. Only the reconciler needs this.
    async fn list_mining_in_progress(&self) -> Result<Vec<PlayerId>, GameError>;

    async fn count(&self) -> Result<usize, GameError>;

    /// Highest balances first, ties ordered by id.
    async fn top_by_points(&self, limit: usize) -> Result<Vec<PlayerRecord>, GameError>;

    /// Push buffered state to durable storage, if the backend buffers at all.
    async fn flush(&self) -> Result<(), GameError> {
        Ok(())
    }
}
