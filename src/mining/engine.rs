use crate::clock::Clock;
use crate::error::GameError;
use crate::store::{mutation, PlayerStore};
use crate::types::{seconds_between, MiningState, MiningStatus, PlayerId, PlayerRecord};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

/// Mining session state machine.
///
/// Accrual is cumulative: starting a session that is already open folds the
/// live interval into the accrued counter and rebases the timer, exactly like
/// a reconcile. Only an explicit `reset` zeroes accrued time.
pub struct MiningEngine {
    store: Arc<dyn PlayerStore>,
    clock: Arc<dyn Clock>,
    default_photo_url: String,
}

impl MiningEngine {
    pub fn new(
        store: Arc<dyn PlayerStore>,
        clock: Arc<dyn Clock>,
        default_photo_url: String,
    ) -> Self {
        Self {
            store,
            clock,
            default_photo_url,
        }
    }

    /// Opens (or re-opens) a session. Unknown players are created on the spot.
    pub async fn start_mining(
        &self,
        id: &PlayerId,
        reset: bool,
    ) -> Result<PlayerRecord, GameError> {
        let now = self.clock.now();
        let defaults = PlayerRecord::new(id.clone(), &self.default_photo_url, now);

        let committed = self
            .store
            .modify(
                id,
                Some(defaults),
                mutation(move |record| {
                    if reset {
                        record.accrued_elapsed_seconds = 0.0;
                        record.mining_state = MiningState::Idle;
                    }
                    match record.mining_state {
                        MiningState::Mining => {
                            fold_live_time(record, now);
                        }
                        MiningState::Idle => {
                            record.mining_state = MiningState::Mining;
                            record.session_started_at = Some(now);
                        }
                    }
                    record.last_updated_at = now;
                    Ok(())
                }),
            )
            .await?;

        info!(
            "⛏️  Mining started for {} (accrued {:.1}s{})",
            id,
            committed.record.accrued_elapsed_seconds,
            if reset { ", reset" } else { "" }
        );

        Ok(committed.record)
    }

    /// Read-only projection; never writes. Unknown players report idle.
    pub async fn query_status(&self, id: &PlayerId) -> Result<MiningStatus, GameError> {
        match self.store.get(id).await {
            Ok(record) => Ok(record.status(self.clock.now())),
            Err(GameError::NotFound(_)) => Ok(MiningStatus::idle()),
            Err(e) => Err(e),
        }
    }

    /// Folds live time into `accrued_elapsed_seconds` and rebases the timer.
    ///
    /// Both fields are written in the same commit. Idle players are left as is.
    pub async fn reconcile(&self, id: &PlayerId) -> Result<PlayerRecord, GameError> {
        let now = self.clock.now();

        let committed = self
            .store
            .modify(
                id,
                None,
                mutation(move |record| {
                    if record.mining_state == MiningState::Mining {
                        fold_live_time(record, now);
                        record.last_updated_at = now;
                    }
                    Ok(())
                }),
            )
            .await?;

        debug!(
            "Reconciled {}: accrued {:.1}s",
            id, committed.record.accrued_elapsed_seconds
        );

        Ok(committed.record)
    }

    /// Reconciles, then closes the session. Stopping an idle player is a no-op.
    pub async fn stop_mining(&self, id: &PlayerId) -> Result<PlayerRecord, GameError> {
        let now = self.clock.now();

        let committed = self
            .store
            .modify(
                id,
                None,
                mutation(move |record| {
                    if record.mining_state == MiningState::Mining {
                        fold_live_time(record, now);
                        record.mining_state = MiningState::Idle;
                        record.session_started_at = None;
                        record.last_updated_at = now;
                    }
                    Ok(())
                }),
            )
            .await?;

        info!(
            "🛑 Mining stopped for {} (accrued {:.1}s)",
            id, committed.record.accrued_elapsed_seconds
        );

        Ok(committed.record)
    }
}

fn fold_live_time(record: &mut PlayerRecord, now: DateTime<Utc>) {
    let Some(started) = record.session_started_at else {
        // Open session without a start marker: repair by starting the timer now.
        record.session_started_at = Some(now);
        return;
    };

    record.accrued_elapsed_seconds += seconds_between(started, now);
    // Never move the marker backwards on clock skew.
    record.session_started_at = Some(started.max(now));
}
