use crate::clock::Clock;
use crate::error::GameError;
use crate::store::{mutation, PlayerStore};
use crate::types::{PlayerId, PlayerRecord};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

pub const MAX_LEADERBOARD_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Withdrawal {
    pub withdrawn: u64,
    pub player: PlayerRecord,
}

/// Points balance operations.
pub struct PointsLedger {
    store: Arc<dyn PlayerStore>,
    clock: Arc<dyn Clock>,
    withdraw_threshold: u64,
}

impl PointsLedger {
    pub fn new(
        store: Arc<dyn PlayerStore>,
        clock: Arc<dyn Clock>,
        withdraw_threshold: u64,
    ) -> Self {
        Self {
            store,
            clock,
            withdraw_threshold,
        }
    }

    /// Withdraws the whole balance once it reaches the threshold.
    ///
    /// Below the threshold nothing is written and `InsufficientPoints` is returned.
    pub async fn withdraw(&self, id: &PlayerId) -> Result<Withdrawal, GameError> {
        let now = self.clock.now();
        let threshold = self.withdraw_threshold;

        let committed = self
            .store
            .modify(
                id,
                None,
                mutation(move |record| {
                    if record.points < threshold {
                        return Err(GameError::InsufficientPoints {
                            available: record.points,
                            required: threshold,
                        });
                    }
                    record.points = 0;
                    record.last_updated_at = now;
                    Ok(())
                }),
            )
            .await?;

        let withdrawn = committed.previous.as_ref().map_or(0, |before| before.points);
        info!("💸 Player {} withdrew {} points", id, withdrawn);

        Ok(Withdrawal {
            withdrawn,
            player: committed.record,
        })
    }

    pub async fn leaderboard(&self, limit: usize) -> Result<Vec<PlayerRecord>, GameError> {
        self.store
            .top_by_points(limit.clamp(1, MAX_LEADERBOARD_SIZE))
            .await
    }
}
