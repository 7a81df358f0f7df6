use crate::error::GameError;
use crate::mining::MiningEngine;
use crate::store::PlayerStore;
use crate::types::PlayerId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, timeout, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub listed: usize,
    pub reconciled: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
struct Backoff {
    failures: u32,
    skip_remaining: u64,
}

/// Periodic loop that folds live mining time into the store.
///
/// Players are reconciled one at a time, each under its own timeout, so a slow
/// store call for one player only costs that player its turn. A player that
/// keeps failing sits out `2^failures - 1` cycles (capped) before the retry.
pub struct Reconciler {
    engine: Arc<MiningEngine>,
    store: Arc<dyn PlayerStore>,
    tick_interval: Duration,
    op_timeout: Duration,
    max_backoff_cycles: u64,
    backoff: HashMap<PlayerId, Backoff>,
}

impl Reconciler {
    pub fn new(
        engine: Arc<MiningEngine>,
        store: Arc<dyn PlayerStore>,
        tick_interval: Duration,
        op_timeout: Duration,
        max_backoff_cycles: u64,
    ) -> Self {
        Self {
            engine,
            store,
            tick_interval,
            op_timeout,
            max_backoff_cycles,
            backoff: HashMap::new(),
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "⛏️  Reconciler started (every {}s)",
            self.tick_interval.as_secs()
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.run_cycle().await;
                    if report.listed > 0 {
                        info!(
                            "⏱️  Reconcile cycle: {} mining, {} reconciled, {} skipped, {} failed",
                            report.listed, report.reconciled, report.skipped, report.failed
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("🛑 Reconciler stopping");
                        break;
                    }
                }
            }
        }
    }

    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        let ids = match timeout(self.op_timeout, self.store.list_mining_in_progress()).await {
            Ok(Ok(ids)) => ids,
            Ok(Err(e)) => {
                warn!("❌ Could not list mining players: {}. Will retry next cycle", e);
                return report;
            }
            Err(_) => {
                warn!("❌ Listing mining players timed out. Will retry next cycle");
                return report;
            }
        };

        report.listed = ids.len();

        let open: HashSet<&PlayerId> = ids.iter().collect();
        self.backoff.retain(|id, _| open.contains(id));

        for id in &ids {
            if self.should_skip(id) {
                report.skipped += 1;
                continue;
            }

            match timeout(self.op_timeout, self.engine.reconcile(id)).await {
                Ok(Ok(_)) => {
                    self.backoff.remove(id);
                    report.reconciled += 1;
                }
                // Listed a moment ago, gone now: nothing to credit.
                Ok(Err(GameError::NotFound(_))) => {
                    self.backoff.remove(id);
                }
                Ok(Err(e)) => {
                    let skip = self.record_failure(id);
                    warn!(
                        "⚠️  Reconcile failed for {}: {} (retry in {} cycles)",
                        id, e, skip + 1
                    );
                    report.failed += 1;
                }
                Err(_) => {
                    let skip = self.record_failure(id);
                    warn!(
                        "⚠️  Reconcile timed out for {} after {:?} (retry in {} cycles)",
                        id, self.op_timeout, skip + 1
                    );
                    report.failed += 1;
                }
            }
        }

        match timeout(self.op_timeout, self.store.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("⚠️  Store flush failed: {}", e),
            Err(_) => warn!("⚠️  Store flush timed out"),
        }

        debug!("Reconcile cycle done: {:?}", report);
        report
    }

    fn should_skip(&mut self, id: &PlayerId) -> bool {
        match self.backoff.get_mut(id) {
            Some(b) if b.skip_remaining > 0 => {
                b.skip_remaining -= 1;
                true
            }
            _ => false,
        }
    }

    /// Returns how many cycles the player will sit out.
    fn record_failure(&mut self, id: &PlayerId) -> u64 {
        let entry = self.backoff.entry(id.clone()).or_default();
        entry.failures = entry.failures.saturating_add(1);

        let exponential = 1u64
            .checked_shl(entry.failures)
            .map(|v| v - 1)
            .unwrap_or(u64::MAX);
        entry.skip_remaining = exponential.min(self.max_backoff_cycles);
        entry.skip_remaining
    }
}
