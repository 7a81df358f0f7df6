use crate::api::{self, AppState};
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, StorageBackend, StorageConfig};
use crate::identity::TelegramPhotoResolver;
use crate::mining::Reconciler;
use crate::store::{MemoryStore, PlayerStore, SqliteStore};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

pub struct GameDaemon {
    config: Config,
    store: Arc<dyn PlayerStore>,
    state: Arc<AppState>,
}

impl GameDaemon {
    pub fn new(config: Config) -> Result<Self> {
        let store = open_store(&config.storage)?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let photos = TelegramPhotoResolver::new(&config.telegram)?;
        if config.telegram.bot_token.is_none() {
            warn!("⚠️  No bot token configured - Telegram photos will use the default avatar");
        }

        let state = Arc::new(AppState::new(&config, store.clone(), Arc::new(photos), clock));

        Ok(Self {
            config,
            store,
            state,
        })
    }

    /// Serves the API and runs the reconciler until Ctrl-C, then flushes the store.
    pub async fn run(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Spawn reconciliation loop
        let reconciler = Reconciler::new(
            self.state.mining.clone(),
            self.store.clone(),
            self.config.mining.reconcile_interval(),
            self.config.mining.operation_timeout(),
            self.config.mining.max_backoff_cycles,
        );
        let reconciler_handle = tokio::spawn(reconciler.run(shutdown_rx.clone()));

        // Ctrl-C flips the shutdown flag for every task
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("🛑 Shutdown signal received"),
                Err(e) => error!("❌ Failed to listen for shutdown signal: {}", e),
            }
            let _ = shutdown_tx.send(true);
        });

        let listener = TcpListener::bind(&self.config.server.bind)
            .await
            .with_context(|| format!("Failed to bind {}", self.config.server.bind))?;
        info!("🚀 HTTP API listening on {}", self.config.server.bind);

        let app = api::routes().with_state(self.state.clone());
        axum::serve(listener, app)
            .with_graceful_shutdown(wait_for_shutdown(shutdown_rx))
            .await
            .context("HTTP server error")?;

        if let Err(e) = reconciler_handle.await {
            error!("❌ Reconciler task failed: {}", e);
        }

        self.store
            .flush()
            .await
            .context("Failed to flush player store on shutdown")?;
        info!("💾 Player store flushed");

        Ok(())
    }
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}

pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn PlayerStore>> {
    match (config.backend, &config.path) {
        (StorageBackend::Memory, None) => {
            warn!("⚠️  In-memory store without snapshot - player data is lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
        (StorageBackend::Memory, Some(path)) => {
            info!("📂 In-memory store with snapshot {:?}", path);
            Ok(Arc::new(MemoryStore::with_snapshot(path)?))
        }
        (StorageBackend::Sqlite, path) => {
            let path = path
                .clone()
                .unwrap_or_else(|| Config::data_dir().join("players.db"));
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir).context("Failed to create database directory")?;
            }
            info!("🗄️  SQLite store at {:?}", path);
            Ok(Arc::new(SqliteStore::open(&path)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PlayerId, PlayerPatch, PlayerRecord};
    use chrono::Utc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_open_sqlite_store_creates_directories() {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            backend: StorageBackend::Sqlite,
            path: Some(dir.path().join("data").join("players.db")),
        };

        let store = open_store(&config).unwrap();
        let id = PlayerId::from(1);
        let defaults = PlayerRecord::new(id.clone(), "x", Utc::now());
        store
            .upsert_patch(&id, PlayerPatch::default(), defaults, Utc::now())
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_memory_snapshot_store_on_fresh_install() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fresh").join("players.json");
        let config = StorageConfig {
            backend: StorageBackend::Memory,
            path: Some(path.clone()),
        };

        let store = open_store(&config).unwrap();
        store.flush().await.unwrap();
        assert!(path.exists());
    }
}
