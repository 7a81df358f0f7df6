use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod api;
mod clock;
mod config;
mod daemon;
mod error;
mod identity;
mod ledger;
mod mining;
mod store;
mod types;

use crate::config::Config;
use crate::daemon::GameDaemon;

#[derive(Debug, Parser)]
#[command(name = "minqx-daemon", version, about = "MINQX player and mining backend")]
struct Cli {
    /// Config file (default: ~/.minqx/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override server.bind, e.g. 127.0.0.1:8080
    #[arg(long)]
    bind: Option<String>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,

    /// Write the effective configuration to the config path if no file exists yet
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("minqx_daemon=debug,info")),
        )
        .init();

    let cli = Cli::parse();

    info!("🚀 MINQX daemon v{} starting...", env!("CARGO_PKG_VERSION"));

    // ========================================
    // Phase 1: Configuration
    // ========================================
    info!("📝 Phase 1: Configuration");

    let config_path = cli.config.clone().unwrap_or_else(Config::config_path);
    let mut config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!("❌ Failed to load configuration from {:?}: {:#}", config_path, e);
            return Err(e);
        }
    };

    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }

    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    if cli.init_config {
        if config_path.exists() {
            info!("Config already exists at {:?}, leaving it untouched", config_path);
        } else {
            config.save(&config_path)?;
            info!("✅ Configuration written to {:?}", config_path);
        }
    }

    info!("  Bind: {}", config.server.bind);
    info!("  Storage: {:?}", config.storage.backend);
    info!("  Reconcile interval: {}s", config.mining.reconcile_interval_secs);
    info!("  Withdraw threshold: {}", config.points.withdraw_threshold);

    // ========================================
    // Phase 2: Storage & services
    // ========================================
    info!("🗄️  Phase 2: Storage");

    let daemon = match GameDaemon::new(config) {
        Ok(d) => d,
        Err(e) => {
            error!("❌ Failed to initialize daemon: {:#}", e);
            return Err(e);
        }
    };
    info!("✓ Daemon initialized");

    // ========================================
    // Phase 3: Serve
    // ========================================
    info!("🎮 Phase 3: API and reconciliation loop");
    daemon.run().await?;

    info!("👋 MINQX daemon stopped");
    Ok(())
}
