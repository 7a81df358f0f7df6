use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub mining: MiningConfig,
    pub telegram: TelegramConfig,
    pub points: PointsConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local map, optionally snapshotted to a JSON file.
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Snapshot file (memory) or database file (sqlite).
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MiningConfig {
    pub reconcile_interval_secs: u64,
    pub operation_timeout_secs: u64,
    pub max_backoff_cycles: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Never written back out by `save` or `--print-config`.
    #[serde(skip_serializing)]
    pub bot_token: Option<String>,
    pub api_url: String,
    pub timeout_secs: u64,
    pub default_photo_url: String,
    /// Prefix of the photo route clients fetch resolved Telegram photos from.
    pub photo_proxy_url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PointsConfig {
    pub withdraw_threshold: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
        }
    }
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: 60,
            operation_timeout_secs: 5,
            max_backoff_cycles: 8,
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            api_url: "https://api.telegram.org".to_string(),
            timeout_secs: 5,
            default_photo_url: "https://example.com/default_avatar.jpg".to_string(),
            photo_proxy_url: "/api/photo".to_string(),
        }
    }
}

impl Default for PointsConfig {
    fn default() -> Self {
        Self {
            withdraw_threshold: 1000,
        }
    }
}

impl MiningConfig {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

impl TelegramConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Reads `path` (if present) and layers `MINQX__SECTION__KEY` env vars on top.
    ///
    /// The bot token falls back to `BOT_TOKEN`, which is what the bot deployments set.
    pub fn load(path: &Path) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                ::config::Environment::with_prefix("MINQX")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {:?}", path))?;

        let mut config: Config = settings
            .try_deserialize()
            .context("Failed to parse configuration")?;

        if config.telegram.bot_token.is_none() {
            config.telegram.bot_token = std::env::var("BOT_TOKEN").ok().filter(|t| !t.is_empty());
        }

        config.validate()?;
        Ok(config)
    }

    pub fn config_path() -> PathBuf {
        Self::data_dir().join("config.toml")
    }

    pub fn data_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".minqx")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }

        fs::write(path, self.to_toml()?).context("Failed to write config file")?;

        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    fn validate(&self) -> Result<()> {
        if self.mining.reconcile_interval_secs == 0 {
            anyhow::bail!("mining.reconcile_interval_secs must be greater than zero");
        }
        if self.mining.operation_timeout_secs == 0 {
            anyhow::bail!("mining.operation_timeout_secs must be greater than zero");
        }
        if self.telegram.timeout_secs == 0 {
            anyhow::bail!("telegram.timeout_secs must be greater than zero");
        }
        if self.telegram.default_photo_url.trim().is_empty() {
            anyhow::bail!("telegram.default_photo_url must not be empty");
        }
        if self.telegram.photo_proxy_url.trim().is_empty() {
            anyhow::bail!("telegram.photo_proxy_url must not be empty");
        }
        Ok(())
    }
}
