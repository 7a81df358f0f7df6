use crate::config::TelegramConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Why a file reference could not be turned into a URL or downloaded.
///
/// The identity resolver recovers from every variant; the photo route maps
/// them to a gateway error.
#[derive(Debug, Error)]
pub enum PhotoError {
    #[error("bot token is not configured")]
    MissingToken,
    #[error("telegram request failed: {0}")]
    Request(String),
    #[error("getFile returned no file path")]
    NoFilePath,
}

/// Downloaded photo bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoFile {
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait PhotoResolver: Send + Sync {
    /// Turn an opaque file reference into a URL that is safe to hand to clients.
    async fn resolve(&self, file_id: &str) -> Result<String, PhotoError>;

    /// Download the file behind a reference, server side.
    async fn fetch(&self, file_id: &str) -> Result<PhotoFile, PhotoError>;
}

#[derive(Debug, Deserialize)]
struct GetFileResponse {
    ok: bool,
    result: Option<TelegramFile>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramFile {
    file_path: Option<String>,
}

/// Resolves photos through the Bot API `getFile` method.
///
/// Download URLs embed the bot token, so they never leave this type: clients
/// get `{proxy_url}/{file_id}` and the photo route calls [`PhotoResolver::fetch`].
#[derive(Clone)]
pub struct TelegramPhotoResolver {
    api_url: String,
    bot_token: Option<String>,
    proxy_url: String,
    client: reqwest::Client,
}

impl TelegramPhotoResolver {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone().filter(|t| !t.trim().is_empty()),
            proxy_url: config.photo_proxy_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn token(&self) -> Result<&str, PhotoError> {
        self.bot_token.as_deref().ok_or(PhotoError::MissingToken)
    }

    async fn file_path(&self, file_id: &str) -> Result<String, PhotoError> {
        let url = format!(
            "{}/bot{}/getFile?file_id={}",
            self.api_url,
            self.token()?,
            urlencoding::encode(file_id)
        );

        debug!("📡 Resolving Telegram file {}", file_id);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PhotoError::Request(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PhotoError::Request(format!("HTTP {}", status)));
        }

        let body: GetFileResponse = response
            .json()
            .await
            .map_err(|e| PhotoError::Request(e.without_url().to_string()))?;

        if !body.ok {
            return Err(PhotoError::Request(
                body.description.unwrap_or_else(|| "ok: false".to_string()),
            ));
        }

        body.result
            .and_then(|f| f.file_path)
            .filter(|p| !p.is_empty())
            .ok_or(PhotoError::NoFilePath)
    }
}

#[async_trait]
impl PhotoResolver for TelegramPhotoResolver {
    async fn resolve(&self, file_id: &str) -> Result<String, PhotoError> {
        // Only confirms the file exists; the path itself is fetched again on download.
        self.file_path(file_id).await?;
        Ok(format!("{}/{}", self.proxy_url, urlencoding::encode(file_id)))
    }

    async fn fetch(&self, file_id: &str) -> Result<PhotoFile, PhotoError> {
        let file_path = self.file_path(file_id).await?;
        let url = format!("{}/file/bot{}/{}", self.api_url, self.token()?, file_path);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PhotoError::Request(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PhotoError::Request(format!("HTTP {}", status)));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| PhotoError::Request(e.without_url().to_string()))?;

        Ok(PhotoFile {
            content_type,
            bytes: bytes.to_vec(),
        })
    }
}
