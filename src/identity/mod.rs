pub mod payload;
pub mod photo;

pub use payload::{normalize, PhotoRef};
pub use photo::{PhotoResolver, TelegramPhotoResolver};

use crate::clock::Clock;
use crate::error::GameError;
use crate::store::{Committed, PlayerStore};
use crate::types::{PlayerId, PlayerPatch, PlayerRecord};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

/// Turns inbound identity payloads into player upserts.
pub struct IdentityResolver {
    store: Arc<dyn PlayerStore>,
    photos: Arc<dyn PhotoResolver>,
    clock: Arc<dyn Clock>,
    default_photo_url: String,
    photo_timeout: Duration,
}

impl IdentityResolver {
    pub fn new(
        store: Arc<dyn PlayerStore>,
        photos: Arc<dyn PhotoResolver>,
        clock: Arc<dyn Clock>,
        default_photo_url: String,
        photo_timeout: Duration,
    ) -> Self {
        Self {
            store,
            photos,
            clock,
            default_photo_url,
            photo_timeout,
        }
    }

    /// Normalize, resolve the photo, upsert.
    ///
    /// Fields the payload leaves out keep their stored values; a new player
    /// starts from `Player_<id>`, the default photo and zero points.
    pub async fn ingest(&self, payload: &Value) -> Result<Committed, GameError> {
        let identity = normalize(payload)?;
        let photo_url = self.resolve_photo(&identity.id, identity.photo).await;

        let patch = PlayerPatch {
            display_name: identity.name,
            photo_url,
            points: identity.points,
        };

        let now = self.clock.now();
        let defaults = PlayerRecord::new(identity.id.clone(), &self.default_photo_url, now);
        let committed = self
            .store
            .upsert_patch(&identity.id, patch, defaults, now)
            .await?;

        info!(
            "👤 Player {} {} ({})",
            committed.record.id,
            if committed.created { "created" } else { "updated" },
            committed.record.display_name
        );

        Ok(committed)
    }

    /// `None` means "no usable photo in this payload".
    async fn resolve_photo(&self, id: &PlayerId, photo: PhotoRef) -> Option<String> {
        let file_id = match photo {
            PhotoRef::Absent => return None,
            PhotoRef::Url(url) => return Some(url),
            PhotoRef::FileId(file_id) => file_id,
        };

        match timeout(self.photo_timeout, self.photos.resolve(&file_id)).await {
            Ok(Ok(url)) if !url.trim().is_empty() => Some(url),
            Ok(Ok(_)) => {
                warn!("⚠️  Empty photo URL for player {}, keeping default", id);
                None
            }
            Ok(Err(e)) => {
                warn!("⚠️  Photo resolution failed for player {}: {}", id, e);
                None
            }
            Err(_) => {
                warn!(
                    "⚠️  Photo resolution timed out for player {} after {:?}",
                    id, self.photo_timeout
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::photo::{PhotoError, PhotoFile};
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use crate::types::MiningState;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    const DEFAULT_PHOTO: &str = "https://example.com/default_avatar.jpg";

    enum StubPhotos {
        Resolves(&'static str),
        Empty,
        Fails,
        Hangs,
    }

    #[async_trait]
    impl PhotoResolver for StubPhotos {
        async fn resolve(&self, file_id: &str) -> Result<String, PhotoError> {
            match self {
                StubPhotos::Resolves(base) => Ok(format!("{}/{}", base, file_id)),
                StubPhotos::Empty => Ok(String::new()),
                StubPhotos::Fails => Err(PhotoError::NoFilePath),
                StubPhotos::Hangs => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok("https://never".to_string())
                }
            }
        }

        async fn fetch(&self, _file_id: &str) -> Result<PhotoFile, PhotoError> {
            Err(PhotoError::NoFilePath)
        }
    }

    fn setup(photos: StubPhotos) -> (IdentityResolver, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 11, 1, 12, 0, 0).unwrap(),
        ));
        let resolver = IdentityResolver::new(
            store.clone(),
            Arc::new(photos),
            clock.clone(),
            DEFAULT_PHOTO.to_string(),
            Duration::from_millis(50),
        );
        (resolver, store, clock)
    }

    #[tokio::test]
    async fn test_webhook_without_photo_gets_defaults() {
        let (resolver, _, _) = setup(StubPhotos::Fails);

        let committed = resolver
            .ingest(&json!({"from": {"id": 42, "first_name": "Aya"}}))
            .await
            .unwrap();

        let record = committed.record;
        assert!(committed.created);
        assert_eq!(record.id, PlayerId::from(42));
        assert_eq!(record.display_name, "Aya");
        assert_eq!(record.photo_url, DEFAULT_PHOTO);
        assert_eq!(record.points, 0);
        assert_eq!(record.mining_state, MiningState::Idle);
    }

    #[tokio::test]
    async fn test_repeated_upsert_is_idempotent() {
        let (resolver, _, clock) = setup(StubPhotos::Fails);
        let payload = json!({
            "id": 42,
            "name": "Aya",
            "imageUrl": "https://cdn.example.com/aya.png"
        });

        let first = resolver.ingest(&payload).await.unwrap().record;
        clock.advance(chrono::Duration::seconds(5));
        let second = resolver.ingest(&payload).await.unwrap();

        assert!(!second.created);
        assert!(second.record.last_updated_at > first.last_updated_at);
        assert_eq!(
            PlayerRecord {
                last_updated_at: first.last_updated_at,
                ..second.record
            },
            first
        );
    }

    #[tokio::test]
    async fn test_file_reference_is_resolved() {
        let (resolver, _, _) = setup(StubPhotos::Resolves("https://files.test"));

        let record = resolver
            .ingest(&json!({"message": {"from": {"id": 5}, "photo": [{"file_id": "abc"}]}}))
            .await
            .unwrap()
            .record;

        assert_eq!(record.photo_url, "https://files.test/abc");
        assert_eq!(record.display_name, "Player_5");
    }

    #[tokio::test]
    async fn test_photo_failures_fall_back_to_default() {
        for photos in [StubPhotos::Fails, StubPhotos::Hangs, StubPhotos::Empty] {
            let (resolver, _, _) = setup(photos);
            let record = resolver
                .ingest(&json!({"from": {"id": 8}, "photo": [{"file_id": "abc"}]}))
                .await
                .unwrap()
                .record;
            assert_eq!(record.photo_url, DEFAULT_PHOTO);
        }

        let (resolver, _, _) = setup(StubPhotos::Fails);
        let record = resolver
            .ingest(&json!({"id": 9, "imageUrl": "opaque-ref"}))
            .await
            .unwrap()
            .record;
        assert_eq!(record.photo_url, DEFAULT_PHOTO);
    }

    #[tokio::test]
    async fn test_failed_resolution_keeps_cached_photo() {
        let (resolver, store, _) = setup(StubPhotos::Fails);
        resolver
            .ingest(&json!({"id": 11, "imageUrl": "https://cdn.example.com/cached.png"}))
            .await
            .unwrap();

        resolver
            .ingest(&json!({"from": {"id": 11}, "photo": [{"file_id": "fresh"}]}))
            .await
            .unwrap();

        let record = store.get(&PlayerId::from(11)).await.unwrap();
        assert_eq!(record.photo_url, "https://cdn.example.com/cached.png");
    }

    #[tokio::test]
    async fn test_missing_identifier_is_rejected() {
        let (resolver, store, _) = setup(StubPhotos::Fails);
        let err = resolver.ingest(&json!({"name": "ghost"})).await.unwrap_err();
        assert_eq!(err, GameError::MissingIdentifier);
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
