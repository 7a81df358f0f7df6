//! HTTP surface. Handlers only translate between JSON and the services.

mod error;

pub use error::ApiError;

use crate::clock::Clock;
use crate::config::Config;
use crate::error::GameError;
use crate::identity::{IdentityResolver, PhotoResolver};
use crate::ledger::PointsLedger;
use crate::mining::MiningEngine;
use crate::store::PlayerStore;
use crate::types::{MiningState, PlayerId, PlayerRecord};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

pub struct AppState {
    pub store: Arc<dyn PlayerStore>,
    pub clock: Arc<dyn Clock>,
    pub identity: IdentityResolver,
    pub photos: Arc<dyn PhotoResolver>,
    pub mining: Arc<MiningEngine>,
    pub ledger: PointsLedger,
}

impl AppState {
    pub fn new(
        config: &Config,
        store: Arc<dyn PlayerStore>,
        photos: Arc<dyn PhotoResolver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let default_photo_url = config.telegram.default_photo_url.clone();

        Self {
            identity: IdentityResolver::new(
                store.clone(),
                photos.clone(),
                clock.clone(),
                default_photo_url.clone(),
                config.telegram.timeout(),
            ),
            mining: Arc::new(MiningEngine::new(
                store.clone(),
                clock.clone(),
                default_photo_url,
            )),
            ledger: PointsLedger::new(
                store.clone(),
                clock.clone(),
                config.points.withdraw_threshold,
            ),
            photos,
            store,
            clock,
        }
    }
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/api/player", post(ingest_player))
        .route("/webhook", post(ingest_player))
        .route("/api/player/{id}", get(get_player))
        .route("/api/player/{id}/withdraw", post(withdraw))
        .route("/api/leaderboard", get(leaderboard))
        .route("/api/photo/{file_id}", get(photo))
        .route("/start_mining/{id}", post(start_mining))
        .route("/mining_status/{id}", get(mining_status))
        .route("/stop_mining/{id}", post(stop_mining))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionView {
    state: MiningState,
    accrued_elapsed_seconds: f64,
}

impl From<&PlayerRecord> for SessionView {
    fn from(record: &PlayerRecord) -> Self {
        Self {
            state: record.mining_state,
            accrued_elapsed_seconds: record.accrued_elapsed_seconds,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StartParams {
    #[serde(default)]
    reset: bool,
}

#[derive(Debug, Deserialize)]
struct LeaderboardParams {
    limit: Option<usize>,
}

fn success(message: &str, data: impl Serialize) -> Json<Value> {
    Json(json!({
        "status": "success",
        "message": message,
        "data": data,
    }))
}

fn path_id(raw: &str) -> Result<PlayerId, ApiError> {
    PlayerId::parse(raw).ok_or(ApiError(GameError::MissingIdentifier))
}

async fn health(State(app): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let players_count = app.store.count().await?;
    Ok(Json(json!({
        "status": "running",
        "playersCount": players_count,
        "timestamp": app.clock.now(),
    })))
}

/// Accepts the flat web-client shape and Telegram updates alike.
/// An unparseable body is treated like one without an id.
async fn ingest_player(
    State(app): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let payload: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let committed = app.identity.ingest(&payload).await?;

    if committed.created {
        Ok((StatusCode::CREATED, success("player created", &committed.record)))
    } else {
        Ok((StatusCode::OK, success("player updated", &committed.record)))
    }
}

async fn get_player(
    State(app): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let record = app.store.get(&path_id(&id)?).await?;
    Ok(success("player found", &record))
}

async fn withdraw(
    State(app): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let withdrawal = app.ledger.withdraw(&path_id(&id)?).await?;
    Ok(success("withdrawal completed", &withdrawal))
}

async fn leaderboard(
    State(app): State<Arc<AppState>>,
    Query(params): Query<LeaderboardParams>,
) -> Result<Json<Value>, ApiError> {
    let top = app.ledger.leaderboard(params.limit.unwrap_or(10)).await?;
    Ok(success("leaderboard", &top))
}

/// Streams a Telegram photo so the bot token stays on the server.
async fn photo(State(app): State<Arc<AppState>>, Path(file_id): Path<String>) -> Response {
    match app.photos.fetch(&file_id).await {
        Ok(file) => {
            let content_type = file
                .content_type
                .unwrap_or_else(|| "image/jpeg".to_string());
            ([(header::CONTENT_TYPE, content_type)], file.bytes).into_response()
        }
        Err(e) => {
            warn!("⚠️  Photo {} unavailable: {}", file_id, e);
            let body = json!({
                "status": "error",
                "kind": "photo_unavailable",
                "message": e.to_string(),
            });
            (StatusCode::BAD_GATEWAY, Json(body)).into_response()
        }
    }
}

async fn start_mining(
    State(app): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<StartParams>,
) -> Result<Json<Value>, ApiError> {
    let record = app.mining.start_mining(&path_id(&id)?, params.reset).await?;
    Ok(success("mining started", SessionView::from(&record)))
}

async fn mining_status(
    State(app): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let status = app.mining.query_status(&path_id(&id)?).await?;
    Ok(success("mining status", status))
}

async fn stop_mining(
    State(app): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let record = app.mining.stop_mining(&path_id(&id)?).await?;
    Ok(success("mining stopped", SessionView::from(&record)))
}
