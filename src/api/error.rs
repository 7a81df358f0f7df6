use crate::error::GameError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

/// Maps domain errors onto HTTP statuses with a stable `kind` tag.
#[derive(Debug)]
pub struct ApiError(pub GameError);

impl From<GameError> for ApiError {
    fn from(e: GameError) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            GameError::MissingIdentifier | GameError::InsufficientPoints { .. } => {
                StatusCode::BAD_REQUEST
            }
            GameError::NotFound(_) => StatusCode::NOT_FOUND,
            GameError::StorageUnavailable { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Backend details stay in the log.
        let message = match &self.0 {
            GameError::StorageUnavailable { .. } => {
                error!("❌ {}", self.0);
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = json!({
            "status": "error",
            "kind": self.0.kind(),
            "message": message,
        });

        (status, Json(body)).into_response()
    }
}
