use crate::types::PlayerId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GameError {
    /// The inbound payload carried no usable player id.
    #[error("player id is required")]
    MissingIdentifier,

    #[error("player not found: {0}")]
    NotFound(PlayerId),

    /// Transient backend failure. Retried by the reconciler, surfaced to API callers.
    #[error("storage unavailable during {operation}: {message}")]
    StorageUnavailable {
        operation: &'static str,
        message: String,
    },

    #[error("insufficient points: have {available}, need at least {required}")]
    InsufficientPoints { available: u64, required: u64 },
}

impl GameError {
    pub fn storage(operation: &'static str, err: impl std::fmt::Display) -> Self {
        GameError::StorageUnavailable {
            operation,
            message: err.to_string(),
        }
    }

    /// Stable machine-checkable tag used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            GameError::MissingIdentifier => "missing_identifier",
            GameError::NotFound(_) => "not_found",
            GameError::StorageUnavailable { .. } => "storage_unavailable",
            GameError::InsufficientPoints { .. } => "insufficient_points",
        }
    }
}
