use crate::types::{ComplaintId, Version};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SlaError {
    #[error("Complaint '{id}' not found")]
    NotFound { id: ComplaintId },

    #[error("Invalid transition for complaint '{id}': {reason}")]
    InvalidTransition { id: ComplaintId, reason: String },

    #[error("Concurrent update on complaint '{id}': expected version {expected}, found {found}")]
    ConcurrencyConflict {
        id: ComplaintId,
        expected: Version,
        found: Version,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Corrupt record for complaint '{id}': {reason}")]
    CorruptRecord { id: ComplaintId, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SlaError {
    pub fn invalid_transition(id: &str, reason: impl Into<String>) -> Self {
        SlaError::InvalidTransition {
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    /// True for stale-version write rejections.
    pub fn is_conflict(&self) -> bool {
        matches!(self, SlaError::ConcurrencyConflict { .. })
    }
}

pub type SlaResult<T> = Result<T, SlaError>;
