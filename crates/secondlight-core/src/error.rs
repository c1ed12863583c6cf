//! Crate-wide error type.
//!
//! Layers above core either use [`Error`] directly or wrap it (the analysis
//! crate's `AnalysisError`, the API's `ApiError`). HTTP status mapping lives
//! with those wrappers, not here.

use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // --- storage -----------------------------------------------------------
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // --- lookups and lifecycle --------------------------------------------
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(Uuid),

    /// A status write that the document state machine does not allow, such
    /// as leaving `completed` or `failed`.
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    // --- callers ----------------------------------------------------------
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The subscription has no reports left or is not active.
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    // --- pipeline ---------------------------------------------------------
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// The Analysis Service failed or answered with something unusable.
    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Request error: {0}")]
    Request(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error means the thing asked for does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::DocumentNotFound(_)
                | Error::Database(sqlx::Error::RowNotFound)
        )
    }

    /// Whether repeating the same call cannot succeed: the target is gone or
    /// the caller's credentials were rejected.
    pub fn is_fatal(&self) -> bool {
        self.is_not_found() || matches!(self, Error::Unauthorized(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
