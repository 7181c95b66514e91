//! Error types for Kino Queue

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for queue operations
pub type Result<T> = std::result::Result<T, Error>;

/// Opaque playback error attached to a single native item.
///
/// Errors travel inside snapshots, so they are cheap to clone and compare.
/// Whether an error comes from real media or from a synthetic `failed`
/// resource is not observable.
#[derive(Error, Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[error("{domain} error {code}: {message}")]
pub struct ItemError {
    /// Error domain (e.g. `"network"`, `"resource_loader"`)
    pub domain: String,
    /// Domain-specific code
    pub code: i64,
    /// Human-readable description
    pub message: String,
}

impl ItemError {
    pub fn new(domain: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            code,
            message: message.into(),
        }
    }

    /// Generic error raised by the engine while playing an item
    pub fn playback(message: impl Into<String>) -> Self {
        Self::new("playback", -1, message)
    }
}

/// Queue error types
#[derive(Error, Debug)]
pub enum Error {
    // Item errors
    #[error("Item failed: {0}")]
    Item(#[from] ItemError),

    // Content key errors
    #[error("Content key request failed: {0}")]
    ContentKey(String),

    #[error("Content key delivery unavailable in this environment")]
    ContentKeyUnavailable,

    // Session errors
    #[error("Session has been shut down")]
    SessionClosed,

    #[error("Item not found in queue: {0}")]
    ItemNotFound(String),

    #[error("Item already in queue: {0}")]
    DuplicateItem(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a content key error
    pub fn content_key(msg: impl Into<String>) -> Self {
        Error::ContentKey(msg.into())
    }

    /// Returns the error code for diagnostics
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Item(_) => "ITEM_FAILED",
            Error::ContentKey(_) => "CONTENT_KEY",
            Error::ContentKeyUnavailable => "CONTENT_KEY_UNAVAILABLE",
            Error::SessionClosed => "SESSION_CLOSED",
            Error::ItemNotFound(_) => "ITEM_NOT_FOUND",
            Error::DuplicateItem(_) => "DUPLICATE_ITEM",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::Json(_) => "JSON",
            Error::Io(_) => "IO",
        }
    }
}
