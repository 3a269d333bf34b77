//! Error types for review-loader

use thiserror::Error;

/// Result type alias for review-loader operations
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Main error type for review-loader
#[derive(Error, Debug)]
pub enum LoaderError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Document store error that escaped per-document handling
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Metrics error
    #[error("metrics error: {0}")]
    Metrics(String),

    /// Run stopped before completion
    #[error("run aborted: {0}")]
    Aborted(String),
}

impl From<serde_json::Error> for LoaderError {
    fn from(err: serde_json::Error) -> Self {
        LoaderError::Serialization(err.to_string())
    }
}

/// Error type for document store operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Client could not be constructed
    #[error("initialization failed: {0}")]
    Init(String),

    /// Connection refused, reset or lost mid-request
    #[error("connection error: {0}")]
    Connection(String),

    /// Request exceeded its deadline
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Store answered with a non-success status
    #[error("store returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Response body could not be interpreted
    #[error("malformed response: {0}")]
    Decode(String),

    /// Request body could not be built
    #[error("request encoding failed: {0}")]
    Encode(String),
}

impl StoreError {
    /// Whether resubmitting the same request may succeed.
    ///
    /// Bulk writes are idempotent upserts, so an undecodable response is
    /// treated as transient as well.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Connection(_) | StoreError::Timeout(_) | StoreError::Decode(_) => true,
            StoreError::Http { status, .. } => *status == 429 || *status >= 500,
            StoreError::Init(_) | StoreError::Encode(_) => false,
        }
    }
}

/// Reasons a raw record cannot become a document
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Required field absent or empty
    #[error("missing required field '{0}'")]
    Missing(&'static str),

    /// Field present but not parseable
    #[error("field '{field}' has invalid value '{value}'")]
    Invalid { field: &'static str, value: String },

    /// Field parsed but outside its allowed range
    #[error("field '{field}' out of range: {value}")]
    OutOfRange { field: &'static str, value: String },
}
