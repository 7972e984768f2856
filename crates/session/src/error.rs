//! Error types for session state operations

/// Errors from session state operations.
///
/// Payloads are strings so the error stays `Clone`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("decode error: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("storage format error: {0}")]
    Storage(String),
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;
