//! Error types for gateway and session flow operations

/// Errors surfaced to callers of the gateway and session manager.
///
/// Payloads are strings so one refresh failure can be handed to every
/// request that was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// 401 that the refresh protocol could not recover.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    /// The session was replaced or ended while the request waited on a refresh.
    #[error("session ended during token refresh")]
    SessionEnded,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("decode error: {0}")]
    Decode(String),

    /// Non-zero `code` from an auth endpoint, carrying the server's message.
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("oauth callback failed: {0}")]
    OAuth(String),

    #[error("session store error: {0}")]
    Session(String),
}

impl From<session::Error> for Error {
    fn from(e: session::Error) -> Self {
        match e {
            session::Error::Decode(msg) => Error::Decode(msg),
            other => Error::Session(other.to_string()),
        }
    }
}

/// Result alias for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;
