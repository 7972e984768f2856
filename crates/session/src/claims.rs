//! Identity claims carried by the access credential
//!
//! The access credential is a three-segment signed token. The middle segment
//! is base64url JSON with at least `userId`, `username` and `role`. The client
//! only reads it; signature verification belongs to the server.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Decoded user attributes, persisted so a reload can resume the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(rename = "userId")]
    pub user_id: i64,
    pub username: String,
    pub role: String,
}

/// Decode the identity claims from an access credential.
///
/// Padded payloads are accepted even though well-formed tokens never carry
/// padding.
pub fn decode_identity(token: &str) -> Result<Identity> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(Error::Decode(format!(
            "expected 3 token segments, got {}",
            segments.len()
        )));
    }

    let payload = URL_SAFE_NO_PAD
        .decode(segments[1].trim_end_matches('='))
        .map_err(|e| Error::Decode(format!("payload is not base64url: {e}")))?;

    serde_json::from_slice::<Identity>(&payload)
        .map_err(|e| Error::Decode(format!("payload is not an identity: {e}")))
}
