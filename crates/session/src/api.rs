//! Planner API response envelope
//!
//! Every endpoint answers `{ "code": 0, "message": "...", "data": ... }`.
//! A handful of handlers put their payload at the top level instead
//! (`{"code":0,"url":...}`), so unknown fields are kept in `extra`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Success code shared by all endpoints.
pub const SUCCESS_CODE: i64 = 0;

/// Generic response envelope.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Envelope<T> {
    pub code: i64,
    /// User-facing message. The refresh handler spells it `msg`.
    #[serde(default, alias = "msg", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Payload of login, bind, register-with-bind and refresh responses.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccessTokenData {
    #[serde(rename = "accessToken")]
    pub access_token: String,
}

impl<T> Envelope<T> {
    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }

    /// A top-level string field outside `data`, e.g. `url`.
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(|v| v.as_str())
    }

    /// The message, or `fallback` when the server sent none.
    pub fn message_or(&self, fallback: &str) -> String {
        self.message
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or(fallback)
            .to_string()
    }
}

impl Envelope<AccessTokenData> {
    /// `data.accessToken`, falling back to a top-level `accessToken`.
    /// Empty strings count as absent.
    pub fn access_token(&self) -> Option<&str> {
        self.data
            .as_ref()
            .map(|d| d.access_token.as_str())
            .or_else(|| self.extra_str("accessToken"))
            .filter(|t| !t.is_empty())
    }
}
