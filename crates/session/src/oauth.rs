//! OAuth callback contract
//!
//! After the provider round-trip the server redirects back to the client with
//! one of three query shapes:
//!
//! - `?status=success&accessToken=...` when the provider account is linked
//! - `?bind_token=...&bindRequired=1&avatar=...&email=...` when it is not
//! - `?error=...` when the exchange failed

use std::collections::HashMap;

use url::Url;

use crate::error::{Error, Result};

/// Provider profile handed back when the account still needs linking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindProfile {
    pub bind_token: String,
    pub name: String,
    pub email: String,
    pub avatar: String,
    pub provider: String,
}

/// Parsed OAuth callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OAuthCallback {
    Authenticated { access_token: String },
    BindRequired(BindProfile),
    Failed { error: String },
    Invalid,
}

impl OAuthCallback {
    /// Parse a full callback URL.
    pub fn from_url(callback: &str) -> Result<Self> {
        let url = Url::parse(callback)
            .map_err(|e| Error::Decode(format!("invalid callback url: {e}")))?;
        Ok(Self::from_query(url.query().unwrap_or("")))
    }

    /// Parse the query string of a callback, with or without the leading `?`.
    pub fn from_query(query: &str) -> Self {
        let params: HashMap<String, String> =
            url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
                .into_owned()
                .collect();
        let get = |key: &str| params.get(key).filter(|v| !v.is_empty()).cloned();

        if let Some(error) = get("error") {
            return OAuthCallback::Failed { error };
        }

        if get("status").as_deref() == Some("success")
            && let Some(access_token) = get("accessToken")
        {
            return OAuthCallback::Authenticated { access_token };
        }

        match (get("bind_token"), get("bindRequired")) {
            (Some(bind_token), Some(_)) => OAuthCallback::BindRequired(BindProfile {
                bind_token,
                name: get("name").unwrap_or_default(),
                email: get("email").unwrap_or_default(),
                avatar: get("avatar").unwrap_or_default(),
                provider: get("provider").unwrap_or_else(|| "thirdparty".to_string()),
            }),
            _ => OAuthCallback::Invalid,
        }
    }
}
