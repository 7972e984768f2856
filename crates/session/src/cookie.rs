//! Refresh secret transport
//!
//! The server keeps the long-lived refresh secret in an HttpOnly
//! `refreshToken` cookie and rotates it on login, account binding and every
//! refresh. There is no browser here, so the client picks rotations out of
//! `Set-Cookie` and sends the value back itself on refresh calls.

use cookie::Cookie;
use reqwest::header::{HeaderMap, HeaderValue, SET_COOKIE};
use tracing::{debug, warn};

use crate::constants::REFRESH_COOKIE;

/// What a response asked us to do with the refresh cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieUpdate {
    Set(String),
    Clear,
}

/// Find the last `refreshToken` directive among the `Set-Cookie` headers.
///
/// An empty value or a non-positive `Max-Age` means the server revoked it.
pub fn refresh_cookie_update(headers: &HeaderMap) -> Option<CookieUpdate> {
    let mut update = None;
    for value in headers.get_all(SET_COOKIE) {
        let Ok(raw) = value.to_str() else {
            warn!("ignoring non-ascii Set-Cookie header");
            continue;
        };
        let parsed = match Cookie::parse(raw) {
            Ok(c) => c,
            Err(e) => {
                debug!(error = %e, "ignoring unparseable Set-Cookie header");
                continue;
            }
        };
        if parsed.name() != REFRESH_COOKIE {
            continue;
        }
        let expired = parsed
            .max_age()
            .is_some_and(|max_age| max_age.is_zero() || max_age.is_negative());
        update = if parsed.value().is_empty() || expired {
            Some(CookieUpdate::Clear)
        } else {
            Some(CookieUpdate::Set(parsed.value().to_string()))
        };
    }
    update
}

/// Render the `Cookie` request header carrying the refresh secret.
pub fn cookie_header(value: &str) -> Option<HeaderValue> {
    let rendered = Cookie::new(REFRESH_COOKIE, value).to_string();
    HeaderValue::from_str(&rendered).ok()
}
