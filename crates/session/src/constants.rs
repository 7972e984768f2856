//! Planner API constants
//!
//! Paths are relative to the API base URL. The refresh path is also used to
//! recognise refresh calls in the gateway so they never trigger a refresh.

use std::time::Duration;

/// API base used when no configuration overrides it.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api/v1";

/// Refresh endpoint. The refresh secret travels in the `refreshToken` cookie.
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Password login.
pub const LOGIN_PATH: &str = "/user/login";

/// Link an OAuth identity to an existing account.
pub const BIND_PATH: &str = "/user/bind";

/// Create a new account linked to an OAuth identity.
pub const REGISTER_WITH_BIND_PATH: &str = "/user/registerWithBind";

/// Email a registration verification code.
pub const SEND_CODE_PATH: &str = "/user/send";

/// Username availability check, `?username=`.
pub const CHECK_USERNAME_PATH: &str = "/user/checkUsername";

/// Create a password account. Issues no credential.
pub const REGISTER_PATH: &str = "/user/register";

/// Avatar URL of the logged-in user. Needs the bearer credential.
pub const AVATAR_PATH: &str = "/auth/profiles/avatar";

/// Returns the Google authorization URL to send the user to.
pub const GOOGLE_URL_PATH: &str = "/user/google/url";

/// Client route the user is sent to when the session cannot be recovered.
pub const LOGIN_ROUTE: &str = "/login";

/// Per-request timeout for every outbound call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Interval of the proactive background refresh.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Storage key holding the serialized identity.
pub const IDENTITY_KEY: &str = "user";

/// Storage key holding the refresh secret, and the cookie name it travels under.
pub const REFRESH_COOKIE: &str = "refreshToken";
