//! Client-side session state for the planner API
//!
//! Owns everything the client remembers about a logged-in user: the
//! short-lived access credential (memory only), the identity decoded from it
//! (persisted), and the rotating refresh secret the server hands out as a
//! cookie. This crate does no request sending of its own; the gateway crate
//! drives refreshes and calls back into `SessionStore`.
//!
//! Session flow:
//! 1. Login returns an access credential → `SessionStore::begin_session()`
//! 2. Responses rotate the refresh secret → `SessionStore::apply_cookie_update()`
//! 3. A refresh returns a new credential → `SessionStore::apply_refreshed()`
//! 4. Logout or refresh failure → `SessionStore::clear_session()`
//! 5. On restart, `SessionStore::is_active_session()` reads the persisted identity

pub mod api;
pub mod claims;
pub mod constants;
pub mod cookie;
pub mod error;
pub mod oauth;
pub mod storage;
pub mod store;

pub use api::{AccessTokenData, Envelope};
pub use claims::{Identity, decode_identity};
pub use cookie::{CookieUpdate, cookie_header, refresh_cookie_update};
pub use error::{Error, Result};
pub use oauth::{BindProfile, OAuthCallback};
pub use storage::{FileStorage, MemoryStorage, Storage, StorageFuture};
pub use store::SessionStore;
