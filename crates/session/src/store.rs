//! Session State Store
//!
//! Holds the two halves of a session:
//!
//! - the access credential, in memory only, so a restart always needs a
//!   refresh exchange to obtain a new one
//! - the identity, persisted under the `user` key so a restart can resume
//!
//! The identity, not the credential, decides whether the user is logged in.
//! After a restart the identity is still there and the first request (or
//! scheduler tick) silently refreshes the credential.
//!
//! Every operation that replaces or ends a session bumps the session epoch.
//! A refresh captures the epoch when it starts and only applies its result
//! while the epoch is unchanged, so a refresh landing after logout cannot
//! resurrect the session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use common::Secret;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::claims::{Identity, decode_identity};
use crate::constants::{IDENTITY_KEY, REFRESH_COOKIE};
use crate::cookie::CookieUpdate;
use crate::error::{Error, Result};
use crate::storage::Storage;

/// Literal values older clients wrote for "no identity".
const ABSENT_SENTINELS: &[&str] = &["undefined", "null"];

/// Session state shared by the gateway, scheduler and session flows.
pub struct SessionStore {
    storage: Arc<dyn Storage>,
    access: RwLock<Option<Secret<String>>>,
    epoch: AtomicU64,
    /// Serializes session transitions so an epoch check and the write it
    /// guards cannot interleave with a logout.
    transition: Mutex<()>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            access: RwLock::new(None),
            epoch: AtomicU64::new(0),
            transition: Mutex::new(()),
        }
    }

    /// Replace the in-memory access credential.
    pub fn set_access_credential(&self, token: impl Into<Secret<String>>) {
        *self.access.write().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
    }

    /// Current access credential, if any.
    pub fn access_credential(&self) -> Option<Secret<String>> {
        self.access
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear_access_credential(&self) {
        *self.access.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Persist the identity, overwriting any previous one.
    pub async fn set_identity(&self, identity: &Identity) -> Result<()> {
        let json = serde_json::to_string(identity)
            .map_err(|e| Error::Storage(format!("serializing identity: {e}")))?;
        self.storage.set(IDENTITY_KEY, json).await
    }

    /// The persisted identity. Missing, sentinel and malformed values all
    /// read as `None`.
    pub async fn identity(&self) -> Option<Identity> {
        match self.stored_identity().await {
            Ok(identity) => identity,
            Err(e) => {
                debug!(error = %e, "stored identity unreadable, treating as logged out");
                None
            }
        }
    }

    async fn stored_identity(&self) -> Result<Option<Identity>> {
        let Some(raw) = self.storage.get(IDENTITY_KEY).await else {
            return Ok(None);
        };
        if raw.is_empty() || ABSENT_SENTINELS.contains(&raw.as_str()) {
            return Ok(None);
        }
        serde_json::from_str::<Identity>(&raw)
            .map(Some)
            .map_err(|e| Error::Decode(format!("stored identity: {e}")))
    }

    pub async fn clear_identity(&self) -> Result<()> {
        self.storage.remove(IDENTITY_KEY).await
    }

    /// True iff a persisted identity exists.
    pub async fn is_active_session(&self) -> bool {
        self.identity().await.is_some()
    }

    /// Current session epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Start a session from a freshly issued access credential.
    ///
    /// The identity is decoded first; a credential that does not decode is
    /// rejected and the store is left untouched.
    pub async fn begin_session(&self, token: &str) -> Result<Identity> {
        let identity = decode_identity(token)?;
        let _guard = self.transition.lock().await;
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.set_access_credential(token);
        self.set_identity(&identity).await?;
        info!(user_id = identity.user_id, username = %identity.username, "session started");
        Ok(identity)
    }

    /// Store a refreshed credential if the session has not changed since
    /// `epoch` was captured.
    ///
    /// Returns `false` when the result is stale and was discarded.
    pub async fn apply_refreshed(&self, token: &str, epoch: u64) -> Result<bool> {
        let _guard = self.transition.lock().await;
        if self.epoch() != epoch {
            debug!(
                captured = epoch,
                current = self.epoch(),
                "discarding refresh result from an earlier session"
            );
            return Ok(false);
        }
        self.set_access_credential(token);
        match decode_identity(token) {
            Ok(identity) => self.set_identity(&identity).await?,
            Err(e) => warn!(error = %e, "refreshed credential carries no readable identity"),
        }
        Ok(true)
    }

    /// Drop the credential, the identity and the refresh secret.
    ///
    /// The in-memory credential is cleared even when storage fails.
    pub async fn clear_session(&self) -> Result<()> {
        let _guard = self.transition.lock().await;
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.clear_access_credential();
        let identity = self.clear_identity().await;
        let cookie = self.clear_refresh_cookie().await;
        info!("session cleared");
        identity.and(cookie)
    }

    /// Persisted refresh secret, if the server has issued one.
    pub async fn refresh_cookie(&self) -> Option<Secret<String>> {
        self.storage
            .get(REFRESH_COOKIE)
            .await
            .filter(|v| !v.is_empty())
            .map(Secret::new)
    }

    pub async fn set_refresh_cookie(&self, value: &str) -> Result<()> {
        self.storage.set(REFRESH_COOKIE, value.to_string()).await
    }

    pub async fn clear_refresh_cookie(&self) -> Result<()> {
        self.storage.remove(REFRESH_COOKIE).await
    }

    /// Apply a `Set-Cookie` rotation observed on a response.
    pub async fn apply_cookie_update(&self, update: CookieUpdate) -> Result<()> {
        match update {
            CookieUpdate::Set(value) => {
                debug!("refresh cookie rotated");
                self.set_refresh_cookie(&value).await
            }
            CookieUpdate::Clear => {
                debug!("refresh cookie revoked by server");
                self.clear_refresh_cookie().await
            }
        }
    }
}
