//! Session flows
//!
//! `SessionManager` is the one object an embedder constructs at startup. It
//! owns the store, the gateway and the scheduler, and implements the flows
//! that start and end sessions: password login, account registration,
//! Google OAuth with account binding, resume-on-start, and logout.

use std::sync::Arc;
use std::time::Duration;

use common::Secret;
use serde_json::{Value, json};
use session::constants::{
    AVATAR_PATH, BIND_PATH, CHECK_USERNAME_PATH, GOOGLE_URL_PATH, LOGIN_PATH, REFRESH_INTERVAL,
    REGISTER_PATH, REGISTER_WITH_BIND_PATH, SEND_CODE_PATH,
};
use session::{AccessTokenData, BindProfile, Identity, OAuthCallback, SessionStore};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::gateway::{ApiRequest, ApiResponse, Gateway, GatewayConfig};
use crate::navigator::Navigator;
use crate::scheduler::RefreshScheduler;

/// Where an OAuth callback left the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OAuthOutcome {
    LoggedIn(Identity),
    /// Provider account not linked yet; finish with `bind_existing` or
    /// `register_with_bind`.
    BindRequired(BindProfile),
}

/// A new password account.
#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: Secret<String>,
    /// The code mailed by `SessionManager::send_code`.
    pub captcha: String,
    pub invite_code: Option<String>,
}

pub struct SessionManager {
    store: Arc<SessionStore>,
    gateway: Gateway,
    scheduler: RefreshScheduler,
    navigator: Arc<dyn Navigator>,
}

impl SessionManager {
    pub fn new(
        config: GatewayConfig,
        refresh_interval: Duration,
        store: Arc<SessionStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self> {
        let gateway = Gateway::new(config, store.clone(), navigator.clone())?;
        let scheduler = RefreshScheduler::new(gateway.clone(), refresh_interval);
        Ok(Self {
            store,
            gateway,
            scheduler,
            navigator,
        })
    }

    /// Manager with the default gateway settings and refresh interval.
    pub fn with_defaults(store: Arc<SessionStore>, navigator: Arc<dyn Navigator>) -> Result<Self> {
        Self::new(GatewayConfig::default(), REFRESH_INTERVAL, store, navigator)
    }

    /// App start: arm the scheduler if a persisted identity exists.
    pub async fn resume(&self) -> bool {
        match self.store.identity().await {
            Some(identity) => {
                info!(user_id = identity.user_id, "resuming persisted session");
                self.scheduler.arm();
                true
            }
            None => false,
        }
    }

    pub async fn login(&self, username: &str, password: &Secret<String>) -> Result<Identity> {
        let body = json!({"username": username, "password": password.expose_str()});
        self.credential_call(LOGIN_PATH, body, "login failed").await
    }

    /// Mail a registration verification code to `email`.
    pub async fn send_code(&self, email: &str) -> Result<()> {
        let request = ApiRequest::post(SEND_CODE_PATH).json(json!({"email": email}));
        self.acknowledged_call(request, "could not send verification code")
            .await
    }

    /// Whether `username` is still free to register.
    pub async fn check_username(&self, username: &str) -> Result<bool> {
        let request = ApiRequest::get(CHECK_USERNAME_PATH).query("username", username);
        let envelope = self.public_call(request).await?.envelope::<Value>()?;
        Ok(envelope.is_success())
    }

    /// Create a password account. No session starts; log in afterwards.
    pub async fn register(&self, registration: &Registration) -> Result<()> {
        let body = json!({
            "username": registration.username,
            "password": registration.password.expose_str(),
            "email": registration.email,
            "captcha": registration.captcha,
            "inviteCode": registration.invite_code.as_deref().unwrap_or_default(),
        });
        let request = ApiRequest::post(REGISTER_PATH).json(body);
        self.acknowledged_call(request, "registration failed").await?;
        info!(username = %registration.username, "account registered");
        Ok(())
    }

    /// Avatar URL of the logged-in user.
    pub async fn avatar_url(&self) -> Result<String> {
        let response = self.gateway.send(ApiRequest::get(AVATAR_PATH)).await?;
        let envelope = response.envelope::<Value>()?;
        if !envelope.is_success() {
            return Err(Error::Rejected(envelope.message_or("could not load avatar")));
        }
        envelope
            .data
            .as_ref()
            .and_then(|d| d["avatarUrl"].as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::Decode("avatar response carried no avatarUrl".into()))
    }

    /// Provider authorization URL to open in a browser.
    pub async fn google_auth_url(&self) -> Result<String> {
        let response = self.gateway.send(ApiRequest::get(GOOGLE_URL_PATH)).await?;
        let envelope = response.envelope::<Value>()?;
        if !envelope.is_success() {
            return Err(Error::Rejected(envelope.message_or("could not start OAuth")));
        }
        envelope
            .extra_str("url")
            .or_else(|| envelope.data.as_ref().and_then(|d| d["url"].as_str()))
            .map(str::to_string)
            .ok_or_else(|| Error::Decode("OAuth response carried no url".into()))
    }

    pub async fn complete_oauth(&self, callback: OAuthCallback) -> Result<OAuthOutcome> {
        match callback {
            OAuthCallback::Authenticated { access_token } => {
                match self.store.begin_session(&access_token).await {
                    Ok(identity) => {
                        self.scheduler.arm();
                        Ok(OAuthOutcome::LoggedIn(identity))
                    }
                    Err(e) => {
                        warn!(error = %e, "OAuth credential could not be decoded");
                        self.navigate_to_login();
                        Err(e.into())
                    }
                }
            }
            OAuthCallback::BindRequired(profile) => {
                info!(provider = %profile.provider, "OAuth account needs binding");
                Ok(OAuthOutcome::BindRequired(profile))
            }
            OAuthCallback::Failed { error } => {
                warn!(error = %error, "OAuth provider reported failure");
                self.navigate_to_login();
                Err(Error::OAuth(error))
            }
            OAuthCallback::Invalid => {
                warn!("OAuth callback carried no recognizable result");
                self.navigate_to_login();
                Err(Error::OAuth("invalid callback".into()))
            }
        }
    }

    /// Link the provider account to an existing user.
    pub async fn bind_existing(
        &self,
        bind_token: &str,
        username: &str,
        password: &Secret<String>,
    ) -> Result<Identity> {
        let body = json!({
            "bind_token": bind_token,
            "username": username,
            "password": password.expose_str(),
        });
        self.credential_call(BIND_PATH, body, "bind failed").await
    }

    /// Create a user and link the provider account to it.
    pub async fn register_with_bind(
        &self,
        bind_token: &str,
        username: &str,
        email: &str,
        password: &Secret<String>,
    ) -> Result<Identity> {
        let body = json!({
            "bind_token": bind_token,
            "username": username,
            "email": email,
            "password": password.expose_str(),
        });
        self.credential_call(REGISTER_WITH_BIND_PATH, body, "registration failed")
            .await
    }

    /// Stop the timer and drop all session state. No server call.
    pub async fn logout(&self) -> Result<()> {
        self.scheduler.disarm();
        self.store.clear_session().await?;
        info!("logged out");
        Ok(())
    }

    pub async fn identity(&self) -> Option<Identity> {
        self.store.identity().await
    }

    pub async fn is_logged_in(&self) -> bool {
        self.store.is_active_session().await
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn scheduler(&self) -> &RefreshScheduler {
        &self.scheduler
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// POST to an endpoint that issues an access credential, then start the
    /// session it describes.
    async fn credential_call(&self, path: &str, body: Value, fallback: &str) -> Result<Identity> {
        let response = self.public_call(ApiRequest::post(path).json(body)).await?;
        let envelope = response.envelope::<AccessTokenData>()?;
        if !envelope.is_success() {
            return Err(Error::Rejected(envelope.message_or(fallback)));
        }
        let token = envelope
            .access_token()
            .ok_or_else(|| Error::Decode(format!("{path} response carried no access token")))?;

        let identity = self.store.begin_session(token).await?;
        self.scheduler.arm();
        Ok(identity)
    }

    /// Send a call that needs no session. A 401 is a rejection here, and
    /// so is any other error status.
    async fn public_call(&self, request: ApiRequest) -> Result<ApiResponse> {
        match self.gateway.send(request.skip_refresh()).await {
            Err(Error::Unauthorized(message) | Error::Status { body: message, .. }) => {
                Err(Error::Rejected(message))
            }
            other => other,
        }
    }

    async fn acknowledged_call(&self, request: ApiRequest, fallback: &str) -> Result<()> {
        let envelope = self.public_call(request).await?.envelope::<Value>()?;
        if !envelope.is_success() {
            return Err(Error::Rejected(envelope.message_or(fallback)));
        }
        Ok(())
    }

    fn navigate_to_login(&self) {
        self.navigator
            .navigate(&self.gateway.config().login_route);
    }
}
