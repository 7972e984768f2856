//! HTTP Gateway
//!
//! Single outbound pipeline for every planner API call. Attaches the bearer
//! credential, captures refresh-cookie rotations, and recovers exactly one
//! class of failure transparently: a 401 on a request that has not been
//! retried yet.
//!
//! Refresh protocol:
//! 1. The first 401 while no refresh is running starts one (the leader)
//! 2. Every later 401 parks its request in arrival order
//! 3. A 401 on a credential that has since been replaced replays at once
//! 4. The refresh runs in its own task; its result is stored before any replay
//! 5. That task replays the parked requests one at a time in arrival order,
//!    the leader's last, and hands each caller its response
//! 6. On failure the session is cleared, the client is sent to login, and
//!    every caller gets the triggering 401

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use common::Secret;
use reqwest::header::{COOKIE, HeaderMap};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use session::constants::{DEFAULT_BASE_URL, LOGIN_ROUTE, REFRESH_PATH, REQUEST_TIMEOUT};
use session::{AccessTokenData, Envelope, SessionStore, cookie_header, refresh_cookie_update};
use tokio::sync::oneshot;
use tracing::{Instrument, Span, debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::metrics;
use crate::navigator::Navigator;

/// Gateway settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// API root, e.g. `http://localhost:8080/api/v1`. Request paths are appended.
    pub base_url: String,
    /// Per-call timeout. A timeout is a transport failure, never a refresh trigger.
    pub timeout: Duration,
    /// Where to send the client when the session ends.
    pub login_route: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: REQUEST_TIMEOUT,
            login_route: LOGIN_ROUTE.to_string(),
        }
    }
}

/// One outbound API call.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Set once the request has been through the refresh protocol.
    pub retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Let a 401 surface directly instead of entering the refresh protocol.
    /// Credential-issuing calls (login, bind) use this.
    pub fn skip_refresh(mut self) -> Self {
        self.retried = true;
        self
    }

    pub fn is_refresh_call(&self) -> bool {
        self.path.contains(REFRESH_PATH)
    }
}

/// Buffered API response. `Gateway::send` only returns 2xx ones.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| Error::Decode(format!("response body: {e}")))
    }

    pub fn envelope<T: DeserializeOwned>(&self) -> Result<Envelope<T>> {
        self.json()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// User-facing message from an error body: the envelope `message`/`msg`
/// when there is one, otherwise the raw text.
pub fn error_message(status: StatusCode, body: &[u8]) -> String {
    match serde_json::from_slice::<Envelope<Value>>(body) {
        Ok(envelope) => envelope.message_or(&format!("HTTP {}", status.as_u16())),
        Err(_) if body.is_empty() => format!("HTTP {}", status.as_u16()),
        Err(_) => String::from_utf8_lossy(body).into_owned(),
    }
}

/// 2xx passes through; a 401 is `Unauthorized`, anything else `Status`.
fn classify(response: ApiResponse) -> Result<ApiResponse> {
    if response.status.is_success() {
        return Ok(response);
    }
    let message = error_message(response.status, &response.body);
    if response.status == StatusCode::UNAUTHORIZED {
        Err(Error::Unauthorized(message))
    } else {
        Err(Error::Status {
            status: response.status.as_u16(),
            body: message,
        })
    }
}

/// How a refresh ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RefreshOutcome {
    Renewed,
    Failed(String),
    /// The session changed while the refresh was out; its result was dropped.
    Stale,
}

/// What a parked caller is handed once the refresh settles.
#[derive(Debug)]
enum Wake {
    /// The refresh succeeded. Carries the replayed response for callers that
    /// parked a request.
    Renewed(Option<Result<ApiResponse>>),
    Failed(String),
    Stale,
}

/// A caller parked on the refresh.
struct Waiter {
    replay: Option<ApiRequest>,
    span: Span,
    reply: oneshot::Sender<Wake>,
}

enum Joined {
    Parked(oneshot::Receiver<Wake>),
    /// The credential changed since the request went out; replay it directly.
    Renewed(ApiRequest),
}

#[derive(Default)]
struct RefreshState {
    in_flight: bool,
    /// Callers that hit a 401 while the refresh was already running.
    queue: Vec<Waiter>,
    /// The caller that started the refresh; served after the queue.
    leader: Option<Waiter>,
}

impl RefreshState {
    fn take_waiters(&mut self) -> Vec<Waiter> {
        self.in_flight = false;
        let mut waiters = std::mem::take(&mut self.queue);
        waiters.extend(self.leader.take());
        waiters
    }
}

struct Inner {
    client: reqwest::Client,
    config: GatewayConfig,
    store: Arc<SessionStore>,
    navigator: Arc<dyn Navigator>,
    refresh: Mutex<RefreshState>,
}

/// Shared request pipeline. Clones share the refresh state.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        store: Arc<SessionStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Transport(format!("building HTTP client: {e}")))?;

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                config,
                store,
                navigator,
                refresh: Mutex::new(RefreshState::default()),
            }),
        })
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.inner.store
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    /// Whether a refresh call is outstanding right now.
    pub fn is_refreshing(&self) -> bool {
        self.lock_refresh().in_flight
    }

    /// Send a request, recovering from one 401 through the refresh protocol.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let request_id = Uuid::new_v4().to_string();
        self.send_with_id(request, request_id).await
    }

    #[instrument(skip_all, fields(request_id = %request_id, method = %request.method, path = %request.path))]
    async fn send_with_id(&self, request: ApiRequest, request_id: String) -> Result<ApiResponse> {
        let result = self.send_recovering(request).await;
        metrics::record_request(match &result {
            Ok(_) => "ok",
            Err(Error::Unauthorized(_)) => "unauthorized",
            Err(Error::SessionEnded) => "session_ended",
            Err(Error::Status { .. }) => "error_status",
            Err(_) => "transport_error",
        });
        result
    }

    async fn send_recovering(&self, mut request: ApiRequest) -> Result<ApiResponse> {
        let (response, used) = self.dispatch(&request).await?;
        let message = match classify(response) {
            Err(Error::Unauthorized(message))
                if !request.retried && !request.is_refresh_call() =>
            {
                message
            }
            other => return other,
        };

        request.retried = true;
        let rx = match self.join_refresh(Some(request), used.as_ref()) {
            Joined::Parked(rx) => rx,
            Joined::Renewed(request) => {
                debug!("credential already renewed, replaying without a refresh");
                return self.replay(&request).await;
            }
        };
        match rx.await {
            Ok(Wake::Renewed(Some(result))) => result,
            Ok(Wake::Renewed(None)) | Err(_) => {
                debug!("refresh task ended without replaying the request");
                Err(Error::Unauthorized(message))
            }
            Ok(Wake::Failed(reason)) => {
                debug!(reason = %reason, "refresh failed, rejecting request");
                Err(Error::Unauthorized(message))
            }
            Ok(Wake::Stale) => Err(Error::SessionEnded),
        }
    }

    /// Renew the access credential now, joining a refresh that is already
    /// running rather than issuing a second one.
    pub async fn refresh_session(&self) -> Result<()> {
        let Joined::Parked(rx) = self.join_refresh(None, None) else {
            return Ok(());
        };
        match rx.await {
            Ok(Wake::Renewed(_)) => Ok(()),
            Ok(Wake::Failed(reason)) => Err(Error::RefreshFailed(reason)),
            Ok(Wake::Stale) => Err(Error::SessionEnded),
            Err(_) => Err(Error::RefreshFailed(
                "refresh task ended without a result".into(),
            )),
        }
    }

    /// Park on the running refresh, or start one and become its leader.
    ///
    /// `used` is the credential the request went out with. When no refresh
    /// is running and the store already holds a different one, the request
    /// comes straight back for a replay.
    fn join_refresh(&self, replay: Option<ApiRequest>, used: Option<&Secret<String>>) -> Joined {
        let mut state = self.lock_refresh();
        if !state.in_flight {
            let renewed = self
                .inner
                .store
                .access_credential()
                .is_some_and(|current| Some(&current) != used);
            return match replay {
                Some(request) if renewed => Joined::Renewed(request),
                replay => self.start_refresh(state, replay),
            };
        }

        let (reply, rx) = oneshot::channel();
        state.queue.push(Waiter {
            replay,
            span: Span::current(),
            reply,
        });
        metrics::record_queued();
        debug!(queued = state.queue.len(), "refresh in flight, queueing request");
        Joined::Parked(rx)
    }

    fn start_refresh(
        &self,
        mut state: std::sync::MutexGuard<'_, RefreshState>,
        replay: Option<ApiRequest>,
    ) -> Joined {
        let (reply, rx) = oneshot::channel();
        state.in_flight = true;
        state.leader = Some(Waiter {
            replay,
            span: Span::current(),
            reply,
        });
        // Bound to the session as it stands while the flag is claimed.
        let epoch = self.inner.store.epoch();
        drop(state);
        tokio::spawn(self.clone().run_refresh(epoch));
        Joined::Parked(rx)
    }

    async fn run_refresh(self, epoch: u64) {
        let release = Release {
            gateway: self.clone(),
            armed: true,
        };
        let store = &self.inner.store;
        info!("refreshing access credential");

        let outcome = match self.call_refresh().await {
            Ok(token) => match store.apply_refreshed(&token, epoch).await {
                Ok(true) => {
                    info!("access credential refreshed");
                    metrics::record_refresh("renewed");
                    RefreshOutcome::Renewed
                }
                Ok(false) => {
                    metrics::record_refresh("stale");
                    RefreshOutcome::Stale
                }
                Err(e) => {
                    // Credential is already in memory; only the identity write failed.
                    warn!(error = %e, "failed to persist refreshed identity");
                    metrics::record_refresh("renewed");
                    RefreshOutcome::Renewed
                }
            },
            Err(reason) if store.epoch() != epoch => {
                debug!(reason = %reason, "refresh failed after the session changed, ignoring");
                metrics::record_refresh("stale");
                RefreshOutcome::Stale
            }
            Err(reason) => {
                warn!(reason = %reason, "token refresh failed, ending session");
                metrics::record_refresh("failed");
                self.end_session().await;
                RefreshOutcome::Failed(reason)
            }
        };

        let waiters = release.disarm();
        self.serve_waiters(waiters, outcome).await;
    }

    /// Hand every waiter its result in arrival order. After a renewal each
    /// parked request is replayed before the next one goes out.
    async fn serve_waiters(&self, waiters: Vec<Waiter>, outcome: RefreshOutcome) {
        for waiter in waiters {
            let wake = match (&outcome, waiter.replay) {
                (RefreshOutcome::Renewed, Some(request)) => {
                    if waiter.reply.is_closed() {
                        let parent = &waiter.span;
                        debug!(parent: parent, "caller went away, skipping replay");
                        continue;
                    }
                    let span = waiter.span.clone();
                    let result = async {
                        debug!("replaying request with refreshed credential");
                        self.replay(&request).await
                    }
                    .instrument(span)
                    .await;
                    Wake::Renewed(Some(result))
                }
                (RefreshOutcome::Renewed, None) => Wake::Renewed(None),
                (RefreshOutcome::Failed(reason), _) => Wake::Failed(reason.clone()),
                (RefreshOutcome::Stale, _) => Wake::Stale,
            };
            let _ = waiter.reply.send(wake);
        }
    }

    async fn replay(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let (response, _) = self.dispatch(request).await?;
        classify(response)
    }

    /// POST the refresh endpoint with the refresh cookie and no bearer.
    async fn call_refresh(&self) -> std::result::Result<String, String> {
        let mut builder = self
            .inner
            .client
            .post(self.url(REFRESH_PATH))
            .timeout(self.inner.config.timeout);
        if let Some(secret) = self.inner.store.refresh_cookie().await
            && let Some(header) = cookie_header(secret.expose_str())
        {
            builder = builder.header(COOKIE, header);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| format!("refresh request failed: {e}"))?;
        let status = response.status();
        self.capture_cookie(response.headers()).await;
        let body = response
            .bytes()
            .await
            .map_err(|e| format!("reading refresh response: {e}"))?;

        if !status.is_success() {
            return Err(format!(
                "refresh endpoint returned {}: {}",
                status.as_u16(),
                error_message(status, &body)
            ));
        }

        let envelope: Envelope<AccessTokenData> = serde_json::from_slice(&body)
            .map_err(|e| format!("unreadable refresh response: {e}"))?;
        if !envelope.is_success() {
            return Err(format!(
                "refresh rejected with code {}: {}",
                envelope.code,
                envelope.message_or("no message")
            ));
        }
        envelope
            .access_token()
            .map(str::to_string)
            .ok_or_else(|| "refresh response carried no access token".to_string())
    }

    /// Clear everything and send the client to login.
    async fn end_session(&self) {
        if let Err(e) = self.inner.store.clear_session().await {
            warn!(error = %e, "failed to clear persisted session");
        }
        self.inner.navigator.navigate(&self.inner.config.login_route);
    }

    /// Send once. Also returns the credential the request carried.
    async fn dispatch(&self, request: &ApiRequest) -> Result<(ApiResponse, Option<Secret<String>>)> {
        let mut builder = self
            .inner
            .client
            .request(request.method.clone(), self.url(&request.path))
            .timeout(self.inner.config.timeout);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let credential = self.inner.store.access_credential();
        if let Some(token) = &credential {
            debug!("attaching bearer credential");
            builder = builder.bearer_auth(token.expose_str());
        }

        let response = builder.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let headers = response.headers().clone();
        self.capture_cookie(&headers).await;
        let body = response.bytes().await.map_err(|e| self.transport_error(e))?;

        let response = ApiResponse {
            status,
            headers,
            body,
        };
        Ok((response, credential))
    }

    async fn capture_cookie(&self, headers: &HeaderMap) {
        if let Some(update) = refresh_cookie_update(headers)
            && let Err(e) = self.inner.store.apply_cookie_update(update).await
        {
            warn!(error = %e, "failed to persist refresh cookie");
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout(self.inner.config.timeout.as_secs())
        } else {
            Error::Transport(e.to_string())
        }
    }

    fn url(&self, path: &str) -> String {
        let base = self.inner.config.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }

    fn lock_refresh(&self) -> std::sync::MutexGuard<'_, RefreshState> {
        self.inner
            .refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Resets the in-flight flag and fails every waiter if the refresh task
/// ends before it hands the waiters over.
struct Release {
    gateway: Gateway,
    armed: bool,
}

impl Release {
    fn disarm(mut self) -> Vec<Waiter> {
        self.armed = false;
        self.gateway.lock_refresh().take_waiters()
    }
}

impl Drop for Release {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let waiters = self.gateway.lock_refresh().take_waiters();
        for waiter in waiters {
            let _ = waiter
                .reply
                .send(Wake::Failed("refresh task aborted".into()));
        }
    }
}
