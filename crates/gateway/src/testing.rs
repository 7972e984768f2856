//! Test fixtures: a mock planner API on 127.0.0.1:0 and a wired-up client.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use serde_json::{Value, json};
use session::{Identity, MemoryStorage, SessionStore};
use tokio::net::TcpListener;

use crate::gateway::{Gateway, GatewayConfig};
use crate::navigator::Navigator;

/// Build a three-segment credential carrying the given identity.
pub(crate) fn token(user_id: i64, username: &str, sig: &str) -> String {
    let payload = json!({"userId": user_id, "username": username, "role": "user"});
    format!(
        "eyJhbGciOiJIUzI1NiJ9.{}.{sig}",
        URL_SAFE_NO_PAD.encode(payload.to_string())
    )
}

pub(crate) fn alice() -> Identity {
    Identity {
        user_id: 1,
        username: "alice".into(),
        role: "user".into(),
    }
}

/// How the mock refresh endpoint answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RefreshMode {
    Succeed,
    /// 200 with a non-zero code.
    RejectCode,
    /// 401 from the refresh endpoint itself.
    Unauthorized,
}

#[derive(Clone)]
struct ApiState {
    mode: Arc<Mutex<RefreshMode>>,
    refresh_calls: Arc<AtomicUsize>,
    refresh_delay: Arc<Mutex<Duration>>,
    accepted: Arc<Mutex<Option<String>>>,
    refresh_cookies: Arc<Mutex<Vec<Option<String>>>>,
    refresh_auth: Arc<Mutex<Vec<Option<String>>>>,
    auth_bodies: Arc<Mutex<Vec<Value>>>,
    served: Arc<Mutex<Vec<Served>>>,
    observed: Arc<Mutex<Option<Arc<SessionStore>>>>,
}

/// A `/plans` request the mock accepted.
#[derive(Debug, Clone)]
pub(crate) struct Served {
    pub tag: Option<String>,
    /// The observed store's credential when the request arrived.
    pub stored: Option<String>,
}

pub(crate) struct MockApi {
    pub url: String,
    pub refresh_calls: Arc<AtomicUsize>,
    state: ApiState,
    _server: tokio::task::JoinHandle<()>,
}

impl MockApi {
    pub async fn start(mode: RefreshMode) -> Self {
        let state = ApiState {
            mode: Arc::new(Mutex::new(mode)),
            refresh_calls: Arc::new(AtomicUsize::new(0)),
            refresh_delay: Arc::new(Mutex::new(Duration::ZERO)),
            accepted: Arc::new(Mutex::new(None)),
            refresh_cookies: Arc::new(Mutex::new(Vec::new())),
            refresh_auth: Arc::new(Mutex::new(Vec::new())),
            auth_bodies: Arc::new(Mutex::new(Vec::new())),
            served: Arc::new(Mutex::new(Vec::new())),
            observed: Arc::new(Mutex::new(None)),
        };

        let app = axum::Router::new()
            .route("/auth/refresh", post(refresh))
            .route("/plans", get(plans))
            .route("/always-401", get(always_unauthorized))
            .route("/echo-auth", get(echo_auth))
            .route("/boom", get(boom))
            .route("/slow", get(slow))
            .route("/rotate", get(rotate))
            .route("/user/login", post(login))
            .route("/user/bind", post(bind))
            .route("/user/registerWithBind", post(register_with_bind))
            .route("/user/google/url", get(google_url))
            .route("/user/send", post(send_code))
            .route("/user/checkUsername", get(check_username))
            .route("/user/register", post(register))
            .route("/auth/profiles/avatar", get(avatar))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{addr}"),
            refresh_calls: state.refresh_calls.clone(),
            state,
            _server: server,
        }
    }

    /// Make `/plans` accept this bearer credential.
    pub fn accept(&self, token: &str) {
        *self.state.accepted.lock().unwrap() = Some(token.to_string());
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.state.refresh_delay.lock().unwrap() = delay;
    }

    pub fn set_mode(&self, mode: RefreshMode) {
        *self.state.mode.lock().unwrap() = mode;
    }

    /// Credential the refresh endpoint issues.
    pub fn refreshed_token(&self) -> String {
        token(1, "alice", "refreshed")
    }

    /// `Cookie` header of each refresh call.
    pub fn refresh_cookies(&self) -> Vec<Option<String>> {
        self.state.refresh_cookies.lock().unwrap().clone()
    }

    /// `Authorization` header of each refresh call.
    pub fn refresh_authorization(&self) -> Vec<Option<String>> {
        self.state.refresh_auth.lock().unwrap().clone()
    }

    /// Accepted `/plans` requests in the order they reached the server.
    pub fn served(&self) -> Vec<Served> {
        self.state.served.lock().unwrap().clone()
    }

    /// Tags of accepted `/plans` requests in arrival order.
    pub fn served_tags(&self) -> Vec<String> {
        self.served().into_iter().filter_map(|s| s.tag).collect()
    }

    /// Record this store's credential whenever `/plans` accepts a request.
    pub fn observe_store(&self, store: Arc<SessionStore>) {
        *self.state.observed.lock().unwrap() = Some(store);
    }

    /// JSON bodies posted to the unauthenticated `/user/*` endpoints.
    pub fn auth_bodies(&self) -> Vec<Value> {
        self.state.auth_bodies.lock().unwrap().clone()
    }
}

fn header(headers: &HeaderMap, name: axum::http::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn issue(token: String, cookie: &str) -> Response {
    (
        StatusCode::OK,
        [(SET_COOKIE, format!("refreshToken={cookie}; Path=/; HttpOnly"))],
        Json(json!({"code": 0, "message": "ok", "data": {"accessToken": token}})),
    )
        .into_response()
}

fn reject(message: &str) -> Response {
    Json(json!({"code": 1, "message": message})).into_response()
}

async fn refresh(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    let n = state.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
    state
        .refresh_cookies
        .lock()
        .unwrap()
        .push(header(&headers, COOKIE));
    state
        .refresh_auth
        .lock()
        .unwrap()
        .push(header(&headers, AUTHORIZATION));
    let delay = *state.refresh_delay.lock().unwrap();
    let mode = *state.mode.lock().unwrap();
    tokio::time::sleep(delay).await;

    match mode {
        RefreshMode::Succeed => {
            let token = token(1, "alice", "refreshed");
            *state.accepted.lock().unwrap() = Some(token.clone());
            issue(token, &format!("rt_rotated_{n}"))
        }
        RefreshMode::RejectCode => {
            Json(json!({"code": 1, "msg": "refresh token expired"})).into_response()
        }
        RefreshMode::Unauthorized => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"code": 1, "msg": "invalid refresh token"})),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
struct PlansQuery {
    tag: Option<String>,
    delay_ms: Option<u64>,
}

async fn plans(
    State(state): State<ApiState>,
    Query(query): Query<PlansQuery>,
    headers: HeaderMap,
) -> Response {
    if let Some(ms) = query.delay_ms {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
    let presented = header(&headers, AUTHORIZATION)
        .and_then(|v| v.strip_prefix("Bearer ").map(str::to_string));
    let accepted = state.accepted.lock().unwrap().clone();
    match (presented, accepted) {
        (Some(p), Some(a)) if p == a => {
            let stored = state
                .observed
                .lock()
                .unwrap()
                .as_ref()
                .and_then(|store| store.access_credential())
                .map(|secret| secret.expose_str().to_string());
            state.served.lock().unwrap().push(Served {
                tag: query.tag,
                stored,
            });
            Json(json!({"code": 0, "data": {"token": p, "plans": []}})).into_response()
        }
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"code": 401, "message": "token expired"})),
        )
            .into_response(),
    }
}

async fn always_unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"code": 401, "msg": "still not allowed"})),
    )
        .into_response()
}

async fn echo_auth(headers: HeaderMap) -> Json<Value> {
    Json(json!({"authorization": header(&headers, AUTHORIZATION)}))
}

async fn boom() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"code": 500, "message": "database unavailable"})),
    )
        .into_response()
}

async fn slow() -> Json<Value> {
    tokio::time::sleep(Duration::from_secs(2)).await;
    Json(json!({"code": 0}))
}

async fn rotate() -> Response {
    (
        StatusCode::OK,
        [(SET_COOKIE, "refreshToken=rt_from_rotate; Path=/; HttpOnly")],
        Json(json!({"code": 0})),
    )
        .into_response()
}

async fn login(State(state): State<ApiState>, Json(body): Json<Value>) -> Response {
    state.auth_bodies.lock().unwrap().push(body.clone());
    if body["password"] != "secret" {
        return reject("invalid username or password");
    }
    let username = body["username"].as_str().unwrap_or_default();
    let token = token(1, username, "login");
    *state.accepted.lock().unwrap() = Some(token.clone());
    issue(token, "rt_login")
}

async fn bind(State(state): State<ApiState>, Json(body): Json<Value>) -> Response {
    state.auth_bodies.lock().unwrap().push(body.clone());
    if body["bind_token"] != "bt_1" || body["password"] != "secret" {
        return reject("bind token expired");
    }
    let username = body["username"].as_str().unwrap_or_default();
    issue(token(1, username, "bind"), "rt_bind")
}

async fn register_with_bind(State(state): State<ApiState>, Json(body): Json<Value>) -> Response {
    state.auth_bodies.lock().unwrap().push(body.clone());
    if body["bind_token"] != "bt_1" {
        return reject("bind token expired");
    }
    let username = body["username"].as_str().unwrap_or_default();
    issue(token(2, username, "register"), "rt_register")
}

async fn google_url() -> Json<Value> {
    Json(json!({
        "code": 0,
        "url": "https://accounts.example.com/o/oauth2/auth?client_id=planner"
    }))
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"code": 1, "message": message})),
    )
        .into_response()
}

fn acknowledge(message: &str) -> Response {
    Json(json!({"code": 0, "message": message})).into_response()
}

async fn send_code(State(state): State<ApiState>, Json(body): Json<Value>) -> Response {
    state.auth_bodies.lock().unwrap().push(body.clone());
    if !body["email"].as_str().unwrap_or_default().contains('@') {
        return bad_request("invalid email");
    }
    acknowledge("code sent")
}

#[derive(Deserialize)]
struct UsernameQuery {
    username: String,
}

async fn check_username(Query(query): Query<UsernameQuery>) -> Response {
    match query.username.as_str() {
        name if name.len() < 3 => bad_request("invalid username"),
        "alice" => reject("username taken"),
        _ => acknowledge("username available"),
    }
}

async fn register(State(state): State<ApiState>, Json(body): Json<Value>) -> Response {
    state.auth_bodies.lock().unwrap().push(body.clone());
    if body["captcha"] != "123456" {
        return bad_request("invalid parameters");
    }
    if body["username"] == "alice" {
        return reject("username or email already exists");
    }
    acknowledge("registered")
}

async fn avatar(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    let presented = header(&headers, AUTHORIZATION)
        .and_then(|v| v.strip_prefix("Bearer ").map(str::to_string));
    let accepted = state.accepted.lock().unwrap().clone();
    if presented.is_none() || presented != accepted {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"code": 1, "msg": "token expired"})),
        )
            .into_response();
    }
    Json(json!({
        "code": 0,
        "message": "ok",
        "data": {"avatarUrl": "https://cdn.example.com/avatars/1.png"}
    }))
    .into_response()
}

/// Navigator that records every route.
#[derive(Default)]
pub(crate) struct RecordingNavigator {
    routes: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn routes(&self) -> Vec<String> {
        self.routes.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, route: &str) {
        self.routes.lock().unwrap().push(route.to_string());
    }
}

/// Gateway wired to in-memory storage and a recording navigator.
pub(crate) struct TestClient {
    pub gateway: Gateway,
    pub store: Arc<SessionStore>,
    pub navigator: Arc<RecordingNavigator>,
}

impl TestClient {
    pub async fn new(url: &str) -> Self {
        Self::with_timeout(url, Duration::from_secs(5)).await
    }

    pub async fn with_timeout(url: &str, timeout: Duration) -> Self {
        let store = Arc::new(SessionStore::new(Arc::new(MemoryStorage::new())));
        let navigator = Arc::new(RecordingNavigator::default());
        let config = GatewayConfig {
            base_url: url.to_string(),
            timeout,
            ..GatewayConfig::default()
        };
        let gateway = Gateway::new(config, store.clone(), navigator.clone()).unwrap();
        Self {
            gateway,
            store,
            navigator,
        }
    }

    /// Persisted identity with an access credential the server no longer accepts.
    pub async fn login_stale(&self) {
        self.store.set_identity(&alice()).await.unwrap();
        self.store.set_access_credential("at_stale");
    }
}
