#![allow(dead_code)]

use async_trait::async_trait;
use auth_bridge::client::{AuthTransport, FetchRequest, FetchResponse};
use auth_bridge::{
    AuthConfig, AuthHandler, BridgeError, BridgeResult, RemoteEngine, auth_middleware,
};
use axum::{
    Form, Json, Router,
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::from_fn_with_state,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use url::Url;

pub const CURRENT_PAGE: &str = "https://app.example.com/current-page";

pub const CSRF_COOKIE: &str = "authjs.csrf-token";
pub const SESSION_COOKIE: &str = "authjs.session-token";

/// Transport answering from a per-path script and recording every request.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<HashMap<String, VecDeque<(u16, Option<Url>, String)>>>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for requests to `path`.
    pub fn respond(self, path: &str, status: u16, body: impl Into<String>) -> Self {
        self.push(path, status, None, body.into())
    }

    /// Queue a response for `path` that was reached after redirects ending at `final_url`.
    pub fn respond_redirected(
        self,
        path: &str,
        final_url: &str,
        status: u16,
        body: impl Into<String>,
    ) -> Self {
        let final_url = Url::parse(final_url).expect("valid final url");
        self.push(path, status, Some(final_url), body.into())
    }

    fn push(self, path: &str, status: u16, final_url: Option<Url>, body: String) -> Self {
        self.responses
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back((status, final_url, body));
        self
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| r.url.path().to_string())
            .collect()
    }
}

#[async_trait]
impl AuthTransport for ScriptedTransport {
    async fn fetch(&self, request: FetchRequest) -> BridgeResult<FetchResponse> {
        let path = request.url.path().to_string();
        let url = request.url.clone();
        self.requests.lock().unwrap().push(request);

        let next = self
            .responses
            .lock()
            .unwrap()
            .get_mut(&path)
            .and_then(VecDeque::pop_front);

        match next {
            Some((status, final_url, body)) => Ok(FetchResponse::new(
                status,
                final_url.unwrap_or(url),
                body,
            )),
            None => Err(BridgeError::Network(format!(
                "no scripted response for {}",
                path
            ))),
        }
    }
}

/// Background axum server stopped on drop.
pub struct TestServer {
    pub port: u16,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start(app: Router) -> anyhow::Result<Self> {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let port = listener.local_addr()?.port();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed to start");
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Ok(Self {
            port,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

/// Public origin as the engine sees it, honouring the bridge's forwarded host.
fn origin(headers: &HeaderMap) -> String {
    let host = headers
        .get("x-forwarded-host")
        .or_else(|| headers.get(header::HOST))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("http://{}", host)
}

fn csrf_ok(headers: &HeaderMap, form: &HashMap<String, String>) -> bool {
    let expected = cookie(headers, CSRF_COOKIE);
    expected.is_some() && form.get("csrfToken") == expected.as_ref()
}

fn redirect_json(url: String) -> Response {
    Json(json!({ "url": url })).into_response()
}

#[derive(Clone, Default)]
struct BackendState {
    csrf_issued: Arc<AtomicUsize>,
}

/// Minimal stand-in for an Auth.js engine served over HTTP.
///
/// Credentials: `ada` / `secret`. The `github` provider redirects to
/// `/provider/authorize` on the public origin.
pub struct MockAuthBackend {
    server: TestServer,
    state: BackendState,
}

impl MockAuthBackend {
    pub async fn start() -> anyhow::Result<Self> {
        let state = BackendState::default();
        let app = Router::new()
            .route("/api/auth/csrf", get(backend_csrf))
            .route("/api/auth/session", get(backend_session))
            .route("/api/auth/callback/credentials", post(backend_credentials))
            .route("/api/auth/signin/github", post(backend_github))
            .route("/api/auth/signout", post(backend_signout))
            .with_state(state.clone());

        Ok(Self {
            server: TestServer::start(app).await?,
            state,
        })
    }

    pub fn port(&self) -> u16 {
        self.server.port
    }

    pub fn url(&self) -> Url {
        Url::parse(&self.server.url("/")).expect("valid backend url")
    }

    pub fn csrf_issued(&self) -> usize {
        self.state.csrf_issued.load(Ordering::SeqCst)
    }
}

async fn backend_csrf(State(state): State<BackendState>) -> Response {
    let n = state.csrf_issued.fetch_add(1, Ordering::SeqCst) + 1;
    let token = format!("token-{}", n);
    (
        [(
            header::SET_COOKIE,
            format!("{}={}; Path=/; HttpOnly", CSRF_COOKIE, token),
        )],
        Json(json!({ "csrfToken": token })),
    )
        .into_response()
}

async fn backend_session(headers: HeaderMap) -> Response {
    if cookie(&headers, SESSION_COOKIE).as_deref() != Some("session-ada") {
        return Json(json!({})).into_response();
    }

    let mut response = Json(json!({
        "user": { "name": "Ada Lovelace", "email": "ada@example.com" },
        "expires": "2030-01-01T00:00:00.000Z"
    }))
    .into_response();
    let headers = response.headers_mut();
    headers.append(
        header::SET_COOKIE,
        format!("{}=session-ada; Path=/; HttpOnly", SESSION_COOKIE)
            .parse()
            .expect("valid cookie"),
    );
    headers.append(
        header::SET_COOKIE,
        "authjs.session-touched=1; Path=/".parse().expect("valid cookie"),
    );
    response
}

async fn backend_credentials(
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let origin = origin(&headers);
    if !csrf_ok(&headers, &form) {
        return redirect_json(format!("{}/api/auth/error?error=MissingCSRF", origin));
    }

    let valid = form.get("username").map(String::as_str) == Some("ada")
        && form.get("password").map(String::as_str) == Some("secret");
    if !valid {
        return redirect_json(format!(
            "{}/api/auth/signin?error=CredentialsSignin&code=credentials",
            origin
        ));
    }

    let callback = form.get("callbackUrl").cloned().unwrap_or_else(|| "/".to_string());
    (
        [(
            header::SET_COOKIE,
            format!("{}=session-ada; Path=/; HttpOnly", SESSION_COOKIE),
        )],
        Json(json!({ "url": format!("{}{}", origin, callback) })),
    )
        .into_response()
}

async fn backend_github(headers: HeaderMap, Form(form): Form<HashMap<String, String>>) -> Response {
    if !csrf_ok(&headers, &form) {
        return (StatusCode::FORBIDDEN, "csrf mismatch").into_response();
    }
    Redirect::to(&format!(
        "{}/provider/authorize?client_id=github-client",
        origin(&headers)
    ))
    .into_response()
}

async fn backend_signout(
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let origin = origin(&headers);
    if !csrf_ok(&headers, &form) {
        return redirect_json(format!("{}/api/auth/error?error=MissingCSRF", origin));
    }

    let callback = form.get("callbackUrl").cloned().unwrap_or_else(|| "/".to_string());
    (
        [(
            header::SET_COOKIE,
            format!("{}=; Path=/; Max-Age=0", SESSION_COOKIE),
        )],
        Json(json!({ "url": format!("{}{}", origin, callback) })),
    )
        .into_response()
}

pub fn test_config() -> AuthConfig {
    AuthConfig {
        secret: vec!["test-secret".to_string()],
        trust_host: Some(true),
        ..Default::default()
    }
}

/// Host application mounting the backend through the bridge.
///
/// `/` answers `{ "session": ... }` for the caller; every other non-auth
/// path renders a plain page naming its path.
pub struct TestBridge {
    pub server: TestServer,
    pub backend: MockAuthBackend,
}

impl TestBridge {
    pub async fn start() -> anyhow::Result<Self> {
        let backend = MockAuthBackend::start().await?;
        let engine = RemoteEngine::new(backend.url())?;
        let handler = AuthHandler::new(Arc::new(engine), test_config());

        let app = Router::new()
            .route("/", get(bridge_home))
            .fallback(bridge_page)
            .with_state(handler.clone())
            .layer(from_fn_with_state(handler, auth_middleware::<RemoteEngine>));

        Ok(Self {
            server: TestServer::start(app).await?,
            backend,
        })
    }

    pub fn url(&self, path: &str) -> String {
        self.server.url(path)
    }

    pub fn page_url(&self, path: &str) -> Url {
        Url::parse(&self.url(path)).expect("valid bridge url")
    }
}

async fn bridge_home(
    State(handler): State<AuthHandler<RemoteEngine>>,
    request: Request,
) -> Response {
    let mut headers = HeaderMap::new();
    match handler.session(&request, Some(&mut headers)).await {
        Ok(session) => (headers, Json(json!({ "session": session }))).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn bridge_page(request: Request) -> Html<String> {
    Html(format!("page {}", request.uri().path()))
}
