#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Extension, Form};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use threadbare::{Configuration, LifecycleError, ServiceLifecycle};
use tokio::task::JoinHandle;

/// Access token the mock remote hands out for the code `good`.
pub const MOCK_TOKEN: &str = "tok";
/// Size of the mock remote's `/big` body.
pub const BIG_BODY: usize = 1500;

/// Route `tracing` output through the test harness. `RUST_LOG` selects what is shown.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config bound to an ephemeral loopback port.
pub fn loopback_config() -> Configuration {
    Configuration {
        listen_address: "127.0.0.1:0".into(),
        client_website: "http://127.0.0.1".into(),
        shutdown_timeout: Duration::from_secs(5),
        ..Configuration::default()
    }
}

pub fn with_limit(limit: u64) -> Configuration {
    Configuration { response_limit: limit, ..loopback_config() }
}

/// Client that reports redirects instead of following them.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// Start `lifecycle` in the background and wait for its first listener.
pub async fn start(
    lifecycle: Arc<ServiceLifecycle>,
    config: Configuration,
) -> (JoinHandle<Result<(), LifecycleError>>, SocketAddr) {
    init_logging();
    let run = tokio::spawn({
        let lifecycle = lifecycle.clone();
        async move { lifecycle.start(config).await }
    });
    let addr = tokio::time::timeout(Duration::from_secs(5), lifecycle.wait_until_serving())
        .await
        .expect("listener did not come up")
        .expect("lifecycle dropped");
    (run, addr)
}

/// Value of the `session` cookie set by a response, if any.
pub fn session_cookie(resp: &reqwest::Response) -> Option<String> {
    set_cookie_header(resp)
        .and_then(|h| h.strip_prefix("session=").map(str::to_string))
        .map(|rest| rest.split(';').next().unwrap_or_default().to_string())
}

/// Raw `Set-Cookie` header for the session cookie.
pub fn set_cookie_header(resp: &reqwest::Response) -> Option<String> {
    resp.headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("session="))
        .map(str::to_string)
}

/// Loopback stand-in for the remote social API.
pub struct MockRemote {
    pub addr: SocketAddr,
    pub revoked: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockRemote {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn revocations(&self) -> usize {
        self.revoked.load(Ordering::SeqCst)
    }
}

impl Drop for MockRemote {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(serde::Deserialize)]
struct TokenForm {
    code: String,
    client_id: String,
}

pub async fn spawn_mock_remote() -> MockRemote {
    let revoked = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route(
            "/api/v1/apps",
            post(|| async { Json(json!({ "id": "1", "client_id": "cid", "client_secret": "csec" })) }),
        )
        .route(
            "/oauth/token",
            post(|Form(form): Form<TokenForm>| async move {
                if form.code == "good" && form.client_id == "cid" {
                    (StatusCode::OK, Json(json!({ "access_token": MOCK_TOKEN, "token_type": "Bearer" })))
                } else {
                    (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid_grant" })))
                }
            }),
        )
        .route(
            "/api/v1/accounts/verify_credentials",
            get(|headers: HeaderMap| async move {
                let bearer = format!("Bearer {MOCK_TOKEN}");
                match headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
                    Some(v) if v == bearer => {
                        (StatusCode::OK, Json(json!({ "id": "42", "username": "alice", "acct": "alice" })))
                    }
                    _ => (StatusCode::UNAUTHORIZED, Json(json!({ "error": "The access token is invalid" }))),
                }
            }),
        )
        .route(
            "/oauth/revoke",
            post(|Extension(revoked): Extension<Arc<AtomicUsize>>| async move {
                revoked.fetch_add(1, Ordering::SeqCst);
                Json(json!({}))
            }),
        )
        .route("/big", get(|| async { "x".repeat(BIG_BODY).into_response() }))
        .layer(Extension(revoked.clone()));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    MockRemote { addr, revoked, task }
}
