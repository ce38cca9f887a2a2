use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Request};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tower_layer::Layer;
use tower_service::Service;
use tracing::Level;

use crate::session::MAX_USER_CSS;
use crate::snapshot::Snapshot;

/// Largest accepted request body: a full user stylesheet plus form overhead.
pub const BODY_LIMIT: usize = MAX_USER_CSS + (64 << 10);

/// A layer that pins every request to one listener generation's [`Snapshot`].
#[derive(Clone, Debug)]
pub struct SnapshotLayer {
    snapshot: Arc<Snapshot>,
}

impl SnapshotLayer {
    pub fn new(snapshot: Arc<Snapshot>) -> Self {
        Self { snapshot }
    }
}

impl<S> Layer<S> for SnapshotLayer {
    type Service = SnapshotService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SnapshotService { inner, snapshot: self.snapshot.clone() }
    }
}

/// Middleware service that inserts `Arc<Snapshot>` into request extensions.
#[derive(Clone, Debug)]
pub struct SnapshotService<S> {
    inner: S,
    snapshot: Arc<Snapshot>,
}

impl<S, B> Service<Request<B>> for SnapshotService<S>
where
    S: Service<Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        req.extensions_mut().insert(self.snapshot.clone());
        self.inner.call(req)
    }
}

/// Content-Security-Policy restricting scripts and styles to this front end.
pub fn content_security_policy(client_website: &str) -> String {
    format!(
        "default-src {w}/;style-src {w}/session/css {w}/static/;script-src {w}/static/;img-src *;media-src *",
        w = client_website
    )
}

/// Wrap `router` in the middleware list, outermost first:
///
/// 1. request tracing span
/// 2. snapshot injection
/// 3. security headers
/// 4. request body limit
pub fn apply(router: Router, snapshot: Arc<Snapshot>) -> Router {
    let csp = HeaderValue::from_str(&content_security_policy(&snapshot.config().client_website)).ok();
    if csp.is_none() {
        tracing::warn!(website = %snapshot.config().client_website, "client_website is not a valid header value; omitting CSP");
    }

    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
            tracing::span!(
                Level::INFO,
                "http_request",
                method = %request.method(),
                path = %request.uri().path()
            )
        }))
        .layer(SnapshotLayer::new(snapshot))
        .layer(SetResponseHeaderLayer::if_not_present(header::CACHE_CONTROL, HeaderValue::from_static("private")))
        .layer(SetResponseHeaderLayer::overriding(header::CONTENT_SECURITY_POLICY, csp))
        .layer(SetResponseHeaderLayer::overriding(header::REFERRER_POLICY, HeaderValue::from_static("same-origin")))
        .layer(DefaultBodyLimit::max(BODY_LIMIT));

    router.layer(middleware)
}
