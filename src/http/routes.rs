use std::sync::Arc;

use axum::extract::{Extension, Form, Query};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;

use super::error::ApiError;
use crate::auth::{RequestContext, TrustLevel};
use crate::config::version;
use crate::remote::RemoteClient;
use crate::session::{Session, SessionCodec, Settings, SESSION_COOKIE};
use crate::snapshot::Snapshot;

const IMMUTABLE: &str = "public, immutable, max-age=31556952, stale-while-revalidate=31556952";

/// Auth-core routes. Expects [`super::middleware::apply`] to provide the snapshot.
pub fn router() -> Router {
    Router::new()
        .route("/", get(index))
        .route("/signin", get(signin_page).post(signin))
        .route("/oauth_callback", get(oauth_callback))
        .route("/settings", post(update_settings))
        .route("/signout", post(signout))
        .route("/session/css", get(user_css))
        .route("/health", get(health))
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

fn session_cookie(jar: &CookieJar) -> Option<&str> {
    jar.get(SESSION_COOKIE).map(|c| c.value())
}

fn secure(snap: &Snapshot) -> bool {
    snap.config().client_website.starts_with("https://")
}

fn bound_remote(ctx: &RequestContext) -> Result<&RemoteClient, ApiError> {
    ctx.remote().ok_or_else(|| ApiError::BadRequest("session has no usable instance".into()))
}

/// Strip the default scheme and trailing slashes a user may paste.
fn normalize_instance(raw: &str) -> &str {
    let raw = raw.trim();
    raw.strip_prefix("https://").unwrap_or(raw).trim_end_matches('/')
}

async fn index(Extension(snap): Extension<Arc<Snapshot>>, jar: CookieJar) -> Result<Response, ApiError> {
    let ctx = snap.authenticate(TrustLevel::Anonymous, session_cookie(&jar), None)?;
    if !ctx.is_logged_in() {
        return Ok(found("/signin"));
    }
    Ok(Json(serde_json::json!({
        "user_id": ctx.session.user_id,
        "instance": ctx.session.instance,
        "csrf_token": ctx.session.csrf_token,
        "asset_stamp": snap.asset_stamp(),
    }))
    .into_response())
}

async fn signin_page(Extension(snap): Extension<Arc<Snapshot>>, jar: CookieJar) -> Result<Response, ApiError> {
    // With a pinned instance there is nothing to choose.
    if let Some(instance) = snap.config().single_instance() {
        let instance = instance.to_string();
        return begin_signin(&snap, jar, &instance).await;
    }
    Ok(Json(serde_json::json!({
        "fields": ["instance"],
        "asset_stamp": snap.asset_stamp(),
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
struct SigninForm {
    instance: String,
}

async fn signin(
    Extension(snap): Extension<Arc<Snapshot>>,
    jar: CookieJar,
    Form(form): Form<SigninForm>,
) -> Result<Response, ApiError> {
    begin_signin(&snap, jar, &form.instance).await
}

async fn begin_signin(snap: &Snapshot, jar: CookieJar, instance: &str) -> Result<Response, ApiError> {
    let instance = normalize_instance(instance);
    if instance.is_empty() {
        return Err(ApiError::BadRequest("instance is required".into()));
    }
    let config = snap.config();
    if let Some(pinned) = config.single_instance() {
        if normalize_instance(pinned) != instance {
            return Err(ApiError::BadRequest(format!("sign-in is limited to {pinned}")));
        }
    }

    let remote = snap.remote_for(instance)?;
    let app = remote.register_app(config).await?;
    let remote = remote.with_credentials(&app.client_id, &app.client_secret);
    let authorize = remote.authorize_url(config)?;

    let session = Session::new(instance, app.client_id, app.client_secret, snap.new_csrf_token());
    let cookie = snap.codec().issue_cookie(&session, secure(snap))?;
    tracing::info!(instance = %instance, "sign-in started");
    Ok((jar.add(cookie), found(authorize.as_str())).into_response())
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: String,
}

async fn oauth_callback(
    Extension(snap): Extension<Arc<Snapshot>>,
    jar: CookieJar,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, ApiError> {
    let ctx = snap.authenticate(TrustLevel::SessionRequired, session_cookie(&jar), None)?;
    let remote = bound_remote(&ctx)?;
    let token = remote.exchange_code(&ctx.config, &query.code).await?;
    let account = remote.clone().with_access_token(&token).verify_credentials().await?;

    let mut session = ctx.session;
    session.sign_in(account.id, token);
    let cookie = snap.codec().issue_cookie(&session, secure(&snap))?;
    tracing::info!(instance = %session.instance, user = %session.user_id, "signed in");
    Ok((jar.add(cookie), found("/")).into_response())
}

#[derive(Debug, Deserialize)]
struct SettingsForm {
    csrf_token: String,
    #[serde(default)]
    visibility: Option<String>,
    #[serde(default)]
    format: String,
    #[serde(default)]
    copy_scope: Option<String>,
    #[serde(default)]
    thread_in_new_tab: Option<String>,
    #[serde(default)]
    hide_attachments: Option<String>,
    #[serde(default)]
    mask_nsfw: Option<String>,
    #[serde(default)]
    notification_interval: u32,
    #[serde(default)]
    fluoride_mode: Option<String>,
    #[serde(default)]
    dark_mode: Option<String>,
    #[serde(default)]
    anti_dopamine_mode: Option<String>,
    #[serde(default)]
    hide_unsupported_notifs: Option<String>,
    #[serde(default)]
    css: String,
}

/// Checkboxes submit `true`; an absent or any other value clears the flag.
fn checked(value: &Option<String>) -> bool {
    value.as_deref() == Some("true")
}

impl SettingsForm {
    fn into_settings(self) -> Settings {
        Settings {
            default_visibility: self.visibility.unwrap_or_else(|| Settings::default().default_visibility),
            default_format: self.format,
            copy_scope: checked(&self.copy_scope),
            thread_in_new_tab: checked(&self.thread_in_new_tab),
            hide_attachments: checked(&self.hide_attachments),
            mask_nsfw: checked(&self.mask_nsfw),
            notification_interval: self.notification_interval,
            fluoride_mode: checked(&self.fluoride_mode),
            dark_mode: checked(&self.dark_mode),
            anti_dopamine_mode: checked(&self.anti_dopamine_mode),
            hide_unsupported_notifs: checked(&self.hide_unsupported_notifs),
            css: self.css,
            stamp: String::new(),
        }
    }
}

async fn update_settings(
    Extension(snap): Extension<Arc<Snapshot>>,
    jar: CookieJar,
    Form(form): Form<SettingsForm>,
) -> Result<Response, ApiError> {
    let ctx = snap.authenticate(TrustLevel::SessionAndCsrf, session_cookie(&jar), Some(&form.csrf_token))?;
    let mut session = ctx.session;
    session.update_settings(form.into_settings(), snap.ids())?;
    let cookie = snap.codec().issue_cookie(&session, secure(&snap))?;
    Ok((jar.add(cookie), found("/")).into_response())
}

#[derive(Debug, Deserialize)]
struct CsrfForm {
    csrf_token: String,
}

async fn signout(
    Extension(snap): Extension<Arc<Snapshot>>,
    jar: CookieJar,
    Form(form): Form<CsrfForm>,
) -> Result<Response, ApiError> {
    let ctx = snap.authenticate(TrustLevel::SessionAndCsrf, session_cookie(&jar), Some(&form.csrf_token))?;
    if ctx.is_logged_in() {
        if let Some(remote) = ctx.remote() {
            if let Err(err) = remote.revoke_token().await {
                tracing::warn!(error = %err, instance = %ctx.session.instance, "token revocation failed");
            }
        }
    }
    Ok((jar.add(SessionCodec::expired_cookie()), found("/")).into_response())
}

#[derive(Debug, Deserialize)]
struct CssQuery {
    #[serde(default)]
    stamp: String,
}

async fn user_css(
    Extension(snap): Extension<Arc<Snapshot>>,
    jar: CookieJar,
    Query(query): Query<CssQuery>,
) -> Result<Response, ApiError> {
    let ctx = snap.authenticate(TrustLevel::SessionRequired, session_cookie(&jar), None)?;
    let settings = ctx.session.settings;
    if query.stamp.is_empty() {
        return Ok(([(header::CONTENT_TYPE, "text/css")], settings.css).into_response());
    }
    if query.stamp != settings.stamp {
        return Err(ApiError::NotFound);
    }
    Ok(([(header::CONTENT_TYPE, "text/css"), (header::CACHE_CONTROL, IMMUTABLE)], settings.css).into_response())
}

async fn health(Extension(snap): Extension<Arc<Snapshot>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": version(),
        "asset_stamp": snap.asset_stamp(),
    }))
}
