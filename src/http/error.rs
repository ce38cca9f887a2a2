//! Handler errors and their JSON rendering.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::{AuthError, RemoteError};
use crate::session::SettingsError;

/// Request-level failure. Converted to a response; never fatal to the service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("invalid settings: {0}")]
    Settings(#[from] SettingsError),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found")]
    NotFound,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// JSON error body. `retry` offers the user another attempt; `session_error` invites them to
/// sign in again.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub retry: bool,
    pub session_error: bool,
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, bool, bool) {
        match self {
            Self::Auth(AuthError::InvalidCsrfToken) => (StatusCode::FORBIDDEN, "invalid_csrf_token", false, false),
            Self::Auth(_) => (StatusCode::UNAUTHORIZED, "invalid_session", false, true),
            Self::Remote(e) if e.is_unauthorized() => (StatusCode::UNAUTHORIZED, "remote_unauthorized", false, true),
            Self::Remote(_) => (StatusCode::BAD_GATEWAY, "remote_error", true, false),
            Self::Settings(_) => (StatusCode::BAD_REQUEST, "invalid_settings", false, false),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request", false, false),
            Self::NotFound => (StatusCode::NOT_FOUND, "not_found", false, false),
            Self::Serialization(_) => (StatusCode::INTERNAL_SERVER_ERROR, "serialization_error", true, false),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, retry, session_error) = self.parts();
        match &self {
            Self::Remote(err) => tracing::warn!(error = %err, "remote api error"),
            Self::Serialization(err) => tracing::error!(error = %err, "serialization error"),
            _ => tracing::debug!(error = %self, "request rejected"),
        }
        let body = ErrorResponse { error: error.to_string(), message: self.to_string(), retry, session_error };
        (status, Json(body)).into_response()
    }
}
