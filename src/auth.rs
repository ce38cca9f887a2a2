//! Per-request authentication.
//!
//! [`Authenticator::authenticate`] classifies a request by the trust level its route demands and
//! yields a [`RequestContext`] or a typed failure.

use std::sync::Arc;

use crate::config::Configuration;
use crate::error::AuthError;
use crate::remote::RemoteClient;
use crate::session::{Session, SessionCodec};

/// Minimum authentication strength a route requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrustLevel {
    /// Any visitor. The cookie is decoded when present and valid.
    Anonymous,
    /// A decodable session cookie.
    SessionRequired,
    /// A session plus a form CSRF token equal to the session's token.
    SessionAndCsrf,
}

/// Everything a handler knows about the request's caller.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub trust: TrustLevel,
    pub session: Session,
    /// Bound to the session's credentials for non-anonymous trust levels.
    pub remote: Option<RemoteClient>,
    /// Configuration in effect when the request arrived.
    pub config: Arc<Configuration>,
}

impl RequestContext {
    pub fn is_logged_in(&self) -> bool {
        self.session.is_logged_in()
    }

    pub fn remote(&self) -> Option<&RemoteClient> {
        self.remote.as_ref()
    }
}

/// Classifies requests against one configuration snapshot.
#[derive(Debug, Clone)]
pub struct Authenticator {
    codec: SessionCodec,
    config: Arc<Configuration>,
    http: reqwest::Client,
}

impl Authenticator {
    pub fn new(codec: SessionCodec, config: Arc<Configuration>, http: reqwest::Client) -> Self {
        Self { codec, config, http }
    }

    pub fn codec(&self) -> &SessionCodec {
        &self.codec
    }

    /// Authenticate a request.
    ///
    /// `cookie` is the raw session cookie value; `form_csrf` is the token submitted with the
    /// request body. Anonymous requests never fail.
    pub fn authenticate(
        &self,
        level: TrustLevel,
        cookie: Option<&str>,
        form_csrf: Option<&str>,
    ) -> Result<RequestContext, AuthError> {
        let decoded = cookie.ok_or(AuthError::InvalidSession).and_then(|c| self.codec.decode(c));

        let session = match (level, decoded) {
            (TrustLevel::Anonymous, decoded) => {
                return Ok(self.context(level, decoded.unwrap_or_default(), None));
            }
            (_, decoded) => decoded?,
        };

        if level == TrustLevel::SessionAndCsrf {
            let stored = session.csrf_token.as_str();
            // A session that never received a token cannot authorize mutations.
            if stored.is_empty() || form_csrf != Some(stored) {
                return Err(AuthError::InvalidCsrfToken);
            }
        }

        // A session whose instance cannot form a URL still authenticates; calls that need the
        // remote fail later with a remote error.
        let remote = RemoteClient::for_session(self.http.clone(), &session, self.config.response_limit).ok();
        Ok(self.context(level, session, remote))
    }

    fn context(&self, trust: TrustLevel, session: Session, remote: Option<RemoteClient>) -> RequestContext {
        RequestContext { trust, session, remote, config: self.config.clone() }
    }
}
