//! Narrow client for the remote social API.
//!
//! Only the calls the auth core needs are modelled. Every response body is read through a size cap
//! taken from the configuration snapshot the client was built under.

use reqwest::{RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::Configuration;
use crate::error::RemoteError;
use crate::session::Session;

/// Shared outbound HTTP client honoring the configured timeout and user agent.
pub fn build_http_client(config: &Configuration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(config.request_timeout)
        .user_agent(config.user_agent.clone())
        .build()
}

/// Read a response body, failing once it exceeds `limit` bytes.
pub async fn read_limited(mut resp: Response, limit: u64) -> Result<Vec<u8>, RemoteError> {
    if resp.content_length().is_some_and(|len| len > limit) {
        return Err(RemoteError::ResponseTooLarge { limit });
    }
    let mut body = Vec::new();
    while let Some(chunk) = resp.chunk().await? {
        if (body.len() + chunk.len()) as u64 > limit {
            return Err(RemoteError::ResponseTooLarge { limit });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// Resolve an instance name to its base URL. Bare hosts are assumed to speak HTTPS.
pub fn instance_url(instance: &str) -> Result<Url, RemoteError> {
    let raw = if instance.contains("://") { instance.to_string() } else { format!("https://{instance}") };
    Url::parse(&raw).map_err(|e| RemoteError::InvalidUrl(format!("{raw}: {e}")))
}

/// Result of registering this front end as an OAuth app.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AppRegistration {
    pub client_id: String,
    pub client_secret: String,
}

/// The signed-in account.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Account {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub acct: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Remote API client bound to one instance and, optionally, one set of credentials.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
    base: Url,
    client_id: String,
    client_secret: String,
    access_token: String,
    limit: u64,
}

impl RemoteClient {
    pub fn new(http: reqwest::Client, instance: &str, limit: u64) -> Result<Self, RemoteError> {
        Ok(Self {
            http,
            base: instance_url(instance)?,
            client_id: String::new(),
            client_secret: String::new(),
            access_token: String::new(),
            limit,
        })
    }

    /// Client carrying the credentials stored in `session`.
    pub fn for_session(http: reqwest::Client, session: &Session, limit: u64) -> Result<Self, RemoteError> {
        Ok(Self::new(http, &session.instance, limit)?
            .with_credentials(&session.client_id, &session.client_secret)
            .with_access_token(&session.access_token))
    }

    pub fn with_credentials(mut self, client_id: &str, client_secret: &str) -> Self {
        self.client_id = client_id.to_string();
        self.client_secret = client_secret.to_string();
        self
    }

    pub fn with_access_token(mut self, token: &str) -> Self {
        self.access_token = token.to_string();
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Body-size cap applied to every response.
    pub fn response_limit(&self) -> u64 {
        self.limit
    }

    fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
        self.base.join(path).map_err(|e| RemoteError::InvalidUrl(format!("{path}: {e}")))
    }

    async fn send(&self, req: RequestBuilder) -> Result<Vec<u8>, RemoteError> {
        let resp = req.send().await?;
        let status = resp.status();
        let body = read_limited(resp, self.limit).await?;
        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or_else(|_| status.canonical_reason().unwrap_or("error").to_string());
            return Err(RemoteError::Status { status: status.as_u16(), message });
        }
        Ok(body)
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, RemoteError> {
        let body = self.send(req).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Register this front end with the instance.
    pub async fn register_app(&self, config: &Configuration) -> Result<AppRegistration, RemoteError> {
        let redirect_uri = config.redirect_uri();
        let form = [
            ("client_name", config.client_name.as_str()),
            ("redirect_uris", redirect_uri.as_str()),
            ("scopes", config.client_scope.as_str()),
            ("website", config.client_website.as_str()),
        ];
        self.send_json(self.http.post(self.endpoint("/api/v1/apps")?).form(&form)).await
    }

    /// Where to send the browser to approve the app.
    pub fn authorize_url(&self, config: &Configuration) -> Result<Url, RemoteError> {
        let mut url = self.endpoint("/oauth/authorize")?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &config.redirect_uri())
            .append_pair("scope", &config.client_scope);
        Ok(url)
    }

    /// Trade an authorization code for an access token.
    pub async fn exchange_code(&self, config: &Configuration, code: &str) -> Result<String, RemoteError> {
        let redirect_uri = config.redirect_uri();
        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("code", code),
            ("scope", config.client_scope.as_str()),
        ];
        let token: TokenResponse = self.send_json(self.http.post(self.endpoint("/oauth/token")?).form(&form)).await?;
        Ok(token.access_token)
    }

    /// The account owning the access token.
    pub async fn verify_credentials(&self) -> Result<Account, RemoteError> {
        let req = self
            .http
            .get(self.endpoint("/api/v1/accounts/verify_credentials")?)
            .bearer_auth(&self.access_token);
        self.send_json(req).await
    }

    /// Invalidate the access token on the instance.
    pub async fn revoke_token(&self) -> Result<(), RemoteError> {
        let form = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("token", self.access_token.as_str()),
        ];
        self.send(self.http.post(self.endpoint("/oauth/revoke")?).form(&form)).await?;
        Ok(())
    }
}
