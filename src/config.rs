//! Configuration values and the `key = value` source format.
//!
//! A [`Configuration`] is immutable once parsed. Reloading produces a new value which is swapped in
//! wholesale through [`crate::store::ConfigStore`].

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::Rng;

use crate::error::ConfigError;
use crate::id::{IdGenerator, NodeIndex};

/// Outbound request timeout applied when none (or zero) is configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(8);
/// Outbound response-size cap applied when none (or zero) is configured.
pub const DEFAULT_RESPONSE_LIMIT: u64 = 8 << 20;
/// Upper bound on draining in-flight requests.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
/// Listen address used when the source does not set one.
pub const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:8080";
/// Minimum length of `session_secret`.
pub const MIN_SECRET_LEN: usize = 32;
/// Paths searched, in order, when no explicit config path is given.
pub const DEFAULT_CONFIG_PATHS: &[&str] = &["threadbare.conf", "/etc/threadbare.conf"];
/// Commented sample configuration covering every key.
pub const SAMPLE_CONFIG: &str = include_str!("../threadbare.conf");

/// Crate version string.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// A post format offered to the compose form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostFormat {
    pub name: String,
    pub mime_type: String,
}

impl PostFormat {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self { name: name.into(), mime_type: mime_type.into() }
    }
}

/// How the asset version stamp is chosen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AssetStampPolicy {
    /// Fresh random value on every (re)start.
    #[default]
    Random,
    /// Fresh snowflake ID on every (re)start.
    Snowflake,
    /// Fixed operator-supplied value.
    Literal(String),
}

impl AssetStampPolicy {
    /// Parse the `asset_stamp` value. Empty means [`AssetStampPolicy::Random`].
    pub fn parse(value: &str) -> Self {
        match value {
            "" | "random" => Self::Random,
            "snowflake" => Self::Snowflake,
            other => Self::Literal(other.to_string()),
        }
    }

    /// Produce the concrete stamp for a listener generation.
    pub fn resolve(&self, ids: &IdGenerator) -> String {
        match self {
            Self::Random => {
                let bytes: [u8; 8] = rand::rng().random();
                URL_SAFE_NO_PAD.encode(bytes)
            }
            Self::Snowflake => ids.generate().to_base64(),
            Self::Literal(s) => s.clone(),
        }
    }
}

/// Signing key for session cookies. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionSecret(String);

impl SessionSecret {
    /// Wrap a secret, enforcing the minimum length.
    pub fn new(secret: impl Into<String>) -> Option<Self> {
        let secret = secret.into();
        (secret.len() >= MIN_SECRET_LEN).then_some(Self(secret))
    }

    /// Raw key bytes.
    pub fn expose(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for SessionSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionSecret(<redacted>)")
    }
}

/// Immutable service configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    pub listen_address: String,
    pub client_name: String,
    pub client_scope: String,
    pub client_website: String,
    pub single_instance: Option<String>,
    pub user_agent: String,
    pub post_formats: Vec<PostFormat>,
    pub asset_stamp: AssetStampPolicy,
    pub node: NodeIndex,
    /// Maximum bytes read from any outbound response body.
    pub response_limit: u64,
    pub request_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub session_secret: Option<SessionSecret>,
}

impl Default for Configuration {
    fn default() -> Self {
        let client_website = format!("http://{DEFAULT_LISTEN_ADDRESS}");
        Self {
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            client_name: "threadbare".to_string(),
            client_scope: "read write follow".to_string(),
            user_agent: default_user_agent(&client_website),
            client_website,
            single_instance: None,
            post_formats: vec![PostFormat::new("PlainText", "text/plain")],
            asset_stamp: AssetStampPolicy::Random,
            node: NodeIndex::default(),
            response_limit: DEFAULT_RESPONSE_LIMIT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            session_secret: None,
        }
    }
}

fn default_user_agent(client_website: &str) -> String {
    format!("threadbare/{} (+{})", version(), client_website)
}

fn parse_duration(line: usize, key: &str, value: &str, default: Duration) -> Result<Duration, ConfigError> {
    let d = humantime::parse_duration(value).map_err(|e| ConfigError::invalid(line, key, e.to_string()))?;
    Ok(if d.is_zero() { default } else { d })
}

impl Configuration {
    /// Parse a configuration source.
    ///
    /// Blank lines and lines starting with `#` are skipped. Every other line must be
    /// `key = value`; omitted keys keep their defaults.
    pub fn parse(source: &str) -> Result<Self, ConfigError> {
        let mut c = Self::default();
        let mut website_set = false;
        let mut agent_set = false;

        for (i, raw) in source.lines().enumerate() {
            let line = i + 1;
            let text = raw.trim();
            if text.is_empty() || text.starts_with('#') {
                continue;
            }
            let (key, value) = match text.split_once('=') {
                Some((k, v)) if !k.trim().is_empty() => (k.trim(), v.trim()),
                _ => return Err(ConfigError::MalformedKey { line }),
            };

            match key {
                "listen_address" => {
                    if value.is_empty() {
                        return Err(ConfigError::invalid(line, key, "must not be empty"));
                    }
                    c.listen_address = value.to_string();
                }
                "client_name" => c.client_name = value.to_string(),
                "client_scope" => c.client_scope = value.to_string(),
                "client_website" => {
                    c.client_website = value.trim_end_matches('/').to_string();
                    website_set = true;
                }
                "single_instance" => {
                    c.single_instance = (!value.is_empty()).then(|| value.to_string());
                }
                "user_agent" => {
                    c.user_agent = value.to_string();
                    agent_set = !value.is_empty();
                }
                // Accepted for compatibility with older config files.
                "database_path" | "log_file" => {}
                "post_formats" => c.post_formats = parse_post_formats(line, key, value)?,
                "asset_stamp" => c.asset_stamp = AssetStampPolicy::parse(value),
                // An empty numeric value leaves the key unset.
                "snowflake_node_id"
                | "http_client_timeout"
                | "http_client_response_size_limit"
                | "shutdown_timeout"
                    if value.is_empty() => {}
                "snowflake_node_id" => {
                    let n: i64 = value.parse().map_err(|_| ConfigError::invalid(line, key, "not an integer"))?;
                    c.node = NodeIndex::new(n).map_err(|e| ConfigError::invalid(line, key, e.to_string()))?;
                }
                "http_client_timeout" => {
                    c.request_timeout = parse_duration(line, key, value, DEFAULT_REQUEST_TIMEOUT)?;
                }
                "http_client_response_size_limit" => {
                    let n: i64 = value.parse().map_err(|_| ConfigError::invalid(line, key, "not an integer"))?;
                    c.response_limit = match n {
                        n if n < 0 => return Err(ConfigError::invalid(line, key, "must not be negative")),
                        0 => DEFAULT_RESPONSE_LIMIT,
                        n => n as u64,
                    };
                }
                "shutdown_timeout" => {
                    c.shutdown_timeout = parse_duration(line, key, value, DEFAULT_SHUTDOWN_TIMEOUT)?;
                }
                "session_secret" => {
                    c.session_secret = if value.is_empty() {
                        None
                    } else {
                        Some(SessionSecret::new(value).ok_or_else(|| {
                            ConfigError::invalid(line, key, format!("must be at least {MIN_SECRET_LEN} characters"))
                        })?)
                    };
                }
                _ => return Err(ConfigError::UnknownKey { line, key: key.to_string() }),
            }
        }

        if !website_set {
            c.client_website = format!("http://{}", c.listen_address);
        }
        if !agent_set {
            c.user_agent = default_user_agent(&c.client_website);
        }
        Ok(c)
    }

    /// Read and parse a configuration from any reader.
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self, ConfigError> {
        let mut buf = String::new();
        reader.read_to_string(&mut buf)?;
        Self::parse(&buf)
    }

    /// The pinned remote instance, if sign-in is restricted to one.
    pub fn single_instance(&self) -> Option<&str> {
        self.single_instance.as_deref()
    }

    /// OAuth redirect target registered with remote instances.
    pub fn redirect_uri(&self) -> String {
        format!("{}/oauth_callback", self.client_website)
    }
}

impl FromStr for Configuration {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn parse_post_formats(line: usize, key: &str, value: &str) -> Result<Vec<PostFormat>, ConfigError> {
    value
        .split(',')
        .map(|pair| {
            let mut parts = pair.split(':');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(name), Some(mime), None) if !name.trim().is_empty() && !mime.trim().is_empty() => {
                    Ok(PostFormat::new(name.trim(), mime.trim()))
                }
                _ => Err(ConfigError::invalid(line, key, format!("expected name:mime-type, got `{}`", pair.trim()))),
            }
        })
        .collect()
}

/// Where the configuration is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    /// Standard input. Read once; cannot be reloaded.
    Stdin,
}

impl ConfigSource {
    /// Resolve a command-line argument: `-` is stdin, a path is a file, and `None` searches
    /// [`DEFAULT_CONFIG_PATHS`].
    pub fn from_arg(arg: Option<&str>) -> Result<Self, ConfigError> {
        match arg {
            Some("-") => Ok(Self::Stdin),
            Some(path) => Ok(Self::File(PathBuf::from(path))),
            None => Self::discover(DEFAULT_CONFIG_PATHS),
        }
    }

    /// First existing regular file among `candidates`.
    pub fn discover<P: AsRef<Path>>(candidates: &[P]) -> Result<Self, ConfigError> {
        candidates
            .iter()
            .map(AsRef::as_ref)
            .find(|p| p.is_file())
            .map(|p| Self::File(p.to_path_buf()))
            .ok_or_else(|| ConfigError::NotFound {
                searched: candidates.iter().map(|p| p.as_ref().display().to_string()).collect::<Vec<_>>().join(", "),
            })
    }

    /// Whether the source can be read again on reload.
    pub fn is_reloadable(&self) -> bool {
        matches!(self, Self::File(_))
    }

    /// Read and parse the source.
    pub fn load(&self) -> Result<Configuration, ConfigError> {
        match self {
            Self::File(path) => Configuration::parse(&std::fs::read_to_string(path)?),
            Self::Stdin => Configuration::from_reader(std::io::stdin().lock()),
        }
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Stdin => f.write_str("<stdin>"),
        }
    }
}
