//! Error types for configuration, identifiers, sessions, the remote API, and the service lifecycle.
use std::io;

/// Failure parsing or loading a configuration source.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// A non-comment line has no `=` (or nothing before it).
    #[error("line {line}: expected `key = value`")]
    MalformedKey { line: usize },
    /// The key is not recognized.
    #[error("line {line}: unknown config key `{key}`")]
    UnknownKey { line: usize, key: String },
    /// The value is out of range or unparsable.
    #[error("line {line}: invalid value for `{key}`: {reason}")]
    InvalidValue { line: usize, key: String, reason: String },
    /// The source was read from stdin and cannot be read again.
    #[error("configuration was read from stdin and cannot be reloaded")]
    NotReloadable,
    /// No explicit path was given and none of the default paths exist.
    #[error("no configuration file found (searched: {searched})")]
    NotFound { searched: String },
    /// Reading the source failed.
    #[error("reading configuration: {0}")]
    Io(#[from] io::Error),
}

impl ConfigError {
    pub(crate) fn invalid(line: usize, key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue { line, key: key.to_string(), reason: reason.into() }
    }

    /// Line number (1-based) the error refers to, if it came from parsing.
    pub fn line(&self) -> Option<usize> {
        match self {
            Self::MalformedKey { line }
            | Self::UnknownKey { line, .. }
            | Self::InvalidValue { line, .. } => Some(*line),
            _ => None,
        }
    }

    /// Check if this error is a `MalformedKey`.
    pub fn is_malformed_key(&self) -> bool {
        matches!(self, Self::MalformedKey { .. })
    }

    /// Check if this error is an `UnknownKey`.
    pub fn is_unknown_key(&self) -> bool {
        matches!(self, Self::UnknownKey { .. })
    }

    /// Check if this error is an `InvalidValue`.
    pub fn is_invalid_value(&self) -> bool {
        matches!(self, Self::InvalidValue { .. })
    }
}

/// Failure creating an ID generator.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    /// Node indices are limited to 0..=9.
    #[error("invalid node index {0} (expected 0-9)")]
    InvalidNodeIndex(i64),
}

/// Authentication failures surfaced to request handlers.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuthError {
    /// The session cookie is absent, malformed, or fails its integrity check.
    #[error("invalid session")]
    InvalidSession,
    /// The form CSRF token does not match the session's token.
    #[error("invalid csrf token")]
    InvalidCsrfToken,
}

/// Errors from the remote social API client.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum RemoteError {
    /// The remote answered with a non-success status.
    #[error("remote api returned {status}: {message}")]
    Status { status: u16, message: String },
    /// The response body exceeded the configured size cap.
    #[error("remote response exceeded {limit} bytes")]
    ResponseTooLarge { limit: u64 },
    /// A URL could not be built from the instance address.
    #[error("invalid remote url: {0}")]
    InvalidUrl(String),
    /// Connection, TLS, or timeout failure.
    #[error("remote request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The body was not the expected JSON.
    #[error("decoding remote response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl RemoteError {
    /// The remote rejected the credentials (401/403); callers should invite the user to sign in again.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status: 401 | 403, .. })
    }

    /// HTTP status returned by the remote, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Errors from starting, reconfiguring, or stopping the service.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum LifecycleError {
    /// The listener could not bind its address. Always fatal.
    #[error("binding listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    /// `start` was called while a listener is already managed.
    #[error("service already running")]
    AlreadyRunning,
    /// `replace_config` or `stop` was called with no running service.
    #[error("service is not running")]
    NotRunning,
    /// The listener failed while serving.
    #[error("listener failed: {0}")]
    Serve(#[source] io::Error),
    /// Resources derived from configuration could not be built.
    #[error("building service resources: {0}")]
    Resources(String),
    /// The restart after a configuration replacement failed; the service has stopped.
    #[error("restart after configuration replacement failed: {0}")]
    Restart(String),
    /// A reload could not produce a configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl LifecycleError {
    /// Check if this error is a listener bind failure.
    pub fn is_bind(&self) -> bool {
        matches!(self, Self::Bind { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn config_error_display_includes_line_and_key() {
        let err = ConfigError::UnknownKey { line: 7, key: "colour".into() };
        let msg = format!("{}", err);
        assert!(msg.contains("line 7"));
        assert!(msg.contains("colour"));
        assert_eq!(err.line(), Some(7));
        assert!(err.is_unknown_key());
        assert!(!err.is_malformed_key());
    }

    #[test]
    fn invalid_value_helper_builds_variant() {
        let err = ConfigError::invalid(3, "snowflake_node_id", "out of range");
        assert!(err.is_invalid_value());
        assert!(format!("{}", err).contains("out of range"));
    }

    #[test]
    fn io_errors_have_no_line() {
        let err = ConfigError::from(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert_eq!(err.line(), None);
        assert!(err.source().is_some());
    }

    #[test]
    fn remote_unauthorized_is_flagged() {
        let unauthorized = RemoteError::Status { status: 401, message: "nope".into() };
        let forbidden = RemoteError::Status { status: 403, message: "nope".into() };
        let missing = RemoteError::Status { status: 404, message: "nope".into() };
        assert!(unauthorized.is_unauthorized());
        assert!(forbidden.is_unauthorized());
        assert!(!missing.is_unauthorized());
        assert_eq!(missing.status(), Some(404));
        assert!(!RemoteError::ResponseTooLarge { limit: 10 }.is_unauthorized());
    }

    #[test]
    fn bind_error_keeps_source() {
        let err = LifecycleError::Bind {
            addr: "127.0.0.1:1".into(),
            source: io::Error::new(io::ErrorKind::AddrInUse, "in use"),
        };
        assert!(err.is_bind());
        assert!(err.source().is_some());
        assert!(format!("{}", err).contains("127.0.0.1:1"));
    }
}
