#![forbid(unsafe_code)]

//! # threadbare
//!
//! Service lifecycle and authentication core for a server-rendered front end to a remote social
//! API.
//!
//! - **Hot-reloadable configuration**: [`ConfigStore`] holds an immutable [`Configuration`]
//!   snapshot that is swapped wholesale on reload.
//! - **Zero-downtime restarts**: [`ServiceLifecycle`] drains the listener, installs the new
//!   snapshot, and listens again, while requests already in flight finish under the old one.
//! - **Stateless sessions**: [`SessionCodec`] carries the whole session in a cookie, optionally
//!   HMAC-tagged; [`Authenticator`] classifies requests as anonymous, session, or session + CSRF.
//! - **Snowflake IDs**: [`IdGenerator`] mints node-partitioned, time-ordered IDs for CSRF tokens
//!   and cache-busting stamps.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use threadbare::{ConfigSource, ConfigStore, ServiceLifecycle, Supervisor};
//! use threadbare::supervisor::spawn_signal_listener;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = ConfigStore::from_source(ConfigSource::from_arg(None)?)?;
//!     let initial = (*store.get()).clone();
//!     let supervisor = Supervisor::new(Arc::new(ServiceLifecycle::new(store)));
//!
//!     let (tx, rx) = tokio::sync::mpsc::channel(4);
//!     spawn_signal_listener(tx)?;
//!     supervisor.run(initial, rx).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod id;
pub mod lifecycle;
pub mod prelude;
pub mod remote;
pub mod session;
pub mod snapshot;
pub mod store;
pub mod supervisor;

// Re-exports
pub use auth::{Authenticator, RequestContext, TrustLevel};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AssetStampPolicy, ConfigSource, Configuration, PostFormat, SessionSecret};
pub use error::{AuthError, ConfigError, IdError, LifecycleError, RemoteError};
pub use id::{Id, IdGenerator, NodeIndex};
pub use lifecycle::{ServiceLifecycle, ServiceState};
pub use remote::RemoteClient;
pub use session::{Session, SessionCodec, Settings};
pub use snapshot::Snapshot;
pub use store::ConfigStore;
pub use supervisor::{ControlEvent, Supervisor};
