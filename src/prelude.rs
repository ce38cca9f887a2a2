//! Convenient re-exports for common threadbare types.
pub use crate::{
    auth::{Authenticator, RequestContext, TrustLevel},
    config::{version, AssetStampPolicy, ConfigSource, Configuration, PostFormat},
    error::{AuthError, ConfigError, IdError, LifecycleError, RemoteError},
    http::ApiError,
    id::{Id, IdGenerator, NodeIndex},
    lifecycle::{ServiceLifecycle, ServiceState},
    session::{new_csrf_token, Session, SessionCodec, Settings},
    snapshot::Snapshot,
    store::ConfigStore,
    supervisor::{ControlEvent, Supervisor},
};
