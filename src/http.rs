//! HTTP surface of the auth core.
//!
//! - [`routes::router`]: sign-in, OAuth callback, settings, sign-out, user CSS, and health routes.
//! - [`middleware::apply`]: the ordered middleware list wrapped around every listener's router.
//! - [`ApiError`]: request-level failures rendered as JSON.
//!
//! Handlers never read the live [`crate::store::ConfigStore`]; they use the
//! [`crate::snapshot::Snapshot`] injected by [`middleware::SnapshotLayer`], so each request runs
//! entirely against the configuration its listener was started with.

pub mod error;
pub mod middleware;
pub mod routes;

pub use error::{ApiError, ErrorResponse};
pub use middleware::{apply, SnapshotLayer, SnapshotService};
pub use routes::router;
