//! Resources derived from one configuration snapshot.
//!
//! A listener generation owns exactly one [`Snapshot`]. Requests clone the `Arc` when they arrive,
//! so a reload never changes the limits a request already started under.

use std::sync::Arc;

use crate::auth::{Authenticator, RequestContext, TrustLevel};
use crate::config::Configuration;
use crate::error::{AuthError, LifecycleError, RemoteError};
use crate::id::IdGenerator;
use crate::remote::{build_http_client, RemoteClient};
use crate::session::{new_csrf_token, SessionCodec};

#[derive(Debug)]
pub struct Snapshot {
    config: Arc<Configuration>,
    http: reqwest::Client,
    ids: Arc<IdGenerator>,
    asset_stamp: String,
    auth: Authenticator,
}

impl Snapshot {
    /// Build resources for `config`.
    ///
    /// The ID generator of `previous` is carried over when the node index is unchanged, so IDs
    /// stay monotonic across reloads.
    pub fn build(config: Arc<Configuration>, previous: Option<&Snapshot>) -> Result<Self, LifecycleError> {
        let http = build_http_client(&config).map_err(|e| LifecycleError::Resources(e.to_string()))?;
        let ids = match previous {
            Some(prev) if prev.ids.node() == config.node => prev.ids.clone(),
            _ => Arc::new(IdGenerator::new(config.node)),
        };
        let codec = SessionCodec::from_config(&config).map_err(|e| LifecycleError::Resources(e.to_string()))?;
        let asset_stamp = config.asset_stamp.resolve(&ids);
        let auth = Authenticator::new(codec, config.clone(), http.clone());
        Ok(Self { config, http, ids, asset_stamp, auth })
    }

    pub fn config(&self) -> &Arc<Configuration> {
        &self.config
    }

    /// Outbound client honoring this snapshot's timeout and user agent.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn ids(&self) -> &Arc<IdGenerator> {
        &self.ids
    }

    /// Asset version stamp for this listener generation.
    pub fn asset_stamp(&self) -> &str {
        &self.asset_stamp
    }

    pub fn codec(&self) -> &SessionCodec {
        self.auth.codec()
    }

    pub fn authenticate(
        &self,
        level: TrustLevel,
        cookie: Option<&str>,
        form_csrf: Option<&str>,
    ) -> Result<RequestContext, AuthError> {
        self.auth.authenticate(level, cookie, form_csrf)
    }

    /// Unauthenticated client for `instance`, capped by this snapshot's response limit.
    pub fn remote_for(&self, instance: &str) -> Result<RemoteClient, RemoteError> {
        RemoteClient::new(self.http.clone(), instance, self.config.response_limit)
    }

    pub fn new_csrf_token(&self) -> String {
        new_csrf_token(&self.ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AssetStampPolicy;
    use crate::id::NodeIndex;

    #[test]
    fn generator_survives_reload_with_same_node() {
        let first = Snapshot::build(Arc::new(Configuration::default()), None).unwrap();
        let same = Snapshot::build(Arc::new(Configuration::default()), Some(&first)).unwrap();
        assert!(Arc::ptr_eq(first.ids(), same.ids()));

        let moved = Configuration { node: NodeIndex::new(5).unwrap(), ..Configuration::default() };
        let moved = Snapshot::build(Arc::new(moved), Some(&same)).unwrap();
        assert!(!Arc::ptr_eq(same.ids(), moved.ids()));
        assert_eq!(moved.ids().generate().node(), 5);
    }

    #[test]
    fn stamp_is_resolved_per_build() {
        let cfg = Arc::new(Configuration { asset_stamp: AssetStampPolicy::Snowflake, ..Configuration::default() });
        let a = Snapshot::build(cfg.clone(), None).unwrap();
        let b = Snapshot::build(cfg, Some(&a)).unwrap();
        assert_ne!(a.asset_stamp(), b.asset_stamp());

        let lit = Arc::new(Configuration { asset_stamp: AssetStampPolicy::Literal("v1".into()), ..Configuration::default() });
        assert_eq!(Snapshot::build(lit, None).unwrap().asset_stamp(), "v1");
    }

    #[test]
    fn remote_clients_inherit_the_limit() {
        let cfg = Arc::new(Configuration { response_limit: 1000, ..Configuration::default() });
        let snap = Snapshot::build(cfg, None).unwrap();
        assert_eq!(snap.remote_for("social.example").unwrap().response_limit(), 1000);
        assert_ne!(snap.new_csrf_token(), snap.new_csrf_token());
    }
}
