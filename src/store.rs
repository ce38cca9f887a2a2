//! Live configuration store.
//!
//! Readers take a cheap `Arc` snapshot with [`ConfigStore::get`] and never block; writers replace
//! the whole value. Subscribers are notified through a `watch` channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::watch;

use crate::config::{ConfigSource, Configuration};
use crate::error::ConfigError;

#[derive(Debug)]
struct Inner {
    current: ArcSwap<Configuration>,
    generation: AtomicU64,
    tx: watch::Sender<Arc<Configuration>>,
    source: Option<ConfigSource>,
}

/// Shared handle to the active [`Configuration`] snapshot.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    inner: Arc<Inner>,
}

impl ConfigStore {
    /// Store holding `initial`, with no source to reload from.
    pub fn new(initial: Configuration) -> Self {
        Self::build(initial, None)
    }

    /// Store holding `initial`, reloadable from `source`.
    pub fn with_source(initial: Configuration, source: ConfigSource) -> Self {
        Self::build(initial, Some(source))
    }

    /// Load `source` and build a store around it.
    pub fn from_source(source: ConfigSource) -> Result<Self, ConfigError> {
        let initial = source.load()?;
        Ok(Self::with_source(initial, source))
    }

    fn build(initial: Configuration, source: Option<ConfigSource>) -> Self {
        let initial = Arc::new(initial);
        let (tx, _) = watch::channel(initial.clone());
        Self {
            inner: Arc::new(Inner {
                current: ArcSwap::new(initial),
                generation: AtomicU64::new(0),
                tx,
                source,
            }),
        }
    }

    /// Snapshot the active configuration.
    pub fn get(&self) -> Arc<Configuration> {
        self.inner.current.load_full()
    }

    /// Number of replacements since construction.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Install `config` as the active snapshot and notify subscribers.
    pub fn replace(&self, config: impl Into<Arc<Configuration>>) -> Arc<Configuration> {
        let config = config.into();
        self.inner.current.store(config.clone());
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        self.inner.tx.send_replace(config.clone());
        config
    }

    /// Receiver that observes every subsequent replacement.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Configuration>> {
        self.inner.tx.subscribe()
    }

    /// Where the configuration was loaded from, if known.
    pub fn source(&self) -> Option<&ConfigSource> {
        self.inner.source.as_ref()
    }

    /// Re-read and parse the source without installing the result.
    ///
    /// Failures leave the active snapshot untouched.
    pub fn reload(&self) -> Result<Configuration, ConfigError> {
        match &self.inner.source {
            Some(source) if source.is_reloadable() => source.load(),
            _ => Err(ConfigError::NotReloadable),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(addr: &str) -> Configuration {
        Configuration { listen_address: addr.to_string(), ..Configuration::default() }
    }

    #[test]
    fn get_replace_generation() {
        let store = ConfigStore::new(config("127.0.0.1:1"));
        let before = store.get();
        assert_eq!(store.generation(), 0);
        store.replace(config("127.0.0.1:2"));
        assert_eq!(store.get().listen_address, "127.0.0.1:2");
        assert_eq!(store.generation(), 1);
        // Previously captured snapshots stay intact.
        assert_eq!(before.listen_address, "127.0.0.1:1");
    }

    #[tokio::test]
    async fn subscribers_see_replacements() {
        let store = ConfigStore::new(config("127.0.0.1:1"));
        let mut rx = store.subscribe();
        store.replace(config("127.0.0.1:3"));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().listen_address, "127.0.0.1:3");
    }

    #[test]
    fn reload_without_reloadable_source_fails() {
        let store = ConfigStore::new(Configuration::default());
        assert!(matches!(store.reload(), Err(ConfigError::NotReloadable)));
        let store = ConfigStore::with_source(Configuration::default(), ConfigSource::Stdin);
        assert!(matches!(store.reload(), Err(ConfigError::NotReloadable)));
    }
}
