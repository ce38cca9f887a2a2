//! Listener lifecycle: start, zero-downtime reconfiguration, and graceful stop.
//!
//! One control loop owns the listener. [`ServiceLifecycle::replace_config`] and
//! [`ServiceLifecycle::stop`] send it commands over a channel and wait for the reply; a transition
//! lock serializes those callers so at most one transition is ever in flight.
//!
//! ```text
//! Stopped -> Starting -> Serving -> Draining -> Stopped
//!                           ^           |
//!                           +-----------+  (reload)
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::Configuration;
use crate::error::LifecycleError;
use crate::http;
use crate::snapshot::Snapshot;
use crate::store::ConfigStore;

/// Externally visible phase of the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Starting,
    Serving,
    /// The listener no longer accepts; in-flight requests are finishing. Also covers the rebuild
    /// that follows during a reload.
    Draining,
}

type Reply = oneshot::Sender<Result<(), LifecycleError>>;

enum Command {
    Replace(Box<Configuration>, Reply),
    Stop(Reply),
}

enum Event {
    Exited(Result<io::Result<()>, tokio::task::JoinError>),
    Command(Option<Command>),
}

struct Listener {
    addr: SocketAddr,
    drain_timeout: Duration,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<io::Result<()>>,
}

/// Owns the HTTP listener and the resources derived from the active configuration.
pub struct ServiceLifecycle {
    store: ConfigStore,
    router: Router,
    commands: Mutex<Option<mpsc::Sender<Command>>>,
    transition: tokio::sync::Mutex<()>,
    state: watch::Sender<ServiceState>,
    bound: watch::Sender<Option<SocketAddr>>,
    snapshot: ArcSwapOption<Snapshot>,
}

impl std::fmt::Debug for ServiceLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceLifecycle")
            .field("state", &*self.state.borrow())
            .field("addr", &*self.bound.borrow())
            .field("generation", &self.store.generation())
            .finish()
    }
}

impl ServiceLifecycle {
    /// Lifecycle serving the built-in routes.
    pub fn new(store: ConfigStore) -> Self {
        Self::with_router(store, http::router())
    }

    /// Lifecycle serving `router`. The middleware list is applied on every (re)start.
    pub fn with_router(store: ConfigStore, router: Router) -> Self {
        Self {
            store,
            router,
            commands: Mutex::new(None),
            transition: tokio::sync::Mutex::new(()),
            state: watch::channel(ServiceState::Stopped).0,
            bound: watch::channel(None).0,
            snapshot: ArcSwapOption::empty(),
        }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn state(&self) -> ServiceState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ServiceState> {
        self.state.subscribe()
    }

    /// Address the current listener is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound.borrow()
    }

    /// Resolves once a listener is serving; `None` if the lifecycle was dropped.
    pub async fn wait_until_serving(&self) -> Option<SocketAddr> {
        let mut rx = self.state.subscribe();
        rx.wait_for(|s| *s == ServiceState::Serving).await.ok()?;
        self.local_addr()
    }

    /// Resources of the most recently started listener.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.snapshot.load_full()
    }

    fn sender(&self) -> Option<mpsc::Sender<Command>> {
        self.commands.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Bind `initial.listen_address` and serve until [`stop`](Self::stop) is requested or the
    /// listener fails.
    ///
    /// Bind failures, including the rebind after a replacement, are returned as errors.
    pub async fn start(&self, initial: Configuration) -> Result<(), LifecycleError> {
        let (tx, mut rx) = mpsc::channel(8);
        {
            let mut commands = self.commands.lock().unwrap_or_else(PoisonError::into_inner);
            if commands.is_some() {
                return Err(LifecycleError::AlreadyRunning);
            }
            *commands = Some(tx);
        }

        let result = self.run(initial, &mut rx).await;

        *self.commands.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.bound.send_replace(None);
        self.state.send_replace(ServiceState::Stopped);
        match &result {
            Ok(()) => tracing::info!("service stopped"),
            Err(err) => tracing::error!(error = %err, "service failed"),
        }
        result
    }

    async fn run(&self, initial: Configuration, rx: &mut mpsc::Receiver<Command>) -> Result<(), LifecycleError> {
        self.state.send_replace(ServiceState::Starting);
        let config = self.store.replace(initial);
        let mut listener = self.launch(self.build(config)?).await?;

        loop {
            let event = tokio::select! {
                res = &mut listener.task => Event::Exited(res),
                cmd = rx.recv() => Event::Command(cmd),
            };

            match event {
                Event::Exited(res) => {
                    let err = match res {
                        Ok(Ok(())) => io::Error::other("listener exited unexpectedly"),
                        Ok(Err(err)) => err,
                        Err(join) => io::Error::other(join),
                    };
                    return Err(LifecycleError::Serve(err));
                }
                Event::Command(Some(Command::Replace(config, reply))) => {
                    match self.restart(listener, *config).await {
                        Ok(next) => {
                            listener = next;
                            let _ = reply.send(Ok(()));
                        }
                        Err(err) => {
                            let _ = reply.send(Err(LifecycleError::Restart(err.to_string())));
                            return Err(err);
                        }
                    }
                }
                Event::Command(Some(Command::Stop(reply))) => {
                    self.drain(listener).await;
                    let _ = reply.send(Ok(()));
                    return Ok(());
                }
                Event::Command(None) => {
                    self.drain(listener).await;
                    return Ok(());
                }
            }
        }
    }

    fn build(&self, config: Arc<Configuration>) -> Result<Arc<Snapshot>, LifecycleError> {
        let previous = self.snapshot.load_full();
        Ok(Arc::new(Snapshot::build(config, previous.as_deref())?))
    }

    async fn launch(&self, snapshot: Arc<Snapshot>) -> Result<Listener, LifecycleError> {
        let config = snapshot.config().clone();
        let listener = TcpListener::bind(config.listen_address.as_str())
            .await
            .map_err(|source| LifecycleError::Bind { addr: config.listen_address.clone(), source })?;
        let addr = listener.local_addr().map_err(LifecycleError::Serve)?;

        let app = http::apply(self.router.clone(), snapshot.clone());
        let (shutdown, signal) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = signal.await;
                })
                .await
        });

        self.snapshot.store(Some(snapshot));
        self.bound.send_replace(Some(addr));
        self.state.send_replace(ServiceState::Serving);
        tracing::info!(%addr, node = %config.node, generation = self.store.generation(), "serving");
        Ok(Listener { addr, drain_timeout: config.shutdown_timeout, shutdown, task })
    }

    /// Stop accepting, then wait for in-flight requests, bounded by the listener's shutdown
    /// timeout. Errors here are logged and never fatal.
    async fn drain(&self, listener: Listener) {
        let Listener { addr, drain_timeout, shutdown, mut task } = listener;
        self.state.send_replace(ServiceState::Draining);
        tracing::info!(%addr, "draining");
        let _ = shutdown.send(());

        match tokio::time::timeout(drain_timeout, &mut task).await {
            Ok(Ok(Ok(()))) => tracing::info!(%addr, "drained"),
            Ok(Ok(Err(err))) => tracing::warn!(%addr, error = %err, "listener closed with error"),
            Ok(Err(err)) => tracing::warn!(%addr, error = %err, "listener task failed"),
            Err(_) => {
                tracing::warn!(%addr, timeout = ?drain_timeout, "drain timed out; closing listener");
                task.abort();
                let _ = task.await;
            }
        }
        self.bound.send_replace(None);
    }

    async fn restart(&self, listener: Listener, config: Configuration) -> Result<Listener, LifecycleError> {
        self.drain(listener).await;
        let config = self.store.replace(config);
        let next = self.launch(self.build(config)?).await?;
        tracing::info!(generation = self.store.generation(), "configuration replaced");
        Ok(next)
    }

    /// Drain the current listener, install `config`, and listen again under it.
    ///
    /// Returns once the new listener is serving. A failed rebind stops the service; there is no
    /// fallback to the previous configuration.
    pub async fn replace_config(&self, config: Configuration) -> Result<(), LifecycleError> {
        let _transition = self.transition.lock().await;
        let tx = self.sender().ok_or(LifecycleError::NotRunning)?;
        let (reply, done) = oneshot::channel();
        tx.send(Command::Replace(Box::new(config), reply)).await.map_err(|_| LifecycleError::NotRunning)?;
        done.await.map_err(|_| LifecycleError::NotRunning)?
    }

    /// Drain the listener and end [`start`](Self::start).
    pub async fn stop(&self) -> Result<(), LifecycleError> {
        let _transition = self.transition.lock().await;
        let tx = self.sender().ok_or(LifecycleError::NotRunning)?;
        let (reply, done) = oneshot::channel();
        tx.send(Command::Stop(reply)).await.map_err(|_| LifecycleError::NotRunning)?;
        done.await.map_err(|_| LifecycleError::NotRunning)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> Configuration {
        Configuration { listen_address: "127.0.0.1:0".into(), ..Configuration::default() }
    }

    #[tokio::test]
    async fn commands_without_start_are_rejected() {
        let lc = ServiceLifecycle::new(ConfigStore::new(loopback()));
        assert!(matches!(lc.stop().await, Err(LifecycleError::NotRunning)));
        assert!(matches!(lc.replace_config(loopback()).await, Err(LifecycleError::NotRunning)));
        assert_eq!(lc.state(), ServiceState::Stopped);
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let lc = Arc::new(ServiceLifecycle::new(ConfigStore::new(loopback())));
        let run = tokio::spawn({
            let lc = lc.clone();
            async move { lc.start(loopback()).await }
        });
        lc.wait_until_serving().await.unwrap();
        assert!(matches!(lc.start(loopback()).await, Err(LifecycleError::AlreadyRunning)));
        lc.stop().await.unwrap();
        run.await.unwrap().unwrap();
        assert_eq!(lc.state(), ServiceState::Stopped);
        assert!(lc.local_addr().is_none());
    }
}
