//! Turns operator signals into lifecycle transitions.
//!
//! - `SIGHUP`: re-read the configuration source and, if it parses, replace the running config
//! - `SIGTERM` / `SIGINT`: drain and stop

use std::io;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{info, warn};

use crate::config::Configuration;
use crate::error::LifecycleError;
use crate::lifecycle::ServiceLifecycle;

/// Operator request delivered to the [`Supervisor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    Reload,
    Terminate,
}

/// Forward process signals to `events` until the receiver goes away.
#[cfg(unix)]
pub fn spawn_signal_listener(events: mpsc::Sender<ControlEvent>) -> io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    Ok(tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                Some(()) = hangup.recv() => {
                    info!("received SIGHUP, reloading configuration");
                    ControlEvent::Reload
                }
                Some(()) = terminate.recv() => {
                    info!("received SIGTERM, shutting down");
                    ControlEvent::Terminate
                }
                Some(()) = interrupt.recv() => {
                    info!("received SIGINT, shutting down");
                    ControlEvent::Terminate
                }
                else => break,
            };
            if events.send(event).await.is_err() {
                break;
            }
        }
    }))
}

/// Forward Ctrl-C to `events` until the receiver goes away.
#[cfg(not(unix))]
pub fn spawn_signal_listener(events: mpsc::Sender<ControlEvent>) -> io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl-C, shutting down");
            if events.send(ControlEvent::Terminate).await.is_err() {
                break;
            }
        }
    }))
}

enum Event {
    Exited(Result<Result<(), LifecycleError>, JoinError>),
    Control(Option<ControlEvent>),
}

fn joined(res: Result<Result<(), LifecycleError>, JoinError>) -> Result<(), LifecycleError> {
    res.map_err(|e| LifecycleError::Serve(io::Error::other(e)))?
}

/// Drives a [`ServiceLifecycle`] from [`ControlEvent`]s.
#[derive(Debug, Clone)]
pub struct Supervisor {
    lifecycle: Arc<ServiceLifecycle>,
}

impl Supervisor {
    pub fn new(lifecycle: Arc<ServiceLifecycle>) -> Self {
        Self { lifecycle }
    }

    pub fn lifecycle(&self) -> &Arc<ServiceLifecycle> {
        &self.lifecycle
    }

    /// Re-read the configuration source and apply it.
    ///
    /// A source that fails to load or parse leaves the running configuration untouched and is
    /// reported as [`LifecycleError::Config`].
    pub async fn reload(&self) -> Result<(), LifecycleError> {
        let store = self.lifecycle.store();
        let config = match store.reload() {
            Ok(config) => config,
            Err(err) => {
                warn!(error = %err, "reload rejected; keeping current configuration");
                return Err(err.into());
            }
        };
        self.lifecycle.replace_config(config).await
    }

    /// Start the service with `initial` and react to `events` until terminated or the service fails.
    pub async fn run(
        &self,
        initial: Configuration,
        mut events: mpsc::Receiver<ControlEvent>,
    ) -> Result<(), LifecycleError> {
        let lifecycle = self.lifecycle.clone();
        let mut service = tokio::spawn(async move { lifecycle.start(initial).await });

        loop {
            let event = tokio::select! {
                res = &mut service => Event::Exited(res),
                ev = events.recv() => Event::Control(ev),
            };

            match event {
                Event::Exited(res) => return joined(res),
                Event::Control(Some(ControlEvent::Reload)) => {
                    // Rejected reloads are logged by `reload`; a failed restart ends the
                    // service, which the next iteration observes.
                    if let Err(err) = self.reload().await {
                        if !matches!(err, LifecycleError::Config(_)) {
                            warn!(error = %err, "reload failed");
                        }
                    }
                }
                Event::Control(Some(ControlEvent::Terminate)) | Event::Control(None) => {
                    return self.shutdown(service).await;
                }
            }
        }
    }

    async fn shutdown(&self, mut service: JoinHandle<Result<(), LifecycleError>>) -> Result<(), LifecycleError> {
        loop {
            match self.lifecycle.stop().await {
                Ok(()) => break,
                // Terminated before the first listener came up.
                Err(LifecycleError::NotRunning) if !service.is_finished() => {
                    tokio::select! {
                        res = &mut service => return joined(res),
                        _ = self.lifecycle.wait_until_serving() => {}
                    }
                }
                Err(LifecycleError::NotRunning) => break,
                Err(err) => {
                    warn!(error = %err, "stop failed");
                    break;
                }
            }
        }
        joined(service.await)
    }
}
