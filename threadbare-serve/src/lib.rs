//! Process entry point for `threadbare`: argument parsing, logging, config discovery, and the
//! signal-driven supervisor.

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use threadbare::config::{version, ConfigSource, SAMPLE_CONFIG};
use threadbare::supervisor::spawn_signal_listener;
use threadbare::{ConfigStore, ServiceLifecycle, Supervisor};
use tokio::sync::mpsc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Server-rendered front end core for a remote social API.
#[derive(Parser, Debug)]
#[command(name = "threadbare", version, about, long_about = None)]
pub struct Args {
    /// Configuration file, or `-` for stdin. Defaults to the first of
    /// `threadbare.conf` and `/etc/threadbare.conf` that exists.
    #[arg(short = 'f', long = "config", value_name = "PATH")]
    pub config: Option<String>,

    /// Print a sample configuration and exit.
    #[arg(long, conflicts_with = "config")]
    pub write_config: bool,
}

/// Install the global subscriber. `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Run until terminated. Errors (including listener bind failures) end the process non-zero.
pub async fn run(args: Args) -> anyhow::Result<()> {
    if args.write_config {
        std::io::stdout().write_all(SAMPLE_CONFIG.as_bytes())?;
        return Ok(());
    }

    let source = ConfigSource::from_arg(args.config.as_deref())?;
    let store = ConfigStore::from_source(source.clone())
        .with_context(|| format!("loading configuration from {source}"))?;
    if !source.is_reloadable() {
        tracing::warn!("configuration read from stdin; SIGHUP reloads will be rejected");
    }

    let initial = (*store.get()).clone();
    tracing::info!(version = version(), config = %source, addr = %initial.listen_address, "starting");

    let supervisor = Supervisor::new(Arc::new(ServiceLifecycle::new(store)));
    let (tx, rx) = mpsc::channel(4);
    spawn_signal_listener(tx).context("installing signal handlers")?;
    supervisor.run(initial, rx).await?;
    Ok(())
}
