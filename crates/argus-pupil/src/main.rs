//! argus-pupil - sidecar supervision for a customer worker.
//!
//! Boot order: replay any persisted recovery record first (its send path
//! may itself request shutdown if NOC is still down), then start the
//! watchdog and the listener. The NOC client's exhausted-retries path flips
//! the same shutdown channel the signal handlers use, so a dead NOC drains
//! the process gracefully and the next boot retries from disk.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use argus_pupil::config::PupilConfig;
use argus_pupil::handler::{EventDispatcher, PupilHandler};
use argus_pupil::listener::{self, ListenerState};
use argus_pupil::noc_client::{replay_recovery, PupilNocClient};
use argus_pupil::recovery::RecoveryStore;
use argus_pupil::watchdog::PupilWatchdog;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// argus pupil - worker supervision sidecar
#[derive(Parser, Debug)]
#[command(name = "argus-pupil")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the pupil configuration file
    #[arg(short, long, default_value = "pupil.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = PupilConfig::load(&args.config)
        .with_context(|| format!("failed to load config from {:?}", args.config))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let recovery = Arc::new(RecoveryStore::new(&config.persistence));
    let recovering = recovery.exists();

    let noc = Arc::new(
        PupilNocClient::new(
            config.noc_client.clone(),
            Arc::clone(&recovery),
            shutdown_tx.clone(),
        )
        .context("failed to build NOC client")?,
    );

    // Replay before anything else: if NOC is still down this flips the
    // shutdown channel and the boot below drains immediately.
    replay_recovery(&recovery, &noc).await;

    let watchdog = PupilWatchdog::new(config.watchdog.clone(), recovering, Arc::clone(&noc));
    watchdog.start();

    // Deployments register their handlers here before the listener starts.
    let events = EventDispatcher::new(Vec::new(), &config.event_handler);
    let handler = PupilHandler::new(Arc::clone(&watchdog), Arc::clone(&noc), events);

    let state = Arc::new(ListenerState {
        handler,
        api_key: config.listener.api_key.clone(),
        watchdog: Arc::clone(&watchdog),
    });
    let app = listener::router(&config.listener, state);

    // Unix signals flip the shutdown channel.
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT");
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
        let _ = signal_tx.send(true);
    });

    info!(
        port = config.listener.port,
        https = config.listener.use_https,
        recovering,
        "argus pupil started (pid: {})",
        std::process::id()
    );

    listener::serve(&config.listener, app, shutdown_rx).await?;

    watchdog.stop();
    info!("pupil shutdown complete");
    Ok(())
}
