//! `boardsock` server binary.
//!
//! Serves WebSocket sessions with the logging handler, loading bans from a
//! JSON file and reloading them on SIGHUP.

mod cli;

use std::{path::PathBuf, sync::Arc, time::Duration};

use boardsock::{
    LoggingHandler,
    config::SessionConfig,
    identity::BanList,
    registry::SessionRegistry,
    server::SessionServer,
};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();
    install_metrics(&cli)?;

    let bans = Arc::new(BanList::default());
    if let Some(path) = &cli.bans {
        bans.replace(BanList::load_file(path).await?);
        info!(count = bans.len(), path = %path.display(), "bans loaded");
    }

    let mut server = SessionServer::new(Arc::new(LoggingHandler), Arc::clone(&bans))
        .session_config(session_config(&cli));
    if let Some(workers) = cli.workers {
        server = server.workers(workers);
    }
    let server = server.bind(cli.bind)?;

    if let Some(path) = cli.bans.clone() {
        spawn_ban_reloader(path, bans, server.registry());
    }

    info!(addr = ?server.local_addr(), workers = server.worker_count(), "listening");
    server.run().await?;
    Ok(())
}

fn session_config(cli: &cli::Cli) -> SessionConfig {
    let limit = (cli.max_app_errors > 0).then_some(cli.max_app_errors);
    SessionConfig::default()
        .close_timeout(Duration::from_millis(cli.close_timeout_ms))
        .handshake_timeout(Duration::from_millis(cli.handshake_timeout_ms))
        .max_consecutive_app_errors(limit)
}

#[cfg(feature = "metrics")]
fn install_metrics(cli: &cli::Cli) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(addr) = cli.metrics_addr {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        info!(%addr, "serving metrics");
    }
    Ok(())
}

#[cfg(not(feature = "metrics"))]
fn install_metrics(cli: &cli::Cli) -> Result<(), Box<dyn std::error::Error>> {
    if cli.metrics_addr.is_some() {
        warn!("built without the metrics feature; ignoring --metrics-addr");
    }
    Ok(())
}

/// Reload `path` on every SIGHUP, replacing the ban list and disconnecting
/// sessions of newly banned addresses.
fn spawn_ban_reloader(path: PathBuf, bans: Arc<BanList>, registry: Arc<SessionRegistry>) {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        bans.listen(rx, move |ip| {
            registry.ban(ip);
        })
        .await;
    });
    tokio::spawn(reload_on_hangup(path, tx));
}

#[cfg(unix)]
async fn reload_on_hangup(path: PathBuf, updates: mpsc::Sender<Vec<boardsock::identity::Ban>>) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangups = match signal(SignalKind::hangup()) {
        Ok(hangups) => hangups,
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGHUP; bans will not be reloaded");
            return;
        }
    };
    while hangups.recv().await.is_some() {
        match BanList::load_file(&path).await {
            Ok(loaded) => {
                info!(count = loaded.len(), "reloading bans");
                if updates.send(loaded).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!(error = %e, path = %path.display(), "ban reload failed"),
        }
    }
}

#[cfg(not(unix))]
async fn reload_on_hangup(path: PathBuf, _updates: mpsc::Sender<Vec<boardsock::identity::Ban>>) {
    warn!(path = %path.display(), "ban reloading needs SIGHUP; bans are static on this platform");
}
