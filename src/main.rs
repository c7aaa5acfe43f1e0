use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use vmsched::actuator::HttpActuator;
use vmsched::config::ConfigStore;
use vmsched::gateway::{self, GatewayState};
use vmsched::scheduler::Scheduler;
use vmsched::worker::WorkerConfig;

#[derive(Parser, Debug)]
#[command(name = "vmsched")]
#[command(version)]
#[command(about = "Power-state scheduler for VM pools across cloud clusters")]
struct Args {
    /// Directory holding clusters.json, schedules.json and settings.json
    #[arg(long, default_value = "config")]
    config_dir: PathBuf,

    /// Address the observer gateway listens on
    #[arg(long, default_value = "127.0.0.1:5000")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let store = ConfigStore::new(&args.config_dir);
    // Fail fast on a broken configuration directory before serving anything
    let clusters = store.load_clusters().await?;
    store.load_settings().await?;
    tracing::info!(
        config_dir = %args.config_dir.display(),
        clusters = clusters.len(),
        "Configuration loaded"
    );

    let shutdown = shutdown_token()?;

    let scheduler = Scheduler::spawn(
        store.clone(),
        Arc::new(HttpActuator::new()),
        WorkerConfig::default(),
        shutdown.clone(),
    );
    scheduler.reload().await?;

    gateway::serve(
        args.listen,
        GatewayState {
            scheduler,
            store,
        },
        shutdown,
    )
    .await;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Token cancelled on SIGTERM or ctrl-c. The scheduler's control task and
/// the gateway both watch it; in-flight workers terminate on their own.
fn shutdown_token() -> std::io::Result<CancellationToken> {
    let token = CancellationToken::new();
    let mut sigterm = signal(SignalKind::terminate())?;

    let handle = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down"),
            _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted, shutting down"),
        }
        handle.cancel();
    });

    Ok(token)
}
