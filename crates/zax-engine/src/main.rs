//! zax-engine - per-workspace check daemon.
//!
//! Owns the Unix socket the CLI talks to and supervises the backend child
//! that owns the store. Bring-up follows the daemon-start protocol: the CLI
//! already holds the bring-up lock when it spawns us, so startup here is
//! strictly sequential - pid file, log, stale port cleanup, backend spawn,
//! port handshake, ping, socket bind.

mod backend;
mod check;
mod http;
mod normalize;
mod runner;

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::UnixListener;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use zax_core::cache::{
    BACKEND_PORT_FILE, ENGINE_LOG_FILE, ENGINE_PID_FILE, ENGINE_SOCKET_FILE,
};

use crate::backend::{BackendClient, BackendProcess};
use crate::http::{router, EngineState};

/// zax engine daemon
#[derive(Parser, Debug)]
#[command(name = "zax-engine")]
#[command(version, about, long_about = None)]
struct Args {
    /// Per-workspace cache directory
    #[arg(long)]
    cache_dir: PathBuf,

    /// Workspace root the backend watches
    #[arg(long)]
    workspace_root: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let cache_dir = args
        .cache_dir
        .canonicalize()
        .context("cache directory does not exist")?;

    // Everything the daemon says goes to engine.log, append-only.
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(cache_dir.join(ENGINE_LOG_FILE))
        .context("failed to open engine.log")?;
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Arc::new(
            log_file.try_clone().context("failed to clone log handle")?,
        ))
        .with_ansi(false)
        .init();

    info!(pid = std::process::id(), cache_dir = %cache_dir.display(), "engine starting");
    std::fs::write(
        cache_dir.join(ENGINE_PID_FILE),
        std::process::id().to_string(),
    )
    .context("failed to write engine.pid")?;

    let result = run(&args, &cache_dir, &log_file).await;

    // Lifetime files go away with the daemon, success or not.
    let _ = std::fs::remove_file(cache_dir.join(ENGINE_PID_FILE));
    let _ = std::fs::remove_file(cache_dir.join(BACKEND_PORT_FILE));
    let _ = std::fs::remove_file(cache_dir.join(ENGINE_SOCKET_FILE));

    if let Err(e) = &result {
        warn!(error = %e, "engine exiting with error");
    }
    result
}

async fn run(args: &Args, cache_dir: &std::path::Path, log_file: &std::fs::File) -> Result<()> {
    // Stale port files poison the handshake: the backend writes its port
    // only after binding, so anything present now is from a dead backend.
    let port_file = cache_dir.join(BACKEND_PORT_FILE);
    if port_file.exists() {
        std::fs::remove_file(&port_file).context("failed to remove stale port file")?;
    }

    let backend_process = BackendProcess::spawn(cache_dir, &args.workspace_root, log_file)
        .context("failed to spawn backend")?;
    let port = backend::wait_for_port(cache_dir).await?;
    info!(port, "backend published its port");

    let client = BackendClient::new(cache_dir.to_path_buf());
    let version = client
        .ping_until_healthy()
        .await
        .map_err(|e| anyhow::anyhow!("backend never became healthy: {e}"))?;
    info!(version, "backend healthy");

    // Socket bind is fatal on failure; a stale socket from a dead engine is
    // removed first.
    let socket_path = cache_dir.join(ENGINE_SOCKET_FILE);
    if socket_path.exists() {
        std::fs::remove_file(&socket_path).context("failed to remove stale socket")?;
    }
    let listener = UnixListener::bind(&socket_path).context("failed to bind Unix socket")?;
    info!(socket = %socket_path.display(), "engine listening");

    let state = Arc::new(EngineState::new(cache_dir.to_path_buf(), client));
    let app = router(state);

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let shutdown = async move {
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
    };

    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;

    info!("shutting down backend");
    backend_process.shutdown().await;

    serve_result.context("engine HTTP server failed")
}
