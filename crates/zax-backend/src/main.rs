//! zax-backend - artifact store and delta service.
//!
//! Spawned by the engine with the cache directory and workspace root. Binds
//! an ephemeral localhost TCP port, publishes it via `<cache>/rust.port`
//! (written atomically, only after the listener is bound), then serves
//! framed-JSON RPCs until SIGTERM.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use zax_core::cache::BACKEND_PORT_FILE;
use zax_core::ipc::{frame_message, parse_frame_length, BackendRequest, BackendResponse, ErrorCode};

use zax_backend::affected::AffectedSelector;
use zax_backend::rpc::{dispatch, RpcState};
use zax_backend::store::Store;

/// zax backend service
#[derive(Parser, Debug)]
#[command(name = "zax-backend")]
#[command(version, about, long_about = None)]
struct Args {
    /// Per-workspace cache directory
    cache_dir: PathBuf,

    /// Workspace root the checks run against
    workspace_root: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Stderr only: the engine redirects it into engine.log.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    run(args).await
}

async fn run(args: Args) -> Result<()> {
    let cache_dir = args
        .cache_dir
        .canonicalize()
        .context("cache directory does not exist")?;

    // Storage before the port file: a published port implies a usable store.
    let store = Store::open(&cache_dir).context("failed to open state database")?;

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("failed to bind localhost listener")?;
    let port = listener.local_addr()?.port();
    write_port_file(&cache_dir, port).await?;
    info!(port, cache_dir = %cache_dir.display(), "backend listening");

    let state = Arc::new(RpcState {
        selector: AffectedSelector::new(args.workspace_root.clone()),
        store: Mutex::new(store),
        cache_dir,
    });

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "connection accepted");
                        let state = Arc::clone(&state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, state).await {
                                debug!("connection handler error: {e}");
                            }
                        });
                    },
                    Err(e) => error!("accept failed: {e}"),
                }
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                break;
            }
            _ = sigint.recv() => {
                info!("received SIGINT, shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Publishes the bound port, atomically: sibling tmp file then rename.
async fn write_port_file(cache_dir: &std::path::Path, port: u16) -> Result<()> {
    let final_path = cache_dir.join(BACKEND_PORT_FILE);
    let tmp_path = cache_dir.join(format!("{BACKEND_PORT_FILE}.tmp"));
    tokio::fs::write(&tmp_path, format!("{port}\n"))
        .await
        .context("failed to write port file")?;
    tokio::fs::rename(&tmp_path, &final_path)
        .await
        .context("failed to publish port file")?;
    Ok(())
}

/// Serves framed requests on one connection until it closes.
async fn handle_connection(mut stream: TcpStream, state: Arc<RpcState>) -> Result<()> {
    loop {
        let Some(request) = read_request(&mut stream).await? else {
            return Ok(());
        };

        let response = match request {
            Ok(request) => {
                let state = Arc::clone(&state);
                tokio::task::spawn_blocking(move || dispatch(&state, request))
                    .await
                    .unwrap_or_else(|e| BackendResponse::Error {
                        code: ErrorCode::Internal,
                        message: format!("dispatch task failed: {e}"),
                    })
            },
            Err(message) => {
                warn!("rejecting malformed request: {message}");
                BackendResponse::Error {
                    code: ErrorCode::InvalidArgument,
                    message,
                }
            },
        };

        send_response(&mut stream, &response).await?;
    }
}

/// Reads one framed request. Outer `None` means the peer closed; inner
/// `Err` is a malformed payload the caller should answer with an error.
async fn read_request(stream: &mut TcpStream) -> Result<Option<Result<BackendRequest, String>>> {
    let mut prefix = [0u8; 4];
    match stream.read_exact(&mut prefix).await {
        Ok(_) => {},
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = parse_frame_length(&prefix).context("invalid frame length")?;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;

    Ok(Some(
        serde_json::from_slice(&payload).map_err(|e| format!("invalid request JSON: {e}")),
    ))
}

async fn send_response(stream: &mut TcpStream, response: &BackendResponse) -> Result<()> {
    let payload = serde_json::to_vec(response).context("failed to serialize response")?;
    let framed = frame_message(&payload).context("response exceeds frame cap")?;
    stream.write_all(&framed).await?;
    stream.flush().await?;
    Ok(())
}
