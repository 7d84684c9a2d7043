//! GhostBox client - live spectrum display and option editor for a
//! GhostBox receiver.
//!
//! Polls the device's status endpoint, draws newly seen signal samples into
//! a fading buffer, and keeps a local copy of the device options that can be
//! edited over the control socket and submitted back.

mod config;
mod control;
mod display;
mod error;
mod history;
mod logging;
mod options;
mod remote;
mod render;
mod scheduler;
mod session;

use config::ClientConfig;
use display::PngSink;
use error::ClientError;
use remote::HttpRemote;
use session::{ControlRequest, Session};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

/// Graceful shutdown timeout in seconds
const SHUTDOWN_TIMEOUT_SECS: u64 = 2;

/// Delay before rebinding the control socket after a failure
const CONTROL_RESTART_SECS: u64 = 5;

/// Queued control commands awaiting the session
const COMMAND_QUEUE_DEPTH: usize = 16;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _log_guard = logging::init_logging().map_err(|e| {
        eprintln!("Failed to initialize logging: {}", e);
        e
    })?;

    info!("GhostBox client starting...");

    let result = run_client().await;

    match &result {
        Ok(()) => info!("GhostBox client shut down gracefully"),
        Err(e) => error!("GhostBox client error: {}", e),
    }

    Ok(result?)
}

async fn run_client() -> Result<(), ClientError> {
    let config_path = ClientConfig::default_path();
    let config = load_config(&config_path)?;
    info!(
        device = %config.device_url,
        "Configuration loaded from {:?}",
        config_path
    );

    let remote = HttpRemote::new(&config.device_url, config.request_timeout())?;
    let sink = PngSink::new(config.frame_path());
    info!("Writing display frames to {:?}", sink.path());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (command_tx, command_rx) = mpsc::channel::<ControlRequest>(COMMAND_QUEUE_DEPTH);

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = setup_signal_handlers(signal_tx).await {
            error!("Signal handler error: {}", e);
        }
    });

    let session = Session::new(remote, sink, &config);
    let session_handle = tokio::spawn(session.run(command_rx, shutdown_rx.clone()));

    let socket_path = config.control_socket.clone();
    let control_shutdown_rx = shutdown_rx.clone();
    let control_handle = tokio::spawn(async move {
        run_control_server(socket_path, command_tx, control_shutdown_rx).await
    });

    info!("GhostBox client initialized and running");

    let mut shutdown_rx_main = shutdown_rx.clone();
    shutdown_rx_main.changed().await.ok();

    info!("Shutdown signal received, stopping tasks...");

    let shutdown_timeout = Duration::from_secs(SHUTDOWN_TIMEOUT_SECS);
    if tokio::time::timeout(shutdown_timeout, async {
        let _ = tokio::join!(session_handle, control_handle);
    })
    .await
    .is_err()
    {
        warn!("Tasks did not stop within {}s", SHUTDOWN_TIMEOUT_SECS);
    }

    info!("All tasks stopped");
    Ok(())
}

/// Load the settings file, writing the defaults out on first run.
fn load_config(path: &std::path::Path) -> Result<ClientConfig, ClientError> {
    let config = ClientConfig::load_or_default(path)?;
    if !path.exists() {
        if let Err(e) = config.save(path) {
            warn!("Could not write default settings to {:?}: {}", path, e);
        }
    }
    Ok(config)
}

/// Set up signal handlers for graceful shutdown on SIGTERM and SIGINT.
#[cfg(unix)]
async fn setup_signal_handlers(
    shutdown_tx: watch::Sender<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    let _ = shutdown_tx.send(true);
    Ok(())
}

#[cfg(not(unix))]
async fn setup_signal_handlers(
    shutdown_tx: watch::Sender<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C");
    let _ = shutdown_tx.send(true);
    Ok(())
}

/// Keep the control socket up, rebinding after failures.
async fn run_control_server(
    socket_path: String,
    session: mpsc::Sender<ControlRequest>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("Control server shutting down");
                    break;
                }
            }
            result = run_control_server_inner(&socket_path, session.clone()) => {
                match result {
                    Ok(()) => break,
                    Err(ClientError::Control(error::ControlError::SessionClosed)) => {
                        info!("Session closed, stopping control server");
                        break;
                    }
                    Err(e) => {
                        error!(
                            "Control server error: {}, restarting in {} seconds",
                            e, CONTROL_RESTART_SECS
                        );
                        tokio::time::sleep(Duration::from_secs(CONTROL_RESTART_SECS)).await;
                    }
                }
            }
        }
    }
}

#[cfg(unix)]
async fn run_control_server_inner(
    socket_path: &str,
    session: mpsc::Sender<ControlRequest>,
) -> Result<(), ClientError> {
    let server = control::ControlServer::bind(socket_path).await?;
    info!("Control server listening on {:?}", server.socket_path());
    server.run(session).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn run_control_server_inner(
    _socket_path: &str,
    _session: mpsc::Sender<ControlRequest>,
) -> Result<(), ClientError> {
    warn!("Control socket not available on this platform");
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
