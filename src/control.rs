//! Control socket for the presentation layer.
//!
//! A Unix Domain Socket server that accepts newline-delimited JSON commands,
//! forwards each one to the session task and writes back its response.
//! The session processes commands one at a time, between poll cycles.

use crate::error::ControlError;
use crate::session::{ControlCommand, ControlRequest, ControlResponse};
use tokio::sync::{mpsc, oneshot};

#[cfg(unix)]
use std::path::{Path, PathBuf};
#[cfg(unix)]
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

/// Send one command to the session and wait for its response.
pub async fn dispatch(
    session: &mpsc::Sender<ControlRequest>,
    command: ControlCommand,
) -> Result<ControlResponse, ControlError> {
    let (reply, response) = oneshot::channel();
    session
        .send(ControlRequest { command, reply })
        .await
        .map_err(|_| ControlError::SessionClosed)?;
    response.await.map_err(|_| ControlError::SessionClosed)
}

/// Unix Domain Socket server for control commands.
#[cfg(unix)]
pub struct ControlServer {
    /// Path to the Unix socket
    socket_path: PathBuf,
    /// Unix listener for incoming connections
    listener: UnixListener,
}

#[cfg(unix)]
impl ControlServer {
    /// Bind a new control server at `path`, replacing any stale socket file.
    pub async fn bind(path: &str) -> Result<Self, ControlError> {
        let socket_path = PathBuf::from(path);

        Self::cleanup_socket(&socket_path)?;

        let listener = UnixListener::bind(&socket_path).map_err(|e| ControlError::SocketBindFailed {
            path: path.to_string(),
            source: e,
        })?;

        Ok(Self {
            socket_path,
            listener,
        })
    }

    /// Clean up an existing socket file.
    fn cleanup_socket(path: &Path) -> Result<(), ControlError> {
        if path.exists() {
            std::fs::remove_file(path).map_err(|e| ControlError::SocketBindFailed {
                path: path.display().to_string(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Get the socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections until the session goes away.
    pub async fn run(&self, session: mpsc::Sender<ControlRequest>) -> Result<(), ControlError> {
        loop {
            if session.is_closed() {
                return Err(ControlError::SessionClosed);
            }

            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    let session = session.clone();
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(stream, session).await {
                            tracing::warn!("Error handling control connection: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Error accepting control connection: {}", e);
                }
            }
        }
    }

    /// Handle a single client connection.
    async fn handle_connection(
        stream: UnixStream,
        session: mpsc::Sender<ControlRequest>,
    ) -> Result<(), ControlError> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        while reader.read_line(&mut line).await? > 0 {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                line.clear();
                continue;
            }

            let response = match serde_json::from_str::<ControlCommand>(trimmed) {
                Ok(command) => serde_json::to_value(dispatch(&session, command).await?)?,
                Err(e) => serde_json::json!({
                    "success": false,
                    "error": format!("Invalid command: {}", e)
                }),
            };

            let response_str = serde_json::to_string(&response)?;
            writer.write_all(response_str.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;

            line.clear();
        }

        Ok(())
    }
}

#[cfg(unix)]
impl Drop for ControlServer {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}
