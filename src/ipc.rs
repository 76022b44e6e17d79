//! IPC infrastructure for daemon communication
//!
//! Provides Unix socket-based IPC for the CLI and for external controllers
//! (entity feed, context transport, pid registration).
//! Uses length-prefixed JSON messages for protocol framing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, warn};

use crate::engine::EngineStatus;
use crate::entity::EntityKind;
use crate::group::GroupSummary;

// ============================================================================
// Message Types
// ============================================================================

/// Requests sent to the daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Query daemon status
    Status,
    /// Get policy group summaries
    ListGroups,
    /// A context variable changed
    Context { name: String, value: String },
    /// Add or update a per-process group override
    RegisterPid {
        pid: u32,
        property: Option<String>,
        method: String,
        pattern: String,
        group: String,
    },
    UnregisterPid {
        pid: u32,
        property: Option<String>,
        method: String,
        pattern: String,
    },
    /// Route one group, or every group following route commands
    Route {
        group: Option<String>,
        class: String,
        target: String,
        mode: Option<String>,
        hwid: Option<String>,
    },
    Cork { group: String, corked: bool },
    VolumeLimit { group: Option<String>, percent: u32 },
    LocalMute { group: String, muted: bool },
    /// A stream's owner changed its mute state
    StreamMuted {
        kind: EntityKind,
        index: u32,
        muted: bool,
    },
    DeleteGroup { group: String },
    /// Entity feed: an object appeared on the audio server
    EntityCreated {
        kind: EntityKind,
        index: u32,
        name: String,
        #[serde(default)]
        properties: BTreeMap<String, String>,
    },
    /// Entity feed: an object went away
    EntityRemoved { kind: EntityKind, index: u32 },
    /// Gracefully shutdown the daemon
    Shutdown,
}

/// Responses sent from daemon to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    /// Status information
    Status {
        version: String,
        uptime_secs: u64,
        engine: EngineStatus,
    },
    /// Policy groups
    Groups { groups: Vec<GroupSummary> },
    /// Outcome of a context variable change
    Context {
        changed: bool,
        mutations: usize,
        failures: Vec<String>,
    },
    /// Generic success response
    Ok { message: String },
    /// Error response
    Error { message: String },
}

// ============================================================================
// Socket Path Management
// ============================================================================

/// Get the IPC socket path
/// Prefers `$XDG_RUNTIME_DIR/audio-policy.sock`, falls back to `/tmp/audio-policy.sock`
///
/// # Errors
/// Never fails at present.
pub fn get_socket_path() -> Result<PathBuf> {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        Ok(PathBuf::from(runtime_dir).join("audio-policy.sock"))
    } else {
        Ok(PathBuf::from("/tmp/audio-policy.sock"))
    }
}

/// Remove a socket file left behind by a daemon that is no longer running
///
/// # Errors
/// Returns an error if a stale socket cannot be removed.
pub async fn cleanup_stale_socket(socket_path: &Path) -> Result<()> {
    if !socket_path.exists() {
        return Ok(());
    }

    match tokio::time::timeout(Duration::from_millis(100), UnixStream::connect(socket_path)).await {
        Ok(Ok(_)) => anyhow::bail!("Daemon already running (socket {socket_path:?} is live)"),
        Ok(Err(_)) | Err(_) => {
            debug!("Removing stale socket: {:?}", socket_path);
            std::fs::remove_file(socket_path)
                .with_context(|| format!("Failed to remove stale socket: {socket_path:?}"))?;
            Ok(())
        }
    }
}

/// Check whether a daemon is accepting connections on the default socket
pub async fn is_daemon_running() -> bool {
    let Ok(socket_path) = get_socket_path() else {
        return false;
    };
    matches!(
        tokio::time::timeout(Duration::from_millis(200), UnixStream::connect(&socket_path)).await,
        Ok(Ok(_))
    )
}

// ============================================================================
// Protocol Helpers
// ============================================================================

const MAX_MESSAGE_SIZE: usize = 1024 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Read a length-prefixed JSON message from a stream
async fn read_message<T: for<'de> Deserialize<'de>>(stream: &mut UnixStream) -> Result<T> {
    let mut len_buf = [0u8; 4];
    tokio::time::timeout(READ_TIMEOUT, stream.read_exact(&mut len_buf))
        .await
        .context("Timeout reading message length")?
        .context("Failed to read message length")?;

    let msg_len = u32::from_be_bytes(len_buf) as usize;

    if msg_len > MAX_MESSAGE_SIZE {
        anyhow::bail!("Message too large: {msg_len} bytes (max: {MAX_MESSAGE_SIZE})");
    }

    let mut msg_buf = vec![0u8; msg_len];
    tokio::time::timeout(READ_TIMEOUT, stream.read_exact(&mut msg_buf))
        .await
        .context("Timeout reading message payload")?
        .context("Failed to read message payload")?;

    serde_json::from_slice(&msg_buf).context("Failed to deserialize message")
}

/// Write a length-prefixed JSON message to a stream
async fn write_message<T: Serialize>(stream: &mut UnixStream, message: &T) -> Result<()> {
    let json = serde_json::to_vec(message).context("Failed to serialize message")?;

    if json.len() > MAX_MESSAGE_SIZE {
        anyhow::bail!("Message too large: {} bytes (max: {MAX_MESSAGE_SIZE})", json.len());
    }

    let len = (json.len() as u32).to_be_bytes();
    stream
        .write_all(&len)
        .await
        .context("Failed to write message length")?;
    stream
        .write_all(&json)
        .await
        .context("Failed to write message payload")?;
    stream.flush().await.context("Failed to flush stream")?;

    Ok(())
}

// ============================================================================
// IPC Client
// ============================================================================

/// Send a request to the daemon and wait for response
///
/// # Errors
/// Returns an error if the daemon is unreachable or the exchange fails.
pub async fn send_request(request: Request) -> Result<Response> {
    send_request_to(&get_socket_path()?, request).await
}

/// Send a request over a specific socket
///
/// # Errors
/// Returns an error if the socket is unreachable or the exchange fails.
pub async fn send_request_to(socket_path: &Path, request: Request) -> Result<Response> {
    let mut stream = tokio::time::timeout(Duration::from_secs(5), UnixStream::connect(socket_path))
        .await
        .context("Timeout connecting to daemon")?
        .with_context(|| {
            format!("Failed to connect to daemon. Is the daemon running?\nSocket: {socket_path:?}")
        })?;

    debug!("Connected to daemon at {:?}", socket_path);

    write_message(&mut stream, &request).await?;
    read_message(&mut stream).await
}

// ============================================================================
// IPC Server (for daemon)
// ============================================================================

/// Handle for the IPC server running in the daemon
pub struct IpcServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl IpcServer {
    /// Bind at the default socket path
    ///
    /// # Errors
    /// Returns an error if another daemon owns the socket or binding fails.
    pub async fn bind() -> Result<Self> {
        Self::bind_at(get_socket_path()?).await
    }

    /// Bind at a specific socket path
    ///
    /// # Errors
    /// Returns an error if another daemon owns the socket or binding fails.
    pub async fn bind_at(socket_path: PathBuf) -> Result<Self> {
        cleanup_stale_socket(&socket_path).await?;

        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("Failed to bind IPC socket: {socket_path:?}"))?;

        debug!("IPC server listening on {:?}", socket_path);

        Ok(Self {
            listener,
            socket_path,
        })
    }

    /// Accept the next incoming connection
    /// Returns None if accept fails (non-fatal)
    pub async fn accept(&self) -> Option<UnixStream> {
        match self.listener.accept().await {
            Ok((stream, _addr)) => Some(stream),
            Err(e) => {
                error!("Failed to accept IPC connection: {}", e);
                None
            }
        }
    }

    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            warn!("Failed to remove IPC socket on shutdown: {}", e);
        } else {
            debug!("Removed IPC socket: {:?}", self.socket_path);
        }
    }
}

/// Read a request from a client connection
///
/// # Errors
/// Returns an error on timeout, oversize or malformed messages.
pub async fn read_request(stream: &mut UnixStream) -> Result<Request> {
    read_message(stream).await
}

/// Write a response to a client connection
///
/// # Errors
/// Returns an error if the response cannot be serialized or written.
pub async fn write_response(stream: &mut UnixStream, response: &Response) -> Result<()> {
    write_message(stream, response).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let json = serde_json::to_value(Request::Context {
            name: "active_profile".into(),
            value: "car".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "Context");
        assert_eq!(json["name"], "active_profile");

        let created: Request = serde_json::from_str(
            r#"{"type":"EntityCreated","kind":"sink-input","index":4,"name":"music"}"#,
        )
        .unwrap();
        assert_eq!(
            created,
            Request::EntityCreated {
                kind: EntityKind::SinkInput,
                index: 4,
                name: "music".into(),
                properties: BTreeMap::new(),
            }
        );
    }

    #[tokio::test]
    async fn test_round_trip_over_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sock");
        let server = IpcServer::bind_at(path.clone()).await.unwrap();

        let handle = tokio::spawn(async move {
            let mut stream = server.accept().await.unwrap();
            let request = read_request(&mut stream).await.unwrap();
            assert_eq!(request, Request::Status);
            write_response(&mut stream, &Response::Ok { message: "pong".into() })
                .await
                .unwrap();
        });

        let response = send_request_to(&path, Request::Status).await.unwrap();
        assert_eq!(response, Response::Ok { message: "pong".into() });
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_length_rejected() {
        let (mut a, mut b) = UnixStream::pair().unwrap();
        a.write_all(&(MAX_MESSAGE_SIZE as u32 + 1).to_be_bytes()).await.unwrap();
        let err = read_request(&mut b).await.unwrap_err();
        assert!(err.to_string().contains("too large"));
    }
}
