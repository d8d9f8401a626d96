//! Control Plane: a second local socket for `agent-intercom-ctl` and
//! other local tooling to inspect and steer the running daemon.
//!
//! Grounded in the prior implementation's `ControlServer`
//! (`daemon/control.py`): command/event split over one socket, an
//! event-subscriber list guarded by its own lock, and `stop` shutting
//! the whole daemon down rather than just this connection. `speak` and
//! `preview_overlay` are voice-surface commands with no counterpart
//! here and are dropped; `set_mode` is narrowed to the two modes this
//! daemon actually has (`afk`, `notify`).
//!
//! Structurally this reuses the teacher's `src/ipc/server.rs`
//! accept-loop/line-protocol shape, generalized to also support
//! `subscribe` holding a connection open for event fan-out.

use std::path::PathBuf;
use std::sync::Arc;

use interprocess::local_socket::{tokio::prelude::*, GenericFilePath, ListenerOptions, ToFsName};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::queue::RequestQueue;
use crate::{AppError, Result};

/// The daemon's current operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AfkMode {
    /// Prompts are forwarded to chat and can be answered remotely.
    Afk,
    /// Prompts are only logged locally; nothing is sent to chat.
    Notify,
}

/// Shared daemon state the control plane reads and mutates.
pub struct ControlState {
    /// Current operating mode, shared with the Hook Rendezvous and the
    /// AFK Manager so a `set_mode` command takes effect everywhere at once.
    pub mode: Arc<Mutex<AfkMode>>,
    /// The request queue, for read-only introspection.
    pub queue: Arc<Mutex<RequestQueue>>,
    /// Path to the config file `reload_config` re-reads.
    pub config_path: PathBuf,
    /// Cancelled to request a full daemon shutdown.
    pub shutdown: CancellationToken,
}

/// An event broadcast to every `subscribe`d connection.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ControlEvent {
    /// The operating mode changed.
    ModeChanged {
        /// The new mode.
        mode: AfkMode,
    },
    /// Configuration was reloaded from disk.
    ConfigReloaded,
    /// A recoverable error occurred in some subsystem.
    Error {
        /// Which subsystem reported it.
        source: String,
        /// Human-readable message.
        message: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum ControlCommand {
    Status,
    SetMode { mode: AfkMode },
    ReloadConfig,
    Queue,
    Stop,
    Subscribe,
}

#[derive(Debug, Serialize)]
struct ControlResponse {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ControlResponse {
    fn success(data: serde_json::Value) -> Self {
        Self { ok: true, data: Some(data), error: None }
    }

    fn error(message: impl Into<String>) -> Self {
        Self { ok: false, data: None, error: Some(message.into()) }
    }
}

/// Spawn the cancellable Control Plane accept loop.
///
/// # Errors
///
/// Returns `AppError::ControlIo` if the listener cannot be bound.
pub fn spawn_control_server(
    socket_path: PathBuf,
    state: Arc<ControlState>,
    ct: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|err| AppError::ControlIo(format!("failed to create socket dir: {err}")))?;
    }
    let _ = std::fs::remove_file(&socket_path);

    let name = socket_path
        .clone()
        .to_fs_name::<GenericFilePath>()
        .map_err(|err| AppError::ControlIo(format!("invalid control socket path: {err}")))?;
    let listener = ListenerOptions::new()
        .name(name)
        .create_tokio()
        .map_err(|err| AppError::ControlIo(format!("failed to bind control socket: {err}")))?;

    let (events_tx, _) = broadcast::channel::<ControlEvent>(64);
    info!(path = %socket_path.display(), "control plane listening");

    let handle = tokio::spawn(async move {
        let span = info_span!("control_server");
        async move {
            loop {
                tokio::select! {
                    () = ct.cancelled() => {
                        info!("control plane shutting down");
                        break;
                    }
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok(stream) => {
                                let state = Arc::clone(&state);
                                let events_tx = events_tx.clone();
                                let conn_ct = ct.clone();
                                tokio::spawn(handle_connection(stream, state, events_tx, conn_ct));
                            }
                            Err(err) => warn!(%err, "control accept failed"),
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await;
    });

    Ok(handle)
}

async fn handle_connection(
    stream: interprocess::local_socket::tokio::Stream,
    state: Arc<ControlState>,
    events_tx: broadcast::Sender<ControlEvent>,
    ct: CancellationToken,
) {
    let (reader, mut writer) = stream.split();
    let mut buf_reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        match buf_reader.read_line(&mut line).await {
            Ok(0) => return,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let command = serde_json::from_str::<ControlCommand>(trimmed);
                let subscribing = matches!(command, Ok(ControlCommand::Subscribe));
                let response = match command {
                    Ok(cmd) => dispatch(cmd, &state, &events_tx).await,
                    Err(err) => ControlResponse::error(format!("invalid command: {err}")),
                };

                if write_response(&mut writer, &response).await.is_err() {
                    return;
                }

                if subscribing {
                    stream_events(&mut writer, events_tx.subscribe(), &ct).await;
                    return;
                }
            }
            Err(err) => {
                warn!(%err, "control read error");
                return;
            }
        }
    }
}

async fn write_response(
    writer: &mut (impl tokio::io::AsyncWrite + Unpin),
    response: &ControlResponse,
) -> std::io::Result<()> {
    let mut line = serde_json::to_string(response)
        .unwrap_or_else(|_| r#"{"ok":false,"error":"serialization failed"}"#.to_owned());
    line.push('\n');
    writer.write_all(line.as_bytes()).await
}

async fn stream_events(
    writer: &mut (impl tokio::io::AsyncWrite + Unpin),
    mut events: broadcast::Receiver<ControlEvent>,
    ct: &CancellationToken,
) {
    loop {
        tokio::select! {
            () = ct.cancelled() => return,
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let mut line = serde_json::to_string(&event).unwrap_or_default();
                        line.push('\n');
                        if writer.write_all(line.as_bytes()).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        }
    }
}

async fn dispatch(
    command: ControlCommand,
    state: &Arc<ControlState>,
    events_tx: &broadcast::Sender<ControlEvent>,
) -> ControlResponse {
    match command {
        ControlCommand::Status => {
            let mode = *state.mode.lock().await;
            let queue_size = state.queue.lock().await.size();
            ControlResponse::success(serde_json::json!({
                "daemon": true,
                "mode": mode,
                "queue_size": queue_size,
            }))
        }
        ControlCommand::SetMode { mode } => {
            *state.mode.lock().await = mode;
            let _ = events_tx.send(ControlEvent::ModeChanged { mode });
            ControlResponse::success(serde_json::json!({ "mode": mode }))
        }
        ControlCommand::ReloadConfig => match crate::config_watcher::reload(&state.config_path) {
            Ok(_) => {
                let _ = events_tx.send(ControlEvent::ConfigReloaded);
                ControlResponse::success(serde_json::json!({ "reloaded": true }))
            }
            Err(err) => ControlResponse::error(format!("reload failed: {err}")),
        },
        ControlCommand::Queue => {
            let queue = state.queue.lock().await;
            let rows: Vec<serde_json::Value> = queue
                .summary()
                .iter()
                .map(|entry| {
                    serde_json::json!({
                        "session": entry.request.session,
                        "visual_id": entry.visual_id,
                        "is_active": entry.is_active,
                        "position": entry.position,
                        "waiting_seconds": entry.waiting_seconds,
                    })
                })
                .collect();
            ControlResponse::success(serde_json::json!({ "queue": rows }))
        }
        ControlCommand::Stop => {
            state.shutdown.cancel();
            ControlResponse::success(serde_json::json!({ "stopping": true }))
        }
        ControlCommand::Subscribe => ControlResponse::success(serde_json::json!({ "subscribed": true })),
    }
}
