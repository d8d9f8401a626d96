//! Hook Rendezvous: the socket a Claude Code hook connects to once per
//! prompt to register a request and immediately disconnect.
//!
//! Grounded structurally in the teacher's `src/ipc/server.rs`
//! accept-loop and line-delimited JSON dispatch, but deliberately
//! non-blocking: unlike that teacher pattern (which parks the
//! connection on a oneshot channel until an approval arrives), the hook
//! here gets a single immediate acknowledgement and then polls its own
//! `response_path` sentinel on the filesystem — the daemon writes to
//! that sentinel whenever an answer becomes available, independently of
//! this connection's lifetime.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use interprocess::local_socket::{tokio::prelude::*, GenericFilePath, ListenerOptions, ToFsName};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::control::AfkMode;
use crate::models::{ChoiceOption, QueuedRequest, RequestKind};
use crate::permission_cache::PermissionCache;
use crate::queue::{EnqueueOutcome, RequestQueue};
use crate::{AppError, Result};

/// Inbound hook registration.
#[derive(Debug, Deserialize)]
struct HookRequest {
    session: String,
    #[serde(rename = "type")]
    kind: HookRequestKind,
    prompt: String,
    #[serde(default)]
    options: Vec<ChoiceOption>,
    /// Controlling terminal device path, when the hook can see one
    /// (e.g. `/dev/ttys005`). Absent for sessions with no attached tty.
    #[serde(default)]
    tty_path: Option<String>,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum HookRequestKind {
    Permission,
    Input,
    MultiChoice,
    Context,
}

impl HookRequestKind {
    const fn response_suffix(&self) -> &'static str {
        match self {
            Self::Permission => "permission",
            Self::Input => "input",
            Self::MultiChoice => "multi_choice",
            Self::Context => "context",
        }
    }
}

/// Outbound acknowledgement: this is *not* the answer, only the queue
/// position and sentinel path the hook should poll.
#[derive(Debug, Serialize)]
struct HookResponse {
    ok: bool,
    /// `false` when the daemon is not in AFK mode: the hook should not
    /// poll anything at all and should proceed locally.
    wait: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    position: Option<usize>,
    /// Sentinel path the hook polls for the answer, derived by the core
    /// from the session id and request kind. Present whenever `wait` is true.
    #[serde(skip_serializing_if = "Option::is_none")]
    response_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl HookResponse {
    fn accepted(position: usize, response_path: &Path) -> Self {
        Self {
            ok: true,
            wait: true,
            position: Some(position),
            response_path: Some(response_path.to_string_lossy().into_owned()),
            error: None,
        }
    }

    const fn bypassed() -> Self {
        Self { ok: true, wait: false, position: None, response_path: None, error: None }
    }

    fn rejected(message: impl Into<String>) -> Self {
        Self { ok: false, wait: false, position: None, response_path: None, error: Some(message.into()) }
    }
}

/// Event the hook server reports to the AFK Manager. Enqueued requests
/// need presentation; context updates are never queued and are handled
/// inline by whoever owns `reply_target` (§4.6). Both carry the
/// session's controlling tty path when the hook observed one, so the
/// device-node injector has somewhere to type into.
#[derive(Debug, Clone)]
pub enum HookEvent {
    /// A new request reached the front of the queue (or was queued behind one).
    Enqueued { session: String, tty_path: Option<String> },
    /// A context-only update, never queued, for display/forwarding only.
    Context { session: String, snippet: String, tty_path: Option<String> },
}

/// Spawn the cancellable Hook Rendezvous accept loop.
///
/// # Errors
///
/// Returns `AppError::HookIo` if the listener cannot be bound.
pub fn spawn_hook_server(
    socket_path: PathBuf,
    sessions_dir: PathBuf,
    queue: Arc<Mutex<RequestQueue>>,
    mode: Arc<Mutex<AfkMode>>,
    permission_cache: Option<PermissionCache>,
    events: mpsc::UnboundedSender<HookEvent>,
    ct: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|err| AppError::HookIo(format!("failed to create socket dir: {err}")))?;
    }
    let _ = std::fs::remove_file(&socket_path);

    let name = socket_path
        .clone()
        .to_fs_name::<GenericFilePath>()
        .map_err(|err| AppError::HookIo(format!("invalid hook socket path: {err}")))?;
    let listener = ListenerOptions::new()
        .name(name)
        .create_tokio()
        .map_err(|err| AppError::HookIo(format!("failed to bind hook socket: {err}")))?;

    info!(path = %socket_path.display(), "hook rendezvous listening");

    let handle = tokio::spawn(async move {
        let span = info_span!("hook_server");
        async move {
            loop {
                tokio::select! {
                    () = ct.cancelled() => {
                        info!("hook rendezvous shutting down");
                        break;
                    }
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok(stream) => {
                                let queue = Arc::clone(&queue);
                                let mode = Arc::clone(&mode);
                                let permission_cache = permission_cache.clone();
                                let sessions_dir = sessions_dir.clone();
                                let events = events.clone();
                                tokio::spawn(handle_connection(stream, sessions_dir, queue, mode, permission_cache, events));
                            }
                            Err(err) => warn!(%err, "hook accept failed"),
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
    sessions_dir: PathBuf,
    queue: Arc<Mutex<RequestQueue>>,
    mode: Arc<Mutex<AfkMode>>,
    permission_cache: Option<PermissionCache>,
    events: mpsc::UnboundedSender<HookEvent>,
) {
    let (reader, mut writer) = stream.split();
    let mut buf_reader = BufReader::new(reader);
    let mut line = String::new();

    // Exactly one request per connection: register, ack, close.
    match buf_reader.read_line(&mut line).await {
        Ok(0) => return,
        Ok(_) => {
            let trimmed = line.trim();
            let response = match serde_json::from_str::<HookRequest>(trimmed) {
                Ok(request) => {
                    if *mode.lock().await == AfkMode::Notify {
                        HookResponse::bypassed()
                    } else {
                        handle_request(request, &sessions_dir, &queue, &permission_cache, &events).await
                    }
                }
                Err(err) => HookResponse::rejected(format!("invalid json: {err}")),
            };
            let mut response_line =
                serde_json::to_string(&response).unwrap_or_else(|_| r#"{"ok":false}"#.to_owned());
            response_line.push('\n');
            if let Err(err) = writer.write_all(response_line.as_bytes()).await {
                warn!(%err, "failed to write hook response");
            }
        }
        Err(err) => warn!(%err, "hook read error"),
    }
}

async fn handle_request(
    request: HookRequest,
    sessions_dir: &Path,
    queue: &Arc<Mutex<RequestQueue>>,
    permission_cache: &Option<PermissionCache>,
    events: &mpsc::UnboundedSender<HookEvent>,
) -> HookResponse {
    if request.kind == HookRequestKind::Context {
        let snippet = crate::models::session_context::bound_snippet(&request.prompt);
        let _ = events.send(HookEvent::Context {
            session: request.session.clone(),
            snippet,
            tty_path: request.tty_path.clone(),
        });
        return HookResponse::bypassed();
    }

    let response_path = match session_response_path(sessions_dir, &request.session, &request.kind) {
        Ok(path) => path,
        Err(err) => return HookResponse::rejected(format!("failed to prepare response path: {err}")),
    };

    if request.kind == HookRequestKind::Permission {
        if let Some(cache) = permission_cache {
            match cache.is_remembered(&request.session, &request.prompt).await {
                Ok(true) => {
                    return match write_sentinel(&response_path, "__auto__") {
                        Ok(()) => HookResponse::accepted(0, &response_path),
                        Err(err) => HookResponse::rejected(format!("auto-allow sentinel write failed: {err}")),
                    };
                }
                Ok(false) => {}
                Err(err) => warn!(%err, "permission cache lookup failed; presenting request normally"),
            }
        }
    }

    let kind = match request.kind {
        HookRequestKind::Permission => RequestKind::Permission,
        HookRequestKind::Input => RequestKind::Input,
        HookRequestKind::MultiChoice => RequestKind::MultiChoice { options: request.options },
        HookRequestKind::Context => unreachable!("handled above"),
    };

    let queued = QueuedRequest::new(request.session.clone(), kind, request.prompt, response_path.clone());
    let outcome = {
        let mut guard = queue.lock().await;
        guard.enqueue(queued)
    };
    let _ = events.send(HookEvent::Enqueued { session: request.session, tty_path: request.tty_path });

    match outcome {
        EnqueueOutcome::Active => HookResponse::accepted(0, &response_path),
        EnqueueOutcome::Queued(position) => HookResponse::accepted(position, &response_path),
    }
}

/// Derive the sentinel path for a session/kind pair and ensure its
/// directory exists. One sentinel file per `(session, kind)`, so a
/// stale answer from an earlier request of the same kind never shows
/// up as the answer to a later one.
fn session_response_path(sessions_dir: &Path, session: &str, kind: &HookRequestKind) -> io::Result<PathBuf> {
    let dir = sessions_dir.join(session);
    std::fs::create_dir_all(&dir)?;
    Ok(dir.join(format!("response_{}", kind.response_suffix())))
}

/// Write a sentinel file atomically (temp file in the same directory,
/// then rename). The prior implementation wrote the sentinel directly
/// with a plain `open(path, "w")`, which can race a hook mid-poll into
/// observing a half-written file; this daemon never does that.
///
/// The sentinel holds the raw answer token (`yes`, `no`, `always`, the
/// typed reply text, or one of the reserved values `__flush__` /
/// `__auto__` / `deny_for_question`) with no wrapping — hooks compare
/// the file's contents for exact string equality.
pub fn write_sentinel(path: &Path, response: &str) -> io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    {
        use std::io::Write;
        tmp.write_all(response.as_bytes())?;
        tmp.flush()?;
    }
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_sentinel_is_readable_immediately_after_return() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("response");
        write_sentinel(&path, "yes").expect("write");
        let contents = std::fs::read_to_string(&path).expect("read");
        assert_eq!(contents, "yes");
    }

    #[tokio::test]
    async fn context_requests_are_never_enqueued() {
        let queue = Arc::new(Mutex::new(RequestQueue::new()));
        let sessions_dir = tempfile::tempdir().expect("tempdir");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let request = HookRequest {
            session: "api_a1b2c3".into(),
            kind: HookRequestKind::Context,
            prompt: "assistant said something".into(),
            options: Vec::new(),
            tty_path: None,
        };
        let response = handle_request(request, sessions_dir.path(), &queue, &None, &tx).await;
        assert!(response.ok);
        assert!(!response.wait);
        assert!(response.response_path.is_none());
        assert_eq!(queue.lock().await.size(), 0);
        assert!(queue.lock().await.active().is_none());
        assert!(matches!(rx.try_recv(), Ok(HookEvent::Context { .. })));
    }

    #[tokio::test]
    async fn first_request_becomes_active_and_reports_position_zero() {
        let queue = Arc::new(Mutex::new(RequestQueue::new()));
        let sessions_dir = tempfile::tempdir().expect("tempdir");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let request = HookRequest {
            session: "api_a1b2c3".into(),
            kind: HookRequestKind::Permission,
            prompt: "run tests?".into(),
            options: Vec::new(),
            tty_path: Some("/dev/ttys005".into()),
        };
        let response = handle_request(request, sessions_dir.path(), &queue, &None, &tx).await;
        assert!(response.ok);
        assert_eq!(response.position, Some(0));
        assert!(response.response_path.expect("path").ends_with("response_permission"));
        match rx.try_recv() {
            Ok(HookEvent::Enqueued { tty_path, .. }) => assert_eq!(tty_path.as_deref(), Some("/dev/ttys005")),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn remembered_permission_auto_allows_without_enqueueing() {
        let sessions_dir = tempfile::tempdir().expect("tempdir");
        let queue = Arc::new(Mutex::new(RequestQueue::new()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cache = PermissionCache::open_memory().await.expect("open cache");
        cache.remember("api_a1b2c3", "run tests?").await.expect("remember");

        let request = HookRequest {
            session: "api_a1b2c3".into(),
            kind: HookRequestKind::Permission,
            prompt: "run tests?".into(),
            options: Vec::new(),
            tty_path: None,
        };
        let response = handle_request(request, sessions_dir.path(), &queue, &Some(cache), &tx).await;
        assert!(response.ok);
        assert_eq!(queue.lock().await.size(), 0);
        assert!(queue.lock().await.active().is_none());
        assert!(rx.try_recv().is_err());

        let response_path = response.response_path.expect("path");
        let contents = std::fs::read_to_string(&response_path).expect("sentinel written");
        assert_eq!(contents, "__auto__");
    }
}
