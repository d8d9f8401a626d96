//! AFK Manager: the orchestrator tying the queue, router, presenter,
//! chat transport, terminal injector and multiplexer together.
//!
//! Grounded end-to-end in the prior implementation's `AfkManager`
//! (`daemon/afk.py`): the dispatch ordering of a button press
//! (`tmux:` prefix, then `cmd:`, then `reply:`, then a router match),
//! the free-text cascade (active request → reply target → nothing),
//! the invariant that `message_id` is only ever set on the active
//! request, and the reply-target state machine (tmux-backed vs
//! device-node-backed) are all carried over; only the transport
//! underneath (Slack Socket Mode instead of Telegram long-poll) and the
//! slash-command surface (exposed through the chat text channel rather
//! than bot commands) differ.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::chat::{ChatTransport, Update};
use crate::control::AfkMode;
use crate::hook::{write_sentinel, HookEvent};
use crate::injector::DeviceNodeInjector;
use crate::models::{
    CallbackData, PermissionChoice, QueueCommand, QueuedRequest, RequestKind, ReplyTargetMode,
    SessionContext, TmuxAction,
};
use crate::multiplexer::{SessionStatus, TmuxMultiplexer};
use crate::permission_cache::PermissionCache;
use crate::presenter::{self, Presentation};
use crate::queue::RequestQueue;
use crate::Result;

/// Orchestrates a single chat-backed AFK bridge for one workspace.
pub struct AfkManager<T: ChatTransport> {
    transport: Arc<T>,
    queue: Arc<Mutex<RequestQueue>>,
    mode: Arc<Mutex<AfkMode>>,
    contexts: Mutex<HashMap<String, SessionContext>>,
    reply_target: Mutex<Option<(String, ReplyTargetMode)>>,
    multiplexer: TmuxMultiplexer,
    injector: DeviceNodeInjector,
    permission_cache: Option<PermissionCache>,
    injection_timeout: Duration,
}

impl<T: ChatTransport> AfkManager<T> {
    /// Construct a manager around a concrete chat transport.
    #[must_use]
    pub fn new(
        transport: Arc<T>,
        queue: Arc<Mutex<RequestQueue>>,
        mode: Arc<Mutex<AfkMode>>,
        permission_cache: Option<PermissionCache>,
        injection_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            queue,
            mode,
            contexts: Mutex::new(HashMap::new()),
            reply_target: Mutex::new(None),
            multiplexer: TmuxMultiplexer,
            injector: DeviceNodeInjector,
            permission_cache,
            injection_timeout,
        }
    }

    /// React to a hook event: present the newly-active request, or
    /// record/forward a context-only update.
    pub async fn handle_hook_event(&self, event: HookEvent) -> Result<()> {
        match event {
            HookEvent::Enqueued { session, tty_path } => {
                self.remember_tty_path(&session, tty_path).await;
                self.present_active_if_unpresented().await
            }
            HookEvent::Context { session, snippet, tty_path } => {
                self.remember_tty_path(&session, tty_path).await;
                self.handle_context(&session, &snippet).await
            }
        }
    }

    /// Record the session's controlling terminal device, when the hook
    /// observed one, so device-node injection has somewhere to type into.
    async fn remember_tty_path(&self, session: &str, tty_path: Option<String>) {
        let Some(tty_path) = tty_path else { return };
        let mut contexts = self.contexts.lock().await;
        contexts.entry(session.to_owned()).or_default().terminal_device = Some(tty_path);
    }

    async fn handle_context(&self, session: &str, snippet: &str) -> Result<()> {
        {
            let mut contexts = self.contexts.lock().await;
            contexts.entry(session.to_owned()).or_default().set_context_snippet(snippet);
        }
        *self.reply_target.lock().await = Some((session.to_owned(), ReplyTargetMode::DeviceNode));

        let request = QueuedRequest::new(
            session,
            RequestKind::Context,
            snippet,
            std::path::PathBuf::new(),
        );
        let queue = self.queue.lock().await;
        let presentation = presenter::render(&request, &queue);
        drop(queue);
        self.transport.send(&presentation).await?;
        Ok(())
    }

    async fn present_active_if_unpresented(&self) -> Result<()> {
        let (already_presented, presentation) = {
            let queue = self.queue.lock().await;
            match queue.active() {
                Some(active) if active.message_id.is_none() => {
                    (false, Some(presenter::render(active, &queue)))
                }
                _ => (true, None),
            }
        };
        if already_presented {
            return Ok(());
        }
        let Some(presentation) = presentation else { return Ok(()) };
        let message_id = self.transport.send(&presentation).await?;
        let mut queue = self.queue.lock().await;
        if let Some(active) = queue.active_mut() {
            active.mark_presented(message_id);
        }
        Ok(())
    }

    /// Handle one inbound chat [`Update`].
    pub async fn handle_update(&self, update: Update) -> Result<()> {
        match update {
            Update::ButtonPress { callback_id, data, message_id } => {
                self.handle_button_press(&callback_id, data, &message_id).await
            }
            Update::TextMessage { text } => self.handle_text_message(&text).await,
        }
    }

    async fn handle_button_press(
        &self,
        callback_id: &str,
        data: Option<CallbackData>,
        message_id: &crate::models::MessageId,
    ) -> Result<()> {
        let Some(data) = data else {
            self.transport.ack_callback(callback_id, "unrecognized").await?;
            return Ok(());
        };

        match data {
            CallbackData::Tmux(action) => {
                self.transport.ack_callback(callback_id, "OK").await?;
                self.handle_tmux_action(action).await
            }
            CallbackData::Cmd(command) => {
                self.transport.ack_callback(callback_id, "sent").await?;
                self.handle_queue_command(command).await
            }
            CallbackData::Reply(session) => {
                self.transport.ack_callback(callback_id, "sent").await?;
                self.handle_reply_target_request(&session).await
            }
            CallbackData::OptionOther => {
                let matched =
                    crate::router::route_button_press(&self.queue.lock().await, message_id).cloned();
                self.transport.ack_callback(callback_id, "sent").await?;
                if matched.is_some() {
                    let presentation = Presentation {
                        text: "Type your reply below:".to_owned(),
                        blocks: Vec::new(),
                    };
                    self.transport.send(&presentation).await?;
                }
                Ok(())
            }
            CallbackData::Permission(choice) => {
                self.answer_active(message_id, callback_id, permission_answer(choice)).await
            }
            CallbackData::OptionLabel(label) => {
                self.answer_active(message_id, callback_id, &label).await
            }
        }
    }

    async fn answer_active(
        &self,
        message_id: &crate::models::MessageId,
        callback_id: &str,
        answer: &str,
    ) -> Result<()> {
        let matched = {
            let queue = self.queue.lock().await;
            crate::router::route_button_press(&queue, message_id).cloned()
        };
        let Some(request) = matched else {
            self.transport.ack_callback(callback_id, "request expired").await?;
            return Ok(());
        };

        self.transport.ack_callback(callback_id, &format!("sent: {answer}")).await?;
        self.transport.edit_markup(message_id, None).await?;

        if answer == "always" {
            if let Some(cache) = &self.permission_cache {
                cache.remember(&request.session, &request.prompt).await?;
            }
        }

        write_sentinel(&request.response_path, answer)?;
        self.advance_and_present(&request.session).await
    }

    async fn handle_tmux_action(&self, action: TmuxAction) -> Result<()> {
        match action {
            TmuxAction::Prompt(session) => {
                let status = self.multiplexer.status_of(&session).await;
                if status == SessionStatus::Idle {
                    *self.reply_target.lock().await = Some((session.clone(), ReplyTargetMode::Multiplexer));
                    let presentation = Presentation {
                        text: format!("Send a message to [{session}]:"),
                        blocks: Vec::new(),
                    };
                    self.transport.send(&presentation).await?;
                } else {
                    let presentation = Presentation {
                        text: format!("[{session}] is no longer idle"),
                        blocks: Vec::new(),
                    };
                    self.transport.send(&presentation).await?;
                }
                Ok(())
            }
            TmuxAction::Queue(session) => {
                let queue = self.queue.lock().await;
                let rows: Vec<_> =
                    queue.summary().into_iter().filter(|row| row.request.session == session).collect();
                let text = if rows.is_empty() {
                    format!("No pending requests for [{session}].")
                } else {
                    format!("{} pending request(s) for [{session}]", rows.len())
                };
                drop(queue);
                self.transport.send(&Presentation { text, blocks: Vec::new() }).await?;
                Ok(())
            }
        }
    }

    async fn handle_queue_command(&self, command: QueueCommand) -> Result<()> {
        match command {
            QueueCommand::Skip => {
                let next_session = {
                    let mut queue = self.queue.lock().await;
                    queue.skip().map(|req| req.session.clone())
                };
                if let Some(session) = next_session {
                    self.transport
                        .send(&Presentation { text: format!("Skipped. Next: [{session}]"), blocks: Vec::new() })
                        .await?;
                    self.present_active_if_unpresented().await?;
                }
                Ok(())
            }
            QueueCommand::ShowQueue => self.send_queue_summary().await,
            QueueCommand::Priority(session) => {
                let jumped = {
                    let mut queue = self.queue.lock().await;
                    queue.priority_jump(&session).is_some()
                };
                if jumped {
                    self.transport
                        .send(&Presentation { text: format!("Jumped to [{session}]"), blocks: Vec::new() })
                        .await?;
                    self.present_active_if_unpresented().await?;
                } else {
                    self.transport
                        .send(&Presentation {
                            text: format!("No pending requests from [{session}]"),
                            blocks: Vec::new(),
                        })
                        .await?;
                }
                Ok(())
            }
        }
    }

    async fn send_queue_summary(&self) -> Result<()> {
        let text = {
            let queue = self.queue.lock().await;
            let rows = queue.summary();
            if rows.is_empty() {
                "Queue is empty.".to_owned()
            } else {
                rows.iter()
                    .map(|row| {
                        format!("{} [{}] — {}s waiting", row.visual_id, row.request.session, row.waiting_seconds)
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        };
        self.transport.send(&Presentation { text, blocks: Vec::new() }).await?;
        Ok(())
    }

    async fn handle_reply_target_request(&self, session: &str) -> Result<()> {
        let tmux_available = self.multiplexer.is_available().await;
        let status = if tmux_available { Some(self.multiplexer.status_of(session).await) } else { None };

        let mode = if matches!(status, Some(SessionStatus::Idle | SessionStatus::Working | SessionStatus::Waiting)) {
            Some(ReplyTargetMode::Multiplexer)
        } else if self.contexts.lock().await.contains_key(session) {
            Some(ReplyTargetMode::DeviceNode)
        } else {
            None
        };

        match mode {
            Some(mode) => {
                *self.reply_target.lock().await = Some((session.to_owned(), mode));
                self.transport
                    .send(&Presentation { text: format!("Type your reply to [{session}]:"), blocks: Vec::new() })
                    .await?;
            }
            None => {
                *self.reply_target.lock().await = None;
                self.transport
                    .send(&Presentation {
                        text: format!("No terminal connected for [{session}]. Reply not available."),
                        blocks: Vec::new(),
                    })
                    .await?;
            }
        }
        Ok(())
    }

    async fn handle_text_message(&self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        if *self.mode.lock().await != AfkMode::Afk {
            self.transport
                .send(&Presentation { text: "Not in AFK mode.".to_owned(), blocks: Vec::new() })
                .await?;
            return Ok(());
        }

        let matched = {
            let queue = self.queue.lock().await;
            crate::router::route_text_message(&queue, text).cloned()
        };

        let Some(request) = matched else {
            return self.route_text_to_reply_target(text).await;
        };

        if request.kind == RequestKind::Permission {
            self.inject_into_reply_target(text).await;
            self.transport
                .send(&Presentation {
                    text: format!("Sent question to [{}]: {text}", request.session),
                    blocks: Vec::new(),
                })
                .await?;
            write_sentinel(&request.response_path, "deny_for_question")?;
        } else {
            write_sentinel(&request.response_path, text)?;
            self.transport
                .send(&Presentation { text: format!("Sent to [{}]: {text}", request.session), blocks: Vec::new() })
                .await?;
        }
        self.advance_and_present(&request.session).await
    }

    async fn route_text_to_reply_target(&self, text: &str) -> Result<()> {
        let target = self.reply_target.lock().await.take();
        let Some((session, mode)) = target else {
            self.transport
                .send(&Presentation { text: "No active request. Queue is empty.".to_owned(), blocks: Vec::new() })
                .await?;
            return Ok(());
        };

        let success = match mode {
            ReplyTargetMode::Multiplexer => self.multiplexer.send_keys(&session, text).await,
            ReplyTargetMode::DeviceNode => {
                let device =
                    self.contexts.lock().await.get(&session).and_then(|ctx| ctx.terminal_device.clone());
                match device {
                    Some(device) => self.injector.inject(&device, text, self.injection_timeout).await,
                    None => false,
                }
            }
        };

        let presentation = if success {
            Presentation { text: format!("Sent to [{session}]: {text}"), blocks: Vec::new() }
        } else {
            if mode == ReplyTargetMode::DeviceNode {
                if let Some(ctx) = self.contexts.lock().await.get_mut(&session) {
                    ctx.terminal_device = None;
                }
            }
            Presentation { text: format!("Failed to reach [{session}]."), blocks: Vec::new() }
        };
        self.transport.send(&presentation).await?;
        Ok(())
    }

    async fn inject_into_reply_target(&self, text: &str) {
        let active_session = {
            let queue = self.queue.lock().await;
            queue.active().map(|req| req.session.clone())
        };
        let Some(session) = active_session else { return };
        let device = self.contexts.lock().await.get(&session).and_then(|ctx| ctx.terminal_device.clone());
        if let Some(device) = device {
            if !self.injector.inject(&device, text, self.injection_timeout).await {
                warn!(session, "failed to inject question text into terminal");
            }
        }
    }

    async fn advance_and_present(&self, session: &str) -> Result<()> {
        let has_next = {
            let mut queue = self.queue.lock().await;
            queue.advance().is_some()
        };
        if has_next {
            self.present_active_if_unpresented().await
        } else {
            self.transport
                .send(&Presentation { text: format!("All requests handled for [{session}]!"), blocks: Vec::new() })
                .await?;
            Ok(())
        }
    }

    /// Toggle AFK mode on. No-op if already on.
    pub async fn activate(&self) -> Result<()> {
        let already_active = {
            let mut mode = self.mode.lock().await;
            let was = *mode == AfkMode::Afk;
            *mode = AfkMode::Afk;
            was
        };
        if already_active {
            return Ok(());
        }
        info!("AFK mode activated");
        self.transport
            .send(&Presentation { text: "AFK mode active. Send /help for usage.".to_owned(), blocks: Vec::new() })
            .await?;
        Ok(())
    }

    /// Toggle AFK mode off, flushing all pending requests.
    pub async fn deactivate(&self) -> Result<()> {
        *self.mode.lock().await = AfkMode::Notify;
        let flushed = self.flush_queue().await?;
        self.contexts.lock().await.clear();
        *self.reply_target.lock().await = None;

        let text = if flushed > 0 {
            format!("AFK mode off. Flushed {flushed} pending request(s).")
        } else {
            "AFK mode off.".to_owned()
        };
        self.transport.send(&Presentation { text, blocks: Vec::new() }).await?;
        Ok(())
    }

    async fn flush_queue(&self) -> Result<usize> {
        let drained = self.queue.lock().await.clear();
        let count = drained.len();
        for request in drained {
            write_sentinel(&request.response_path, "__flush__")?;
        }
        Ok(count)
    }
}

fn permission_answer(choice: PermissionChoice) -> &'static str {
    match choice {
        PermissionChoice::Yes => "yes",
        PermissionChoice::Always => "always",
        PermissionChoice::No => "no",
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::models::MessageId;

    #[derive(Default)]
    struct FakeTransport {
        sent: std::sync::Mutex<Vec<Presentation>>,
        next_id: AtomicUsize,
    }

    impl ChatTransport for FakeTransport {
        async fn verify(&self) -> Result<()> {
            Ok(())
        }

        async fn send(&self, presentation: &Presentation) -> Result<MessageId> {
            self.sent.lock().expect("lock").push(presentation.clone());
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(MessageId(id.to_string()))
        }

        async fn edit_markup(&self, _message_id: &MessageId, _presentation: Option<&Presentation>) -> Result<()> {
            Ok(())
        }

        async fn ack_callback(&self, _callback_id: &str, _toast_text: &str) -> Result<()> {
            Ok(())
        }
    }

    fn manager() -> (AfkManager<FakeTransport>, Arc<Mutex<RequestQueue>>) {
        let queue = Arc::new(Mutex::new(RequestQueue::new()));
        let mode = Arc::new(Mutex::new(AfkMode::Afk));
        let manager = AfkManager::new(
            Arc::new(FakeTransport::default()),
            Arc::clone(&queue),
            mode,
            None,
            Duration::from_secs(1),
        );
        (manager, queue)
    }

    #[tokio::test]
    async fn presents_active_request_and_assigns_message_id() {
        let (manager, queue) = manager();
        queue.lock().await.enqueue(QueuedRequest::new(
            "api_a1b2c3",
            RequestKind::Permission,
            "run tests?",
            std::path::PathBuf::from("/tmp/x"),
        ));
        manager
            .handle_hook_event(HookEvent::Enqueued { session: "api_a1b2c3".into(), tty_path: None })
            .await
            .expect("present");
        assert!(queue.lock().await.active().expect("active").message_id.is_some());
    }

    #[tokio::test]
    async fn permission_answer_writes_sentinel_and_advances_queue() {
        let dir = tempfile::tempdir().expect("tempdir");
        let response_path = dir.path().join("response");
        let (manager, queue) = manager();
        queue.lock().await.enqueue(QueuedRequest::new(
            "api_a1b2c3",
            RequestKind::Permission,
            "run tests?",
            response_path.clone(),
        ));
        manager
            .handle_hook_event(HookEvent::Enqueued { session: "api_a1b2c3".into(), tty_path: None })
            .await
            .expect("present");
        let message_id = queue.lock().await.active().expect("active").message_id.clone().expect("id");

        manager
            .handle_update(Update::ButtonPress {
                callback_id: "cb1".into(),
                data: Some(CallbackData::Permission(PermissionChoice::Yes)),
                message_id,
            })
            .await
            .expect("handle");

        let contents = std::fs::read_to_string(&response_path).expect("sentinel written");
        assert_eq!(contents, "yes");
        assert!(queue.lock().await.active().is_none());
    }

    #[tokio::test]
    async fn stale_message_id_is_acknowledged_as_expired_without_mutating_queue() {
        let (manager, queue) = manager();
        queue.lock().await.enqueue(QueuedRequest::new(
            "api_a1b2c3",
            RequestKind::Permission,
            "run tests?",
            std::path::PathBuf::from("/tmp/x"),
        ));
        manager
            .handle_hook_event(HookEvent::Enqueued { session: "api_a1b2c3".into(), tty_path: None })
            .await
            .expect("present");

        manager
            .handle_update(Update::ButtonPress {
                callback_id: "cb1".into(),
                data: Some(CallbackData::Permission(PermissionChoice::Yes)),
                message_id: MessageId("stale".into()),
            })
            .await
            .expect("handle");

        assert!(queue.lock().await.active().is_some());
    }

    #[tokio::test]
    async fn deactivate_flushes_pending_requests_with_flush_sentinel() {
        let dir = tempfile::tempdir().expect("tempdir");
        let response_path = dir.path().join("response");
        let (manager, queue) = manager();
        queue.lock().await.enqueue(QueuedRequest::new(
            "api_a1b2c3",
            RequestKind::Input,
            "what next?",
            response_path.clone(),
        ));
        manager.deactivate().await.expect("deactivate");
        let contents = std::fs::read_to_string(&response_path).expect("sentinel written");
        assert_eq!(contents, "__flush__");
    }

    #[tokio::test]
    async fn tty_path_from_a_hook_event_is_available_to_device_node_injection() {
        let (manager, queue) = manager();
        queue.lock().await.enqueue(QueuedRequest::new(
            "api_a1b2c3",
            RequestKind::Context,
            "assistant said hello",
            std::path::PathBuf::new(),
        ));
        manager
            .handle_hook_event(HookEvent::Context {
                session: "api_a1b2c3".into(),
                snippet: "assistant said hello".into(),
                tty_path: Some("/dev/ttys005".into()),
            })
            .await
            .expect("handle context");

        let device = manager
            .contexts
            .lock()
            .await
            .get("api_a1b2c3")
            .and_then(|ctx| ctx.terminal_device.clone());
        assert_eq!(device.as_deref(), Some("/dev/ttys005"));
    }
}
