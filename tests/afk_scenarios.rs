//! End-to-end scenarios for the AFK Manager, driven through its public
//! `handle_hook_event`/`handle_update` surface against a recording fake
//! transport instead of a real chat backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use agent_intercom::afk::AfkManager;
use agent_intercom::chat::{ChatTransport, Update};
use agent_intercom::control::AfkMode;
use agent_intercom::hook::HookEvent;
use agent_intercom::models::{
    CallbackData, ChoiceOption, MessageId, PermissionChoice, QueueCommand, QueuedRequest,
    RequestKind,
};
use agent_intercom::presenter::Presentation;
use agent_intercom::queue::RequestQueue;
use agent_intercom::Result;

#[derive(Default)]
struct RecordingTransport {
    sent: std::sync::Mutex<Vec<Presentation>>,
    edits: std::sync::Mutex<Vec<(MessageId, Option<Presentation>)>>,
    acks: std::sync::Mutex<Vec<(String, String)>>,
    next_id: AtomicUsize,
}

impl RecordingTransport {
    fn last_text(&self) -> String {
        self.sent.lock().expect("lock").last().expect("at least one message sent").text.clone()
    }

    fn last_ack(&self) -> (String, String) {
        self.acks.lock().expect("lock").last().expect("at least one ack").clone()
    }

    fn last_edit(&self) -> (MessageId, Option<Presentation>) {
        self.edits.lock().expect("lock").last().expect("at least one edit").clone()
    }
}

impl ChatTransport for RecordingTransport {
    async fn verify(&self) -> Result<()> {
        Ok(())
    }

    async fn send(&self, presentation: &Presentation) -> Result<MessageId> {
        self.sent.lock().expect("lock").push(presentation.clone());
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(MessageId(id.to_string()))
    }

    async fn edit_markup(&self, message_id: &MessageId, presentation: Option<&Presentation>) -> Result<()> {
        self.edits.lock().expect("lock").push((message_id.clone(), presentation.cloned()));
        Ok(())
    }

    async fn ack_callback(&self, callback_id: &str, toast_text: &str) -> Result<()> {
        self.acks.lock().expect("lock").push((callback_id.to_owned(), toast_text.to_owned()));
        Ok(())
    }
}

fn manager() -> (AfkManager<RecordingTransport>, Arc<Mutex<RequestQueue>>, Arc<RecordingTransport>) {
    let queue = Arc::new(Mutex::new(RequestQueue::new()));
    let mode = Arc::new(Mutex::new(AfkMode::Afk));
    let transport = Arc::new(RecordingTransport::default());
    let manager = AfkManager::new(Arc::clone(&transport), Arc::clone(&queue), mode, None, Duration::from_secs(1));
    (manager, queue, transport)
}

fn sentinel_response(path: &std::path::Path) -> String {
    std::fs::read_to_string(path).expect("sentinel written")
}

#[tokio::test]
async fn scenario_1_single_permission_approved() {
    let dir = tempfile::tempdir().expect("tempdir");
    let response_path = dir.path().join("response_permission");
    let (manager, queue, transport) = manager();

    queue.lock().await.enqueue(QueuedRequest::new(
        "api_a1b2c3",
        RequestKind::Permission,
        "run tests",
        response_path.clone(),
    ));
    manager
        .handle_hook_event(HookEvent::Enqueued { session: "api_a1b2c3".into(), tty_path: None })
        .await
        .expect("present");

    let message_id = queue.lock().await.active().expect("active").message_id.clone().expect("presented");

    manager
        .handle_update(Update::ButtonPress {
            callback_id: "cb1".into(),
            data: Some(CallbackData::Permission(PermissionChoice::Yes)),
            message_id: message_id.clone(),
        })
        .await
        .expect("handle");

    assert_eq!(sentinel_response(&response_path), "yes");
    assert!(queue.lock().await.active().is_none());

    let (edited_id, stripped) = transport.last_edit();
    assert_eq!(edited_id, message_id);
    assert!(stripped.is_none());
}

#[tokio::test]
async fn scenario_2_two_sessions_queue_then_skip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (manager, queue, _transport) = manager();

    queue.lock().await.enqueue(QueuedRequest::new(
        "a",
        RequestKind::Input,
        "a's question",
        dir.path().join("a_response"),
    ));
    queue.lock().await.enqueue(QueuedRequest::new(
        "b",
        RequestKind::Input,
        "b's question",
        dir.path().join("b_response"),
    ));
    manager
        .handle_hook_event(HookEvent::Enqueued { session: "a".into(), tty_path: None })
        .await
        .expect("present a");
    assert_eq!(queue.lock().await.active().expect("active").session, "a");

    manager
        .handle_update(Update::ButtonPress {
            callback_id: "cb1".into(),
            data: Some(CallbackData::Cmd(QueueCommand::Skip)),
            message_id: MessageId("unused".into()),
        })
        .await
        .expect("handle skip");

    assert_eq!(queue.lock().await.active().expect("active").session, "b");
    assert!(!dir.path().join("a_response").exists());

    manager
        .handle_update(Update::ButtonPress {
            callback_id: "cb2".into(),
            data: Some(CallbackData::Cmd(QueueCommand::Skip)),
            message_id: MessageId("unused".into()),
        })
        .await
        .expect("handle second skip");

    assert_eq!(queue.lock().await.active().expect("active").session, "a");
}

#[tokio::test]
async fn scenario_3_priority_jump() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (manager, queue, _transport) = manager();

    for session in ["a", "b", "a", "c"] {
        queue.lock().await.enqueue(QueuedRequest::new(
            session,
            RequestKind::Input,
            "question",
            dir.path().join(format!("{session}_response_{}", uniq())),
        ));
    }

    manager
        .handle_update(Update::ButtonPress {
            callback_id: "cb1".into(),
            data: Some(CallbackData::Cmd(QueueCommand::Priority("a".into()))),
            message_id: MessageId("unused".into()),
        })
        .await
        .expect("handle priority jump");

    let queue = queue.lock().await;
    let rows = queue.summary();
    let sessions: Vec<&str> = rows.iter().map(|row| row.request.session.as_str()).collect();
    assert_eq!(sessions, vec!["a", "b", "c", "a"]);
    assert!(rows[0].is_active);
}

fn uniq() -> usize {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    COUNTER.fetch_add(1, Ordering::SeqCst)
}

#[tokio::test]
async fn scenario_4_flush_on_deactivate() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (manager, queue, transport) = manager();

    let path_a = dir.path().join("a_response");
    let path_b = dir.path().join("b_response");
    queue.lock().await.enqueue(QueuedRequest::new("a", RequestKind::Input, "q1", path_a.clone()));
    queue.lock().await.enqueue(QueuedRequest::new("b", RequestKind::Input, "q2", path_b.clone()));

    manager.deactivate().await.expect("deactivate");

    assert_eq!(sentinel_response(&path_a), "__flush__");
    assert_eq!(sentinel_response(&path_b), "__flush__");
    assert!(transport.last_text().contains("Flushed 2"));

    manager.handle_update(Update::TextMessage { text: "anything".into() }).await.expect("handle text");
    assert!(transport.last_text().contains("Not in AFK mode"));
}

#[tokio::test]
async fn scenario_5_multi_choice_with_other() {
    let dir = tempfile::tempdir().expect("tempdir");
    let response_path = dir.path().join("response");
    let (manager, queue, transport) = manager();

    let options = vec![
        ChoiceOption { label: "Red".into(), description: "the color red".into() },
        ChoiceOption { label: "Blue".into(), description: "the color blue".into() },
    ];
    queue.lock().await.enqueue(QueuedRequest::new(
        "api_a1b2c3",
        RequestKind::MultiChoice { options },
        "pick a color",
        response_path.clone(),
    ));
    manager
        .handle_hook_event(HookEvent::Enqueued { session: "api_a1b2c3".into(), tty_path: None })
        .await
        .expect("present");
    let message_id = queue.lock().await.active().expect("active").message_id.clone().expect("presented");

    manager
        .handle_update(Update::ButtonPress {
            callback_id: "cb1".into(),
            data: Some(CallbackData::OptionOther),
            message_id,
        })
        .await
        .expect("handle other");

    assert!(!response_path.exists());
    assert!(queue.lock().await.active().is_some());
    assert!(transport.last_text().contains("Type your reply below"));

    manager.handle_update(Update::TextMessage { text: "Purple".into() }).await.expect("handle text");

    assert_eq!(sentinel_response(&response_path), "Purple");
    assert!(queue.lock().await.active().is_none());
}

#[tokio::test]
async fn scenario_6_stale_callback() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path_first = dir.path().join("first_response");
    let path_second = dir.path().join("second_response");
    let (manager, queue, transport) = manager();

    queue.lock().await.enqueue(QueuedRequest::new(
        "first",
        RequestKind::Permission,
        "first question",
        path_first.clone(),
    ));
    manager
        .handle_hook_event(HookEvent::Enqueued { session: "first".into(), tty_path: None })
        .await
        .expect("present first");
    let stale_id = queue.lock().await.active().expect("active").message_id.clone().expect("presented");

    manager
        .handle_update(Update::ButtonPress {
            callback_id: "cb-stale".into(),
            data: Some(CallbackData::Permission(PermissionChoice::Yes)),
            message_id: stale_id.clone(),
        })
        .await
        .expect("answer first so a second request supersedes it");
    assert_eq!(sentinel_response(&path_first), "yes");

    queue.lock().await.enqueue(QueuedRequest::new(
        "second",
        RequestKind::Permission,
        "second question",
        path_second.clone(),
    ));
    manager
        .handle_hook_event(HookEvent::Enqueued { session: "second".into(), tty_path: None })
        .await
        .expect("present second");

    manager
        .handle_update(Update::ButtonPress {
            callback_id: "cb-replay".into(),
            data: Some(CallbackData::Permission(PermissionChoice::Yes)),
            message_id: stale_id,
        })
        .await
        .expect("handle stale callback");

    let (_, toast) = transport.last_ack();
    assert!(toast.contains("expired"));
    assert!(!path_second.exists());
}
