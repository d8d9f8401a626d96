//! Maps inbound chat events (button press, free text) to the active request.
//!
//! Grounded in the prior implementation's `QueueRouter`
//! (`daemon/request_router.py`): only the active request ever has a
//! `message_id`, so a button press routes by equality against it, and a
//! text message always routes to whatever is currently active, if
//! anything. `reply:`/`cmd:`/`tmux:` callback data is *not* routed here
//! — the AFK Manager intercepts those prefixes before this ever runs
//! (see `src/afk/mod.rs`).

use crate::models::{MessageId, QueuedRequest};
use crate::queue::RequestQueue;

/// Route a button press to the request it answers, if any.
///
/// Matches only the active request, and only when its `message_id`
/// equals the pressed message's id — pending requests never have a
/// `message_id`, so they can never be matched here.
#[must_use]
pub fn route_button_press<'a>(
    queue: &'a RequestQueue,
    message_id: &MessageId,
) -> Option<&'a QueuedRequest> {
    queue
        .active()
        .filter(|active| active.message_id.as_ref() == Some(message_id))
}

/// Route a free-text message to the active request, if any.
///
/// There is always at most one consumer of free text: the active
/// request. An empty message routes to nothing (callers should ignore
/// `text_message("")` entirely per the boundary behaviour).
#[must_use]
pub fn route_text_message<'a>(queue: &'a RequestQueue, text: &str) -> Option<&'a QueuedRequest> {
    if text.is_empty() {
        return None;
    }
    queue.active()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::models::RequestKind;

    fn req(session: &str) -> QueuedRequest {
        QueuedRequest::new(session, RequestKind::Input, "prompt", PathBuf::from("/tmp/x"))
    }

    #[test]
    fn button_press_matches_active_by_message_id() {
        let mut queue = RequestQueue::new();
        queue.enqueue(req("a"));
        let id = MessageId("100.1".into());
        queue.active_mut().expect("active").mark_presented(id.clone());

        let matched = route_button_press(&queue, &id);
        assert_eq!(matched.expect("matched").session, "a");
    }

    #[test]
    fn stale_message_id_does_not_match() {
        let mut queue = RequestQueue::new();
        queue.enqueue(req("a"));
        queue
            .active_mut()
            .expect("active")
            .mark_presented(MessageId("100.1".into()));

        let stale = MessageId("999.9".into());
        assert!(route_button_press(&queue, &stale).is_none());
    }

    #[test]
    fn pending_requests_never_match_since_they_have_no_message_id() {
        let mut queue = RequestQueue::new();
        queue.enqueue(req("a"));
        queue.enqueue(req("b"));
        // "b" is pending and was never presented, so it has no message_id to match.
        let arbitrary = MessageId("1.1".into());
        let matched = route_button_press(&queue, &arbitrary);
        assert!(matched.is_none());
    }

    #[test]
    fn text_message_routes_to_active_request() {
        let mut queue = RequestQueue::new();
        queue.enqueue(req("a"));
        let matched = route_text_message(&queue, "hello");
        assert_eq!(matched.expect("matched").session, "a");
    }

    #[test]
    fn empty_text_message_is_ignored() {
        let mut queue = RequestQueue::new();
        queue.enqueue(req("a"));
        assert!(route_text_message(&queue, "").is_none());
    }

    #[test]
    fn text_message_with_no_active_request_routes_nowhere() {
        let queue = RequestQueue::new();
        assert!(route_text_message(&queue, "hello").is_none());
    }
}
