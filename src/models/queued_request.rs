//! `QueuedRequest` — a prompt awaiting a remote answer.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One labelled choice of a `multi_choice` prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChoiceOption {
    /// Short label shown on its button and used as callback data.
    pub label: String,
    /// Longer description shown in the message body.
    pub description: String,
}

/// The kind of prompt a hook submitted, carrying the data each kind needs.
///
/// Folding `options` into the `MultiChoice` variant makes "`options` is
/// non-empty iff kind is `multi_choice`" a type-level invariant instead
/// of a runtime check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestKind {
    /// A yes/always/no permission prompt.
    Permission,
    /// A free-text input prompt.
    Input,
    /// A multiple-choice prompt with an explicit option list.
    MultiChoice {
        /// Ordered list of selectable options, rendered in this order.
        options: Vec<ChoiceOption>,
    },
    /// A context update: not a question, just "here is what the assistant
    /// just said"; never enqueued, handled inline by the AFK Manager.
    Context,
}

/// Remote chat message identifier, assigned once a request is presented.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

/// A prompt waiting for a remote answer via the chat surface.
///
/// Invariant: `message_id` is `Some` exactly when and only when this
/// request is the active request currently presented in chat. The
/// `Request Queue` enforces this by only ever calling
/// [`QueuedRequest::mark_presented`] on the slot it is about to make
/// active, and [`QueuedRequest::clear_presentation`] whenever a request
/// leaves the active slot without being answered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueuedRequest {
    /// Opaque session id (working directory + short random suffix).
    pub session: String,
    /// What kind of prompt this is.
    pub kind: RequestKind,
    /// Human-readable question.
    pub prompt: String,
    /// Filesystem sentinel path the hook is polling.
    pub response_path: PathBuf,
    /// Remote message id, set only while this request is active.
    pub message_id: Option<MessageId>,
    /// Creation time, for "waiting N seconds" display.
    pub timestamp: DateTime<Utc>,
}

impl QueuedRequest {
    /// Construct a new, not-yet-presented request.
    #[must_use]
    pub fn new(session: impl Into<String>, kind: RequestKind, prompt: impl Into<String>, response_path: PathBuf) -> Self {
        Self {
            session: session.into(),
            kind,
            prompt: prompt.into(),
            response_path,
            message_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Whether this request carries a `multi_choice` option list.
    #[must_use]
    pub fn options(&self) -> Option<&[ChoiceOption]> {
        match &self.kind {
            RequestKind::MultiChoice { options } => Some(options),
            _ => None,
        }
    }

    /// Mark this request as the one currently presented in chat.
    pub fn mark_presented(&mut self, message_id: MessageId) {
        self.message_id = Some(message_id);
    }

    /// Clear presentation state (e.g. when skipped back into the FIFO).
    pub fn clear_presentation(&mut self) {
        self.message_id = None;
    }

    /// Seconds elapsed since this request was created.
    #[must_use]
    pub fn waiting_seconds(&self) -> i64 {
        (Utc::now() - self.timestamp).num_seconds().max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_choice_options_round_trip() {
        let kind = RequestKind::MultiChoice {
            options: vec![ChoiceOption {
                label: "Red".into(),
                description: "the color red".into(),
            }],
        };
        let req = QueuedRequest::new("api_a1b2c3", kind, "pick a color", PathBuf::from("/tmp/x"));
        assert_eq!(req.options().expect("options present").len(), 1);
    }

    #[test]
    fn non_multi_choice_has_no_options() {
        let req = QueuedRequest::new(
            "api_a1b2c3",
            RequestKind::Permission,
            "run tests",
            PathBuf::from("/tmp/x"),
        );
        assert!(req.options().is_none());
    }

    #[test]
    fn message_id_only_set_after_presentation() {
        let mut req = QueuedRequest::new(
            "api_a1b2c3",
            RequestKind::Input,
            "what next",
            PathBuf::from("/tmp/x"),
        );
        assert!(req.message_id.is_none());
        req.mark_presented(MessageId("1700000000.000100".into()));
        assert!(req.message_id.is_some());
        req.clear_presentation();
        assert!(req.message_id.is_none());
    }
}
