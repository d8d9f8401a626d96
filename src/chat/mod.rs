//! The `ChatTransport` seam: wraps the remote chat API behind a small
//! trait so the AFK Manager can be driven by a real `SlackTransport` or,
//! in tests, by an in-memory fake.

pub mod slack;

use crate::models::{CallbackData, MessageId};
use crate::presenter::Presentation;
use crate::Result;

/// One inbound event from the chat service's event stream.
#[derive(Debug, Clone)]
pub enum Update {
    /// A button press on a previously-sent message.
    ButtonPress {
        /// Opaque id used to acknowledge the press.
        callback_id: String,
        /// Parsed callback-data payload; `None` if it didn't match the dialect.
        data: Option<CallbackData>,
        /// The message the pressed button belonged to.
        message_id: MessageId,
    },
    /// A free-text message sent to the channel.
    TextMessage {
        /// The message body.
        text: String,
    },
}

/// Wraps the remote chat service: send, edit, acknowledge, and a
/// cancellable event stream.
///
/// Implementations must validate that every inbound update belongs to
/// the configured chat and silently drop anything else (§4.1).
pub trait ChatTransport: Send + Sync {
    /// Confirm the token is valid and the configured chat is reachable.
    fn verify(&self) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Send a rendered presentation, returning the remote message id.
    fn send(&self, presentation: &Presentation) -> impl std::future::Future<Output = Result<MessageId>> + Send;

    /// Strip (or replace) the button row of a previously-sent message.
    fn edit_markup(
        &self,
        message_id: &MessageId,
        presentation: Option<&Presentation>,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Acknowledge a button press so the remote UI stops its spinner.
    fn ack_callback(&self, callback_id: &str, toast_text: &str) -> impl std::future::Future<Output = Result<()>> + Send;
}
