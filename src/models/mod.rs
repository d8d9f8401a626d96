//! Domain types shared across the AFK bridge components.

pub mod callback;
pub mod queued_request;
pub mod session_context;

pub use callback::{CallbackData, PermissionChoice, QueueCommand, TmuxAction};
pub use queued_request::{ChoiceOption, MessageId, QueuedRequest, RequestKind};
pub use session_context::{ReplyTargetMode, SessionContext};
