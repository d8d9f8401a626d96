//! Button callback-data dialect: parsing and rendering.
//!
//! The chat service's callback-data payload is capped at roughly 64
//! bytes (the historical Telegram inline-keyboard limit this dialect
//! was designed against); long session names are truncated in the
//! callback data itself, never in the rendered label, and the command
//! prefix is never the part that gets cut.

/// Maximum encoded length of a callback-data value.
pub const MAX_CALLBACK_BYTES: usize = 64;

/// A permission prompt's three possible answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionChoice {
    /// Allow this one request.
    Yes,
    /// Allow this one request and remember the choice ("always allow").
    Always,
    /// Deny this request.
    No,
}

/// Queue-management commands issued from chat buttons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueCommand {
    /// Move the active request to the tail, promote the next one.
    Skip,
    /// Show the full queue summary.
    ShowQueue,
    /// Jump the first pending request from a session to active.
    Priority(String),
}

/// Session-panel actions surfaced from the `/sessions` listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TmuxAction {
    /// Ask to be made the reply target for this session's active prompt.
    Prompt(String),
    /// Show this session's position in the queue.
    Queue(String),
}

/// The full tagged union of button callback-data payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackData {
    /// Yes/Always/No answer to a permission prompt.
    Permission(PermissionChoice),
    /// A chosen `multi_choice` option, by label.
    OptionLabel(String),
    /// The terminal "Other (type reply)" option of a `multi_choice` prompt.
    OptionOther,
    /// Designate a session as the reply target ("Reply" button on a context update).
    Reply(String),
    /// A queue-management command.
    Cmd(QueueCommand),
    /// A session-panel action.
    Tmux(TmuxAction),
}

impl CallbackData {
    /// Parse a raw callback-data string per the dialect in the external interfaces.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "yes" => Some(Self::Permission(PermissionChoice::Yes)),
            "always" => Some(Self::Permission(PermissionChoice::Always)),
            "no" => Some(Self::Permission(PermissionChoice::No)),
            "opt:__other__" => Some(Self::OptionOther),
            "cmd:skip" => Some(Self::Cmd(QueueCommand::Skip)),
            "cmd:show_queue" => Some(Self::Cmd(QueueCommand::ShowQueue)),
            other => {
                if let Some(label) = other.strip_prefix("opt:") {
                    Some(Self::OptionLabel(label.to_owned()))
                } else if let Some(session) = other.strip_prefix("reply:") {
                    Some(Self::Reply(session.to_owned()))
                } else if let Some(session) = other.strip_prefix("cmd:priority:") {
                    Some(Self::Cmd(QueueCommand::Priority(session.to_owned())))
                } else if let Some(session) = other.strip_prefix("tmux:prompt:") {
                    Some(Self::Tmux(TmuxAction::Prompt(session.to_owned())))
                } else if let Some(session) = other.strip_prefix("tmux:queue:") {
                    Some(Self::Tmux(TmuxAction::Queue(session.to_owned())))
                } else {
                    None
                }
            }
        }
    }

    /// Render this value back into the wire dialect, truncating any
    /// session-name portion (never the command prefix) to respect
    /// [`MAX_CALLBACK_BYTES`].
    #[must_use]
    pub fn to_wire(&self) -> String {
        match self {
            Self::Permission(PermissionChoice::Yes) => "yes".to_owned(),
            Self::Permission(PermissionChoice::Always) => "always".to_owned(),
            Self::Permission(PermissionChoice::No) => "no".to_owned(),
            Self::OptionLabel(label) => truncate_with_prefix("opt:", label),
            Self::OptionOther => "opt:__other__".to_owned(),
            Self::Reply(session) => truncate_with_prefix("reply:", session),
            Self::Cmd(QueueCommand::Skip) => "cmd:skip".to_owned(),
            Self::Cmd(QueueCommand::ShowQueue) => "cmd:show_queue".to_owned(),
            Self::Cmd(QueueCommand::Priority(session)) => {
                truncate_with_prefix("cmd:priority:", session)
            }
            Self::Tmux(TmuxAction::Prompt(session)) => truncate_with_prefix("tmux:prompt:", session),
            Self::Tmux(TmuxAction::Queue(session)) => truncate_with_prefix("tmux:queue:", session),
        }
    }
}

/// Join a fixed prefix with a variable suffix, truncating only the
/// suffix so the total stays within [`MAX_CALLBACK_BYTES`] bytes.
fn truncate_with_prefix(prefix: &str, suffix: &str) -> String {
    let budget = MAX_CALLBACK_BYTES.saturating_sub(prefix.len());
    let mut truncated = String::with_capacity(budget);
    for ch in suffix.chars() {
        if truncated.len() + ch.len_utf8() > budget {
            break;
        }
        truncated.push(ch);
    }
    format!("{prefix}{truncated}")
}
