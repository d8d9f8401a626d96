//! Per-session context tracked by the AFK Manager outside the queue.

use chrono::{DateTime, Utc};

/// How a reply to `reply_target` should be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyTargetMode {
    /// Deliver via the terminal multiplexer's send-keys capability.
    Multiplexer,
    /// Deliver via scripted OS-level keystroke simulation at a device node.
    DeviceNode,
}

/// State the AFK Manager keeps about a session outside the request queue.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Most recent "here is what the assistant just said" snippet.
    pub last_context_snippet: Option<String>,
    /// Terminal device-node path captured when a hook last ran for this session.
    pub terminal_device: Option<String>,
    /// When this session last produced a context update or request.
    pub last_seen: DateTime<Utc>,
}

impl SessionContext {
    /// A freshly-seen session with no context yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_context_snippet: None,
            terminal_device: None,
            last_seen: Utc::now(),
        }
    }

    /// Record a context snippet, bounding it to the last five lines and
    /// ~600 characters per the presenter's display rules.
    pub fn set_context_snippet(&mut self, snippet: &str) {
        self.last_context_snippet = Some(bound_snippet(snippet));
        self.last_seen = Utc::now();
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

const MAX_SNIPPET_CHARS: usize = 600;
const MAX_SNIPPET_LINES: usize = 5;

/// Keep only the last [`MAX_SNIPPET_LINES`] lines and at most
/// [`MAX_SNIPPET_CHARS`] characters, prepending an ellipsis when truncated.
#[must_use]
pub fn bound_snippet(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let truncated_lines = lines.len() > MAX_SNIPPET_LINES;
    let kept: Vec<&str> = lines
        .iter()
        .rev()
        .take(MAX_SNIPPET_LINES)
        .rev()
        .copied()
        .collect();
    let mut joined = kept.join("\n");

    let truncated_chars = joined.chars().count() > MAX_SNIPPET_CHARS;
    if truncated_chars {
        let char_count = joined.chars().count();
        let skip = char_count - MAX_SNIPPET_CHARS;
        joined = joined.chars().skip(skip).collect();
    }

    if truncated_lines || truncated_chars {
        format!("…{joined}")
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_last_five_lines_with_ellipsis() {
        let text = (1..=8)
            .map(|n| format!("line {n}"))
            .collect::<Vec<_>>()
            .join("\n");
        let bounded = bound_snippet(&text);
        assert!(bounded.starts_with('…'));
        assert!(bounded.contains("line 8"));
        assert!(!bounded.contains("line 1\n"));
    }

    #[test]
    fn short_text_is_unchanged() {
        let bounded = bound_snippet("hello");
        assert_eq!(bounded, "hello");
    }

    #[test]
    fn caps_at_max_characters() {
        let text = "x".repeat(1000);
        let bounded = bound_snippet(&text);
        assert!(bounded.starts_with('…'));
        assert!(bounded.chars().count() <= MAX_SNIPPET_CHARS + 1);
    }
}
