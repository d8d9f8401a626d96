//! Multiplexer capability: discovers and drives `tmux` sessions running
//! a terminal assistant, for the `/sessions` panel and tmux-based reply
//! injection.
//!
//! Grounded in the prior implementation's `TmuxMonitor`
//! (`daemon/tmux_monitor.py`): the same pane-content pattern matching
//! (`ctrl+c to interrupt` → working, `[y/n]` → waiting, the prompt glyph
//! → idle) and the same idle-check-then-send-keys sequence for prompt
//! injection, run through `tokio::process::Command` the way the
//! teacher's `slack/commands.rs` shells out to helper binaries.

use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

const SUBPROCESS_TIMEOUT: Duration = Duration::from_secs(5);
const CAPTURE_LINES: u32 = 50;
const STATUS_TAIL_LINES: usize = 20;

/// A tmux session's last-known activity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Prompt glyph visible, nothing running.
    Idle,
    /// "ctrl+c to interrupt" visible — the assistant is actively working.
    Working,
    /// A `[y/n]`-style permission prompt is visible in the pane.
    Waiting,
    /// No `claude`-named process found in any pane of the session.
    Dead,
    /// Pane content didn't match any recognized pattern.
    Unknown,
}

/// One entry of [`TmuxMultiplexer::list_statuses`].
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// tmux session name.
    pub session: String,
    /// Current activity state.
    pub status: SessionStatus,
}

/// Drives `tmux` as a subprocess to discover and talk to sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct TmuxMultiplexer;

impl TmuxMultiplexer {
    /// Whether the `tmux` binary is installed and runnable.
    pub async fn is_available(&self) -> bool {
        run(["-V"].as_slice()).await.is_some_and(|output| output.status.success())
    }

    /// All tmux session names.
    pub async fn list_sessions(&self) -> Vec<String> {
        let Some(output) = run(["list-sessions", "-F", "#{session_name}"].as_slice()).await else {
            return Vec::new();
        };
        if !output.status.success() {
            return Vec::new();
        }
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect()
    }

    /// Whether any pane of `session` is running a process named `claude`.
    pub async fn has_target(&self, session: &str) -> bool {
        let Some(output) =
            run(["list-panes", "-t", session, "-F", "#{pane_current_command}"].as_slice()).await
        else {
            return false;
        };
        if !output.status.success() {
            return false;
        }
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .any(|line| line.to_lowercase().contains("claude"))
    }

    /// Capture the last `CAPTURE_LINES` lines of a session's pane.
    pub async fn capture_pane(&self, session: &str) -> Option<String> {
        let lines = CAPTURE_LINES.to_string();
        let output = run(["capture-pane", "-t", session, "-p", "-l", &lines].as_slice()).await?;
        output.status.success().then(|| String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Resolve a session's current [`SessionStatus`].
    pub async fn status_of(&self, session: &str) -> SessionStatus {
        if !self.has_target(session).await {
            return SessionStatus::Dead;
        }
        match self.capture_pane(session).await {
            Some(content) => detect_status(&content),
            None => SessionStatus::Unknown,
        }
    }

    /// All non-dead Claude Code sessions and their statuses.
    pub async fn list_statuses(&self) -> Vec<SessionInfo> {
        let mut results = Vec::new();
        for session in self.list_sessions().await {
            let status = self.status_of(&session).await;
            if status != SessionStatus::Dead {
                results.push(SessionInfo { session, status });
            }
        }
        results
    }

    /// Type `text` literally into an idle session and press Enter.
    ///
    /// Re-checks idleness immediately before sending, since the session
    /// may have resumed working between presentation and reply.
    pub async fn send_keys(&self, session: &str, text: &str) -> bool {
        if self.status_of(session).await != SessionStatus::Idle {
            return false;
        }
        let literal_ok = run(["send-keys", "-t", session, "-l", text].as_slice())
            .await
            .is_some_and(|output| output.status.success());
        if !literal_ok {
            return false;
        }
        run(["send-keys", "-t", session, "Enter"].as_slice())
            .await
            .is_some_and(|output| output.status.success())
    }
}

fn detect_status(content: &str) -> SessionStatus {
    let lines: Vec<&str> = content.trim_end().lines().collect();
    let tail_start = lines.len().saturating_sub(STATUS_TAIL_LINES);
    let tail = lines[tail_start..].join("\n");

    if tail.contains("ctrl+c to interrupt") {
        SessionStatus::Working
    } else if tail.contains("[y/n]") {
        SessionStatus::Waiting
    } else if tail.contains('\u{276f}') {
        SessionStatus::Idle
    } else {
        SessionStatus::Unknown
    }
}

async fn run(args: &[&str]) -> Option<std::process::Output> {
    let mut command = Command::new("tmux");
    command.args(args);
    timeout(SUBPROCESS_TIMEOUT, command.output()).await.ok()?.ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_working_from_interrupt_hint() {
        assert_eq!(detect_status("some output\nctrl+c to interrupt\n"), SessionStatus::Working);
    }

    #[test]
    fn detects_waiting_from_permission_prompt() {
        assert_eq!(detect_status("Allow this action? [y/n]\n"), SessionStatus::Waiting);
    }

    #[test]
    fn detects_idle_from_prompt_glyph() {
        assert_eq!(detect_status("\u{276f} "), SessionStatus::Idle);
    }

    #[test]
    fn unrecognized_content_is_unknown() {
        assert_eq!(detect_status("garbage output with no markers"), SessionStatus::Unknown);
    }

    #[test]
    fn only_the_last_twenty_lines_are_considered() {
        let mut content = String::new();
        content.push_str("ctrl+c to interrupt\n");
        for _ in 0..25 {
            content.push_str("noise\n");
        }
        content.push('\u{276f}');
        assert_eq!(detect_status(&content), SessionStatus::Idle);
    }
}
