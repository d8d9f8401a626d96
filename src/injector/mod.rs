//! Terminal Injector: types a reply back into the terminal the
//! assistant is running in.
//!
//! Two mechanisms, tried in the order the AFK Manager prefers them
//! (§4.6): the [`crate::multiplexer::TmuxMultiplexer`] `send-keys` path
//! when a session is tmux-backed, and this module's device-node path
//! when it isn't. Grounded in the prior implementation's
//! `AfkManager._inject_reply` (`daemon/afk.py`): an `osascript` script
//! that brings the tab matching a stored TTY path to the front and
//! simulates keystrokes through System Events, since macOS disabled
//! `TIOCSTI` for direct TTY writes.

use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::warn;

/// Injects a reply into a terminal addressed by its device node
/// (e.g. `/dev/ttys005`), via scripted OS keystroke simulation.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceNodeInjector;

impl DeviceNodeInjector {
    /// Type `text` followed by Enter into the Terminal.app tab whose
    /// TTY matches `device_path`.
    ///
    /// Returns `false` (never an error) on any failure — the caller is
    /// expected to drop the stored device node for this session when
    /// this returns `false`, matching the prior implementation's
    /// fall-through to "terminal may be closed".
    pub async fn inject(&self, device_path: &str, text: &str, subprocess_timeout: Duration) -> bool {
        let script = build_script(device_path, text);
        let mut command = Command::new("osascript");
        command.arg("-e").arg(script);

        match timeout(subprocess_timeout, command.output()).await {
            Ok(Ok(output)) => output.status.success(),
            Ok(Err(err)) => {
                warn!(%err, "osascript injection failed to spawn");
                false
            }
            Err(_) => {
                warn!(device_path, "osascript injection timed out");
                false
            }
        }
    }
}

fn build_script(device_path: &str, text: &str) -> String {
    let escaped_tty = escape_applescript_string(device_path);
    let escaped_text = escape_applescript_string(text);
    format!(
        "tell application \"Terminal\"\n\
         \u{20}\u{20}repeat with w in windows\n\
         \u{20}\u{20}\u{20}\u{20}repeat with t in tabs of w\n\
         \u{20}\u{20}\u{20}\u{20}\u{20}\u{20}if tty of t is \"{escaped_tty}\" then\n\
         \u{20}\u{20}\u{20}\u{20}\u{20}\u{20}\u{20}\u{20}set frontmost of w to true\n\
         \u{20}\u{20}\u{20}\u{20}\u{20}\u{20}\u{20}\u{20}set selected tab of w to t\n\
         \u{20}\u{20}\u{20}\u{20}\u{20}\u{20}\u{20}\u{20}activate\n\
         \u{20}\u{20}\u{20}\u{20}\u{20}\u{20}end if\n\
         \u{20}\u{20}\u{20}\u{20}end repeat\n\
         \u{20}\u{20}end repeat\n\
         end tell\n\
         delay 0.3\n\
         tell application \"System Events\" to keystroke \"{escaped_text}\"\n\
         delay 0.1\n\
         tell application \"System Events\" to key code 36"
    )
}

/// Escape backslashes and double quotes for embedding in an AppleScript
/// string literal, matching the prior implementation's escaping exactly.
fn escape_applescript_string(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_quotes_and_backslashes() {
        assert_eq!(escape_applescript_string(r#"say "hi"\"#), r#"say \"hi\"\\"#);
    }

    #[test]
    fn script_embeds_tty_path_and_escaped_text() {
        let script = build_script("/dev/ttys005", r#"it's "quoted""#);
        assert!(script.contains("tty of t is \"/dev/ttys005\""));
        assert!(script.contains(r#"it's \"quoted\""#));
        assert!(script.contains("key code 36"));
    }
}
