//! Config-file change notification.
//!
//! Watches the config file for writes and logs a suggestion to run
//! `reload_config` on the control plane. It never reloads the running
//! configuration itself — per the control-plane design, `reload_config`
//! is the one explicit, auditable trigger for picking up a new file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Spawn a background task that watches `config_path` and logs changes.
///
/// # Errors
///
/// Returns a `notify::Error` if the underlying OS watcher cannot be
/// installed (e.g. the parent directory does not exist).
pub fn spawn_watcher(
    config_path: PathBuf,
    ct: CancellationToken,
) -> notify::Result<tokio::task::JoinHandle<()>> {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        if let Ok(event) = event {
            let _ = tx.send(event);
        }
    })?;

    let parent = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    watcher.watch(&parent, RecursiveMode::NonRecursive)?;

    let handle = tokio::spawn(async move {
        // Keep the watcher alive for the life of the task.
        let _watcher = watcher;
        let mut debounce = tokio::time::interval(Duration::from_millis(500));
        loop {
            tokio::select! {
                () = ct.cancelled() => {
                    info!("config watcher shutting down");
                    break;
                }
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    if event.paths.iter().any(|p| p == &config_path) {
                        debounce.reset();
                        info!(
                            path = %config_path.display(),
                            "config file changed; run `reload_config` on the control plane to apply it"
                        );
                    }
                }
            }
        }
    });

    Ok(handle)
}

/// Re-read and re-validate configuration for a `reload_config` command.
///
/// Only the fields safe to change at runtime are meaningfully reloaded
/// by the caller (chat token, hook deadline, backoff cap); the chat id
/// and socket paths of an already-running daemon are not migrated.
///
/// # Errors
///
/// Returns `AppError::Config` if the file is missing or invalid.
pub fn reload(config_path: &Path) -> crate::Result<crate::config::GlobalConfig> {
    let mut config = crate::config::GlobalConfig::load_from_path(config_path)?;
    if let Err(err) = config.load_credentials() {
        warn!(%err, "reload_config: credentials unavailable, keeping previous token");
    }
    Ok(config)
}
