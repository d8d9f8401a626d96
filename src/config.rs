//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{AppError, Result};

/// Nested Slack configuration required for Socket Mode connectivity.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SlackConfig {
    /// App-level token used for Socket Mode. Loaded from `keyring` when absent.
    #[serde(default)]
    pub app_token: Option<String>,
    /// Bot user token used for posting messages. Loaded from `keyring` when absent.
    #[serde(default)]
    pub bot_token: Option<String>,
    /// Channel where prompts are posted and answers are read from.
    pub channel_id: String,
}

/// Hook rendezvous and control-plane timing configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Hook-side deadline (seconds) before it gives up and denies locally.
    #[serde(default = "default_hook_deadline_seconds")]
    pub hook_deadline_seconds: u64,
    /// Consecutive chat-poll/reconnect failures tolerated before giving up.
    #[serde(default = "default_poll_error_cap")]
    pub poll_error_cap: u32,
    /// Cap (seconds) on the exponential poll-error backoff.
    #[serde(default = "default_backoff_cap_seconds")]
    pub backoff_cap_seconds: u64,
    /// Timeout (seconds) for a single terminal-injection subprocess call.
    #[serde(default = "default_injection_timeout_seconds")]
    pub injection_timeout_seconds: u64,
}

const fn default_hook_deadline_seconds() -> u64 {
    600
}

const fn default_poll_error_cap() -> u32 {
    5
}

const fn default_backoff_cap_seconds() -> u64 {
    30
}

const fn default_injection_timeout_seconds() -> u64 {
    10
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Workspace root; session ids and socket defaults are derived relative to it.
    pub workspace_root: PathBuf,
    /// Slack connectivity settings.
    pub slack: SlackConfig,
    /// Hook rendezvous socket path. Defaults under `workspace_root/.agent-intercom/`.
    #[serde(default)]
    pub hook_socket_path: Option<PathBuf>,
    /// Control-plane socket path. Defaults under `workspace_root/.agent-intercom/`.
    #[serde(default)]
    pub control_socket_path: Option<PathBuf>,
    /// Optional on-disk path for the "always allow" permission rule cache.
    #[serde(default)]
    pub permission_cache_path: Option<PathBuf>,
    /// Timeout and backoff configuration.
    #[serde(default = "default_timeouts")]
    pub timeouts: TimeoutConfig,
}

fn default_timeouts() -> TimeoutConfig {
    TimeoutConfig {
        hook_deadline_seconds: default_hook_deadline_seconds(),
        poll_error_cap: default_poll_error_cap(),
        backoff_cap_seconds: default_backoff_cap_seconds(),
        injection_timeout_seconds: default_injection_timeout_seconds(),
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Directory holding process-private sockets and sentinels.
    #[must_use]
    pub fn runtime_dir(&self) -> PathBuf {
        std::env::var_os("XDG_RUNTIME_DIR").map_or_else(
            || self.workspace_root.join(".agent-intercom"),
            |dir| Path::new(&dir).join("agent-intercom"),
        )
    }

    /// Resolved hook rendezvous socket path.
    #[must_use]
    pub fn hook_socket_path(&self) -> PathBuf {
        self.hook_socket_path
            .clone()
            .unwrap_or_else(|| self.runtime_dir().join("hook.sock"))
    }

    /// Resolved control-plane socket path.
    #[must_use]
    pub fn control_socket_path(&self) -> PathBuf {
        self.control_socket_path
            .clone()
            .unwrap_or_else(|| self.runtime_dir().join("control.sock"))
    }

    /// Load Slack credentials from the OS keyring when not present inline.
    ///
    /// Mirrors the prior implementation's credential handling: the
    /// daemon only ever holds an opaque token, never a management
    /// interface for it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ChatAuth` if a token is configured nowhere.
    pub fn load_credentials(&mut self) -> Result<()> {
        if self.slack.bot_token.is_none() {
            self.slack.bot_token = keyring_lookup("agent-intercom", "slack-bot-token");
        }
        if self.slack.app_token.is_none() {
            self.slack.app_token = keyring_lookup("agent-intercom", "slack-app-token");
        }

        if self.slack.bot_token.is_none() || self.slack.app_token.is_none() {
            return Err(AppError::ChatAuth(
                "slack bot_token/app_token not found in config or keyring".into(),
            ));
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.slack.channel_id.trim().is_empty() {
            return Err(AppError::Config("slack.channel_id must not be empty".into()));
        }

        let canonical_root = self
            .workspace_root
            .canonicalize()
            .map_err(|err| AppError::Config(format!("workspace_root invalid: {err}")))?;
        self.workspace_root = canonical_root;

        Ok(())
    }
}

fn keyring_lookup(service: &str, key: &str) -> Option<String> {
    keyring::Entry::new(service, key)
        .ok()
        .and_then(|entry| entry.get_password().ok())
}
