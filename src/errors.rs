//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
///
/// Variants correspond to the error taxonomy in the design notes:
/// `ChatAuth`/`ChatUnreachable` map to `auth_invalid`/`unreachable`,
/// `Poll` to `poll_error`, `Injection` to `inject_failed`, `HookIo` to
/// failures writing or reading the rendezvous protocol.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Chat token rejected or the configured chat is unreachable at startup.
    ChatAuth(String),
    /// Chat endpoint temporarily unreachable; caller should retry with backoff.
    ChatUnreachable(String),
    /// A single poll/reconnect iteration failed.
    Poll(String),
    /// Terminal injection failed (multiplexer send-keys or scripted keystrokes).
    Injection(String),
    /// Hook rendezvous socket I/O or protocol failure.
    HookIo(String),
    /// Control-plane socket I/O or protocol failure.
    ControlIo(String),
    /// Persistence failure in the permission rule cache.
    Db(String),
    /// File-system or generic I/O failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::ChatAuth(msg) => write!(f, "chat auth: {msg}"),
            Self::ChatUnreachable(msg) => write!(f, "chat unreachable: {msg}"),
            Self::Poll(msg) => write!(f, "poll: {msg}"),
            Self::Injection(msg) => write!(f, "injection: {msg}"),
            Self::HookIo(msg) => write!(f, "hook io: {msg}"),
            Self::ControlIo(msg) => write!(f, "control io: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::HookIo(format!("malformed json: {err}"))
    }
}
