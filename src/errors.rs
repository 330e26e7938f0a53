//! Error types shared across the bot.

use std::fmt::{Display, Formatter};
use std::sync::OnceLock;

use regex::Regex;

/// Shared bot result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Signature of timeout-class failures reported by transports and the game bridge.
const TIMEOUT_PATTERN: &str = r"(?i)(timed?\s*out|ETIMEDOUT)";

#[derive(Debug)]
pub enum AppError {
    Config(String),
    Io(String),
    Transport(String),
    Timeout(String),
    Protocol(String),
    Session(String),
}

impl AppError {
    /// Timeout-class errors are logged as warnings; recovery is the same either way.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Config(_) => false,
            other => is_timeout_message(&other.to_string()),
        }
    }
}

fn is_timeout_message(message: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(TIMEOUT_PATTERN).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(message))
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Session(msg) => write!(f, "session: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::TimedOut {
            Self::Timeout(err.to_string())
        } else {
            Self::Io(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::Io(io) => io.into(),
            other => Self::Transport(other.to_string()),
        }
    }
}

impl From<native_tls::Error> for AppError {
    fn from(err: native_tls::Error) -> Self {
        Self::Transport(format!("tls: {err}"))
    }
}

impl From<tokio::time::error::Elapsed> for AppError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Self::Timeout(err.to_string())
    }
}
