//! Unified error handling for slircbot.
//!
//! Each layer owns a `thiserror` enum; `main` folds them into `anyhow`.

use thiserror::Error;

use crate::config::ConfigError;
use crate::db::StorageError;
use crate::options::OptionError;

// ============================================================================
// Queue Errors
// ============================================================================

/// Errors raised when handing an item to a pipeline queue.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("{0} queue is closed")]
    Closed(&'static str),

    #[error("{0} queue is full")]
    Full(&'static str),
}

// ============================================================================
// Pool Errors
// ============================================================================

/// Errors raised by the executor pool.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    /// Admission rejected; the caller must not retry or wait.
    #[error("executor pool is full ({ceiling} running)")]
    Full { ceiling: usize },
}

// ============================================================================
// Handler Errors (command and event processing)
// ============================================================================

/// Errors returned by command and event handlers.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// A problem with the user's input. Replied to verbatim as `Error: ...`.
    #[error("{0}")]
    User(String),

    #[error("no reply target for this message")]
    NoReplyTarget,

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("option error: {0}")]
    Option(#[from] OptionError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl HandlerError {
    /// Shorthand for a user-facing error.
    pub fn user(text: impl Into<String>) -> Self {
        Self::User(text.into())
    }

    /// Get a static error code string for log labeling and script error replies.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::User(_) => "user_error",
            Self::NoReplyTarget => "no_reply_target",
            Self::Queue(_) => "queue_error",
            Self::Storage(_) => "storage_error",
            Self::Option(_) => "option_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

/// Result type for handlers.
pub type HandlerResult = Result<(), HandlerError>;

// ============================================================================
// Bot Errors (lifecycle)
// ============================================================================

/// Errors raised by the bot's lifecycle and startup.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("tls error: {0}")]
    Tls(String),

    #[error("failed to install signal handler: {0}")]
    Signal(std::io::Error),

    #[error("standard output closed")]
    BrokenPipe,

    #[error("reload failed: {0}")]
    Reload(String),
}

impl BotError {
    /// Get a static error code string for log labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::Storage(_) => "storage_error",
            Self::Queue(_) => "queue_error",
            Self::Connect { .. } => "connect_error",
            Self::Tls(_) => "tls_error",
            Self::Signal(_) => "signal_error",
            Self::BrokenPipe => "broken_pipe",
            Self::Reload(_) => "reload_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_error_displays_verbatim() {
        let err = HandlerError::user("no such nick");
        assert_eq!(err.to_string(), "no such nick");
        assert_eq!(err.error_code(), "user_error");
    }

    #[test]
    fn queue_error_converts() {
        let err: HandlerError = QueueError::Closed("send").into();
        assert_eq!(err.error_code(), "queue_error");
        assert_eq!(err.to_string(), "queue error: send queue is closed");
    }

    #[test]
    fn pool_full_mentions_ceiling() {
        assert_eq!(
            PoolError::Full { ceiling: 16 }.to_string(),
            "executor pool is full (16 running)"
        );
    }
}
