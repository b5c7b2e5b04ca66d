//! Error types for the IRC protocol library.
//!
//! This module defines error types for line framing and message parsing
//! failures.

use thiserror::Error;

/// Convenience type alias for Results using [`ProtocolError`].
pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;

/// Extract the IRC command name from raw message bytes (for error reporting).
///
/// The command is the first space-delimited token after an optional prefix.
pub(crate) fn extract_command_hint(raw_line: &[u8]) -> Option<String> {
    let mut pos = 0;

    // Skip prefix: :server or :nick!user@host (terminated by space)
    if raw_line.first() == Some(&b':') {
        while pos < raw_line.len() && raw_line[pos] != b' ' {
            pos += 1;
        }
        while pos < raw_line.len() && raw_line[pos] == b' ' {
            pos += 1;
        }
    }

    let cmd_start = pos;
    while pos < raw_line.len() && raw_line[pos].is_ascii_alphanumeric() {
        pos += 1;
    }

    if pos > cmd_start {
        String::from_utf8(raw_line[cmd_start..pos].to_vec()).ok()
    } else {
        None
    }
}

/// Errors produced while framing or parsing protocol lines.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A line exceeded the configured framing limit.
    #[error("message too long: {actual} bytes (limit {limit})")]
    MessageTooLong {
        /// Observed length in bytes.
        actual: usize,
        /// Configured limit in bytes.
        limit: usize,
    },

    /// A line could not be parsed into a message.
    #[error("invalid message: {string}")]
    InvalidMessage {
        /// Lossy rendering of the offending line.
        string: String,
        /// Underlying parse failure.
        #[source]
        cause: MessageParseError,
    },
}

/// Reasons a single line could not be parsed.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum MessageParseError {
    /// The line was empty after stripping the terminator.
    #[error("empty message")]
    EmptyMessage,

    /// No command token could be identified.
    #[error("invalid command at position {position}")]
    InvalidCommand {
        /// Byte offset where the command was expected.
        position: usize,
        /// First token of the line, if any.
        hint: Option<String>,
    },

    /// A prefix marker was present with nothing after it.
    #[error("empty prefix")]
    EmptyPrefix,
}

impl MessageParseError {
    /// Get a static error code string for logging.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::EmptyMessage => "empty_message",
            Self::InvalidCommand { .. } => "invalid_command",
            Self::EmptyPrefix => "empty_prefix",
        }
    }
}
