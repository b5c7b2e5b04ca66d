use std::str::FromStr;

use bytes::Bytes;

use crate::decode::heuristic_decode;
use crate::error::{extract_command_hint, MessageParseError, ProtocolError};
use crate::prefix::Origin;

use super::nom_parser::ParsedMessage;

/// An owned IRC message.
///
/// Built once per received line and never mutated afterwards, apart from the
/// connection sequence number assigned by the reader.
///
/// # Example
///
/// ```
/// use slirc_proto::Message;
///
/// let msg: Message = ":nick!user@host PRIVMSG #channel :Hello!".parse().unwrap();
/// assert_eq!(msg.params[1], "Hello!");
///
/// let reply = Message::privmsg("#channel", "Hi there");
/// assert_eq!(reply.to_line(), "PRIVMSG #channel :Hi there");
/// ```
#[derive(Clone, PartialEq, Debug)]
pub struct Message {
    /// Origin of the message, present only when the line carried a prefix.
    pub origin: Option<Origin>,
    /// The command token, e.g. `PRIVMSG` or `001`.
    pub command: String,
    /// Parameters; the last may contain spaces.
    pub params: Vec<String>,
    /// The original octets, without CR/LF.
    pub raw: Bytes,
    /// 1-based ordinal since connection start, or 0 for locally built messages.
    pub sequence: u64,
}

impl Message {
    /// Create a message from a command and parameters.
    pub fn new<I, S>(command: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Message {
            origin: None,
            command: command.into(),
            params: params.into_iter().map(Into::into).collect(),
            raw: Bytes::new(),
            sequence: 0,
        }
    }

    /// Shorthand for a `PRIVMSG`.
    pub fn privmsg(target: impl Into<String>, text: impl Into<String>) -> Self {
        Message::new("PRIVMSG", [target.into(), text.into()])
    }

    /// Attach an origin.
    #[must_use]
    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Attach a connection sequence number.
    #[must_use]
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Parse one raw line.
    ///
    /// Trailing CR/LF is stripped first. Each parameter is decoded
    /// independently with [`heuristic_decode`].
    pub fn parse(line: &[u8]) -> Result<Message, MessageParseError> {
        let end = line
            .iter()
            .rposition(|&b| b != b'\r' && b != b'\n')
            .map_or(0, |i| i + 1);
        let stripped = &line[..end];

        if stripped.is_empty() {
            return Err(MessageParseError::EmptyMessage);
        }
        if stripped.starts_with(b": ") || stripped == b":" {
            return Err(MessageParseError::EmptyPrefix);
        }

        let parsed =
            ParsedMessage::parse(stripped).map_err(|position| MessageParseError::InvalidCommand {
                position,
                hint: extract_command_hint(stripped),
            })?;

        Ok(Message {
            origin: parsed
                .prefix
                .map(|p| Origin::new_from_str(&heuristic_decode(p))),
            command: String::from_utf8_lossy(parsed.command).into_owned(),
            params: parsed.params.iter().map(|p| heuristic_decode(p)).collect(),
            raw: Bytes::copy_from_slice(stripped),
            sequence: 0,
        })
    }

    /// Nickname of the sender, if the line carried a prefix.
    pub fn nick(&self) -> Option<&str> {
        self.origin.as_ref().map(|o| o.nick.as_str())
    }

    /// Parameter at `index`, if present.
    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// The last parameter, which holds free text for most commands.
    pub fn trailing(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }

    /// Whether the command is a three-digit numeric reply.
    pub fn is_numeric(&self) -> bool {
        self.command.len() == 3 && self.command.bytes().all(|b| b.is_ascii_digit())
    }
}

impl FromStr for Message {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Message, Self::Err> {
        Message::parse(s.as_bytes()).map_err(|cause| ProtocolError::InvalidMessage {
            string: s.to_owned(),
            cause,
        })
    }
}
