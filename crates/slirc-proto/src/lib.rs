//! # slirc-proto
//!
//! IRC line parsing for the slircbot client.
//!
//! ## Features
//!
//! - Parsing of raw protocol lines into [`Message`] values
//! - Splitting of `nick!user@host` origins into [`Origin`]
//! - Per-parameter heuristic text decoding for servers that mix encodings
//! - Optional Tokio line framing via [`LineCodec`]
//!
//! ## Quick Start
//!
//! ```rust
//! use slirc_proto::Message;
//!
//! let msg = Message::parse(b":nick!user@host PRIVMSG #chan :hello there\r\n").unwrap();
//! assert_eq!(msg.command, "PRIVMSG");
//! assert_eq!(msg.params, vec!["#chan", "hello there"]);
//! assert_eq!(msg.nick(), Some("nick"));
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod decode;
pub mod error;
#[cfg(feature = "tokio")]
pub mod line;
pub mod message;
pub mod prefix;

pub use self::decode::heuristic_decode;
pub use self::error::{MessageParseError, ProtocolError};
#[cfg(feature = "tokio")]
pub use self::line::{LineCodec, MAX_IRC_LINE_LEN};
pub use self::message::Message;
pub use self::prefix::Origin;
