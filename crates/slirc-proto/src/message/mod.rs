//! IRC message types and parsing.

mod nom_parser;
mod serialize;
mod types;

pub use self::types::Message;
