//! Server connection: transport, reader, and sender.

pub mod reader;
pub mod sender;
pub mod socket;
pub mod stream;
pub mod tls;

pub use socket::Connection;
pub use stream::BotStream;
