//! Integration test common infrastructure.
//!
//! Provides a scripted IRC server for the bot to connect to, and helpers
//! for spawning a bot against it.

pub mod bot;
pub mod server;

#[allow(unused_imports)]
pub use bot::{TestBot, test_config};
#[allow(unused_imports)]
pub use server::{MockConnection, MockServer};
