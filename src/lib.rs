//! slircbot - Straylight IRC Bot
//!
//! A supervised IRC client. A small pipeline of restartable workers reads
//! and writes the socket, dispatches commands and events to handler
//! modules, and fires scheduled tasks. The main loop performs control
//! tasks such as reloads, restarts, and reconnects.

pub mod bot;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod network;
pub mod options;
pub mod process;
pub mod scheduler;
pub mod shared;
pub mod telemetry;

pub use bot::{Bot, BotHandle, Task};
pub use config::Config;
