//! Bot behavior.
//!
//! Handlers are grouped into [`Module`]s. A module registers commands,
//! events, startup hooks, and context builders into [`Bindings`]; the
//! [`Registry`] rebuilds the bindings from the enabled modules on every
//! reload and swaps them in atomically.
//!
//! Built-in modules:
//!
//! - `connection`: registration, own-address discovery, keepalive
//! - `admin`: caller credentials and control commands
//! - `general`: everyday commands, deferred messages, and `seen` and link
//!   bookkeeping

mod admin;
mod connection;
pub mod core;
mod general;

use std::sync::Arc;

pub use self::admin::AdminModule;
pub use self::connection::ConnectionModule;
pub use self::core::{
    Bindings, CommandBinding, Context, Credentials, EventBinding, Handler, Module, Priority,
    Registry, format_line,
};
pub use self::general::{GeneralModule, LINKS_KEY, MESSAGES_KEY, SEEN_KEY};

/// Every module compiled into the bot, in registration order.
pub fn builtin_modules() -> Vec<Arc<dyn Module>> {
    vec![
        Arc::new(ConnectionModule),
        Arc::new(AdminModule),
        Arc::new(GeneralModule),
    ]
}
