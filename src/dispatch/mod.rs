//! The two dispatch stages between the reader and the handlers.
//!
//! - [`messages`]: resolves commands and admits them to the executor pool
//! - [`events`]: runs event bindings by priority

pub mod events;
pub mod messages;
