//! Core handler infrastructure.
//!
//! - [`context`]: the per-invocation [`Context`] and caller [`Credentials`]
//! - [`registry`]: the [`Handler`] and [`Module`] traits, the [`Bindings`]
//!   table, and the [`Registry`] that swaps it atomically on reload

pub mod context;
pub mod registry;

pub use context::{Context, Credentials, format_line};
pub use registry::{
    Bindings, CommandBinding, EventBinding, Handler, Module, Priority, Registry,
};
