//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: Config struct definitions, one per TOML section
//! - [`defaults`]: serde default value functions
//! - [`validation`]: startup checks run before anything connects

mod defaults;
mod types;
mod validation;

pub use types::{
    AdminConfig, Config, ConfigError, ConnectionConfig, DatabaseConfig, IdentityConfig,
    LifecycleConfig, OptionsConfig, PoolConfig, PrefixSetting, SchedulerConfig, SenderConfig,
};
pub use validation::{ValidationError, validate};
