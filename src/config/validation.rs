//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::Config;
use crate::options::{parse_address, valid_nick};
use std::path::Path;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("identity.nick is not a valid nickname: '{0}'")]
    InvalidNick(String),
    #[error("connection.address must look like host[:port], got '{0}'")]
    InvalidAddress(String),
    #[error("pool.ceiling must be at least 1")]
    ZeroPoolCeiling,
    #[error("scheduler.tick_ms must be at least 1")]
    ZeroTick,
    #[error("lifecycle.queue_capacity must be at least 1")]
    ZeroQueueCapacity,
    #[error("database.path parent directory does not exist: {0}")]
    DatabasePathInvalid(String),
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !valid_nick(&config.identity.nick) {
        errors.push(ValidationError::InvalidNick(config.identity.nick.clone()));
    }

    if parse_address(&config.connection.address).is_none() {
        errors.push(ValidationError::InvalidAddress(
            config.connection.address.clone(),
        ));
    }

    if config.pool.ceiling == 0 {
        errors.push(ValidationError::ZeroPoolCeiling);
    }
    if config.scheduler.tick_ms == 0 {
        errors.push(ValidationError::ZeroTick);
    }
    if config.lifecycle.queue_capacity == 0 {
        errors.push(ValidationError::ZeroQueueCapacity);
    }

    let db_path = Path::new(&config.database.path);
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        errors.push(ValidationError::DatabasePathInvalid(
            config.database.path.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
