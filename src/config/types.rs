//! Core configuration types and loading.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use super::defaults::*;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Bot configuration.
///
/// Every section is optional; a file containing only `[identity] nick = ...`
/// is a complete configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server to connect to.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// How the bot presents itself.
    #[serde(default)]
    pub identity: IdentityConfig,
    /// Initial values for runtime options.
    #[serde(default)]
    pub options: OptionsConfig,
    /// Who may run administrative commands.
    #[serde(default)]
    pub admin: AdminConfig,
    /// Persistent store location.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Executor pool limits.
    #[serde(default)]
    pub pool: PoolConfig,
    /// Scheduler tick and periodic intervals.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Outbound line shaping.
    #[serde(default)]
    pub sender: SenderConfig,
    /// Worker stop and restart timings.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Server connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// `host` or `host:port` (port defaults to 6667).
    #[serde(default = "default_address")]
    pub address: String,
    /// Wrap the connection in TLS.
    #[serde(default)]
    pub tls: bool,
    /// Verify the server certificate against the system roots.
    #[serde(default = "default_true")]
    pub verify_cert: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            tls: false,
            verify_cert: true,
        }
    }
}

/// Identity sent during registration.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_nick")]
    pub nick: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_realname")]
    pub realname: String,
    /// Server password (`PASS`).
    pub password: Option<String>,
    /// NickServ password, sent as `IDENTIFY`.
    pub nickserv: Option<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            nick: default_nick(),
            user: default_user(),
            realname: default_realname(),
            password: None,
            nickserv: None,
        }
    }
}

/// Command prefix: one for every channel, or a channel-to-prefix map where
/// the empty key holds the fallback.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PrefixSetting {
    Single(String),
    PerChannel(HashMap<String, String>),
}

impl Default for PrefixSetting {
    fn default() -> Self {
        PrefixSetting::Single(default_prefix())
    }
}

/// Seed values for the runtime option store.
#[derive(Debug, Clone, Deserialize)]
pub struct OptionsConfig {
    #[serde(default)]
    pub prefix: PrefixSetting,
    /// Disable outbound spacing and restart back-offs.
    #[serde(default)]
    pub flood: bool,
    /// Channels joined after registration.
    #[serde(default)]
    pub channels: Vec<String>,
    /// Handler modules to enable.
    #[serde(default = "default_modules")]
    pub modules: Vec<String>,
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            prefix: PrefixSetting::default(),
            flood: false,
            channels: Vec::new(),
            modules: default_modules(),
        }
    }
}

/// Administrative credentials.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminConfig {
    /// Nick of the owner.
    pub owner: Option<String>,
    /// Nicks allowed to run admin commands.
    #[serde(default)]
    pub users: Vec<String>,
    /// Channels where admin commands may be issued.
    #[serde(default)]
    pub channels: Vec<String>,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the redb file.
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Executor pool configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Concurrent handler invocations allowed before new ones are rejected.
    #[serde(default = "default_pool_ceiling")]
    pub ceiling: usize,
    /// Seconds a handler may run before the collector aborts it.
    #[serde(default = "default_pool_timeout")]
    pub timeout: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            ceiling: default_pool_ceiling(),
            timeout: default_pool_timeout(),
        }
    }
}

impl PoolConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Scheduler configuration. Intervals are in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    /// Seconds after a ping before a missing pong forces a restart.
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout: u64,
    #[serde(default = "default_dump_interval")]
    pub dump_interval: u64,
    #[serde(default = "default_collect_interval")]
    pub collect_interval: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            ping_interval: default_ping_interval(),
            pong_timeout: default_pong_timeout(),
            dump_interval: default_dump_interval(),
            collect_interval: default_collect_interval(),
        }
    }
}

impl SchedulerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/// Sender configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SenderConfig {
    /// Minimum spacing between lines unless `flood` is set.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// Longest line written, excluding CRLF.
    #[serde(default = "default_max_line_len")]
    pub max_line_len: usize,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            max_line_len: default_max_line_len(),
        }
    }
}

impl SenderConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

/// Worker lifecycle timings, in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
    /// Capacity of each inter-worker queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// How long a graceful stop waits before aborting a worker.
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout: u64,
    #[serde(default = "default_restart_backoff")]
    pub restart_backoff: u64,
    #[serde(default = "default_reconnect_backoff")]
    pub reconnect_backoff: u64,
    /// Pause after a refused connection.
    #[serde(default = "default_connect_backoff")]
    pub connect_backoff: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            stop_timeout: default_stop_timeout(),
            restart_backoff: default_restart_backoff(),
            reconnect_backoff: default_reconnect_backoff(),
            connect_backoff: default_connect_backoff(),
        }
    }
}

impl LifecycleConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout)
    }
}
