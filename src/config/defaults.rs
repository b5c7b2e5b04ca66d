//! Default value functions for configuration.
//!
//! Separated into its own module for clarity and reuse.

use rand::Rng;

/// Returns `true` (for serde defaults).
pub fn default_true() -> bool {
    true
}

// =============================================================================
// Connection / Identity Defaults
// =============================================================================

pub fn default_address() -> String {
    "irc.libera.chat:6667".to_string()
}

/// A random `slircbotNNN` nick, 000 to 999 inclusive.
pub fn default_nick() -> String {
    format!("slircbot{:03}", rand::thread_rng().gen_range(0..1000))
}

pub fn default_user() -> String {
    "slircbot".to_string()
}

pub fn default_realname() -> String {
    "slircbot/irc".to_string()
}

pub fn default_database_path() -> String {
    "slircbot.db".to_string()
}

// =============================================================================
// Option Defaults
// =============================================================================

pub fn default_prefix() -> String {
    ".".to_string()
}

pub fn default_modules() -> Vec<String> {
    vec![
        "connection".to_string(),
        "admin".to_string(),
        "general".to_string(),
    ]
}

// =============================================================================
// Executor Pool Defaults
// =============================================================================

pub fn default_pool_ceiling() -> usize {
    16
}

pub fn default_pool_timeout() -> u64 {
    60
}

// =============================================================================
// Scheduler Defaults
// =============================================================================

pub fn default_tick_ms() -> u64 {
    333
}

pub fn default_ping_interval() -> u64 {
    300
}

pub fn default_pong_timeout() -> u64 {
    50
}

pub fn default_dump_interval() -> u64 {
    180
}

pub fn default_collect_interval() -> u64 {
    30
}

// =============================================================================
// Sender Defaults
// =============================================================================

pub fn default_min_interval_ms() -> u64 {
    500
}

pub fn default_max_line_len() -> usize {
    510
}

// =============================================================================
// Lifecycle Defaults
// =============================================================================

pub fn default_queue_capacity() -> usize {
    1024
}

pub fn default_stop_timeout() -> u64 {
    6
}

pub fn default_restart_backoff() -> u64 {
    3
}

pub fn default_reconnect_backoff() -> u64 {
    6
}

pub fn default_connect_backoff() -> u64 {
    3
}
