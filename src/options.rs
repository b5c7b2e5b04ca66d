//! Runtime option store.
//!
//! Options start from the config file, are overridden by values persisted
//! under the `options` database key, and can be changed at runtime by admin
//! commands. Every write is validated and normalized first, and writes are
//! serialized so read-modify-write updates never lose each other. Some options
//! react to changes: a new `nick` is sent to the server and a new `modules`
//! list triggers a reload.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bot::Task;
use crate::config::{Config, PrefixSetting};
use crate::db::{Database, StorageError};
use crate::error::QueueError;
use crate::process::WorkQueue;

/// Database key holding runtime overrides.
const STORE_KEY: &str = "options";

/// Longest accepted command prefix.
const MAX_PREFIX_LEN: usize = 128;

const DEFAULT_PORT: u16 = 6667;

static ADDRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(ssl )?([^:\s]+)(?::([0-9]+))?$").expect("address pattern is valid")
});

static NICK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9\x5B-\x60\x7B-\x7D][A-Za-z0-9\x5B-\x60\x7B-\x7D-]{0,31}$")
        .expect("nick pattern is valid")
});

/// Option store errors.
#[derive(Debug, Error)]
pub enum OptionError {
    #[error("unknown option: {0}")]
    Unknown(String),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: String, reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

impl OptionError {
    fn invalid(name: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// A parsed server address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.tls {
            write!(f, "ssl ")?;
        }
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Parse `[ssl ]host[:port]`.
pub fn parse_address(text: &str) -> Option<Address> {
    let caps = ADDRESS_RE.captures(text)?;
    let port = match caps.get(3) {
        Some(port) => port.as_str().parse().ok()?,
        None => DEFAULT_PORT,
    };
    Some(Address {
        host: caps[2].to_string(),
        port,
        tls: caps.get(1).is_some(),
    })
}

pub fn valid_nick(nick: &str) -> bool {
    NICK_RE.is_match(nick)
}

/// Channel names may not contain spaces or commas.
pub fn valid_channel(channel: &str) -> bool {
    !channel.is_empty() && !channel.contains([' ', ',', '\x07'])
}

#[derive(Clone)]
pub struct Options {
    values: Arc<DashMap<String, Value>>,
    /// Held across every read, persist and insert of a write.
    write: Arc<Mutex<()>>,
    db: Database,
    send: WorkQueue<String>,
    tasks: WorkQueue<Task>,
}

impl Options {
    /// Seed from `config`, then apply persisted overrides.
    pub fn new(
        config: &Config,
        db: Database,
        send: WorkQueue<String>,
        tasks: WorkQueue<Task>,
    ) -> Self {
        let values = DashMap::new();
        for (name, value) in seed(config) {
            values.insert(name.to_string(), value);
        }

        if let Some(Value::Object(stored)) = db.cached(STORE_KEY) {
            for (name, value) in stored {
                match normalize(&name, value) {
                    Ok(value) => {
                        values.insert(name, value);
                    }
                    Err(e) => warn!(option = %name, error = %e, "Ignoring stored option"),
                }
            }
        }

        Self {
            values: Arc::new(values),
            write: Arc::new(Mutex::new(())),
            db,
            send,
            tasks,
        }
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.values.get(name).map(|v| v.value().clone())
    }

    /// Set an option and run its reaction.
    ///
    /// Returns `false` if the value was already set.
    pub async fn put(&self, name: &str, value: Value) -> Result<bool, OptionError> {
        self.update(name, |_| value).await
    }

    /// Replace an option with `change` applied to its current value, then
    /// run its reaction. No other write to any option interleaves with the
    /// read and the write.
    ///
    /// Returns `false` if the value did not change.
    pub async fn update<F>(&self, name: &str, change: F) -> Result<bool, OptionError>
    where
        F: FnOnce(Option<Value>) -> Value,
    {
        if !self.update_quiet(name, change)? {
            return Ok(false);
        }

        match name {
            "nick" => {
                self.send.put(format!("NICK {}", self.nick())).await?;
            }
            "modules" => {
                self.tasks.put(Task::Reload { reply_to: None }).await?;
            }
            _ => {}
        }
        Ok(true)
    }

    /// Set an option without running its reaction.
    pub fn put_quiet(&self, name: &str, value: Value) -> Result<bool, OptionError> {
        self.update_quiet(name, |_| value)
    }

    /// [`Options::update`] without the reaction. `change` must not write
    /// options itself.
    pub fn update_quiet<F>(&self, name: &str, change: F) -> Result<bool, OptionError>
    where
        F: FnOnce(Option<Value>) -> Value,
    {
        let _write = self.write.lock();
        let current = self.get(name);
        let value = normalize(name, change(current.clone()))?;
        if current.as_ref() == Some(&value) {
            return Ok(false);
        }

        self.db.with_collection(STORE_KEY, |stored| {
            if !stored.is_object() {
                *stored = json!({});
            }
            if let Some(map) = stored.as_object_mut() {
                map.insert(name.to_string(), value.clone());
            }
        })?;
        self.values.insert(name.to_string(), value);
        info!(option = name, "Option changed");
        Ok(true)
    }

    /// Names and values of every option, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, Value)> {
        let mut all: Vec<_> = self
            .values
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn string(&self, name: &str) -> Option<String> {
        self.get(name).and_then(|v| v.as_str().map(str::to_string))
    }

    pub fn list(&self, name: &str) -> Vec<String> {
        string_list(self.get(name))
    }

    pub fn nick(&self) -> String {
        self.string("nick").unwrap_or_default()
    }

    pub fn flood(&self) -> bool {
        self.get("flood").and_then(|v| v.as_bool()).unwrap_or(false)
    }

    pub fn address(&self) -> Option<Address> {
        self.string("address").and_then(|a| parse_address(&a))
    }

    /// The prefix map, with the fallback under the empty key.
    pub fn prefixes(&self) -> HashMap<String, String> {
        match self.get("prefix") {
            Some(Value::String(single)) => HashMap::from([(String::new(), single)]),
            Some(Value::Object(map)) => map
                .into_iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k, v.to_string())))
                .collect(),
            _ => HashMap::new(),
        }
    }

    /// Command prefix in effect for `channel`.
    pub fn prefix_for(&self, channel: Option<&str>) -> String {
        let map = self.prefixes();
        channel
            .and_then(|c| map.get(c))
            .or_else(|| map.get(""))
            .cloned()
            .unwrap_or_else(|| ".".to_string())
    }
}

/// The strings in a list-valued option, empty for anything else.
pub fn string_list(value: Option<Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

fn seed(config: &Config) -> Vec<(&'static str, Value)> {
    let address = if config.connection.tls {
        format!("ssl {}", config.connection.address)
    } else {
        config.connection.address.clone()
    };
    let prefix = match &config.options.prefix {
        PrefixSetting::Single(p) => json!(p),
        PrefixSetting::PerChannel(map) => json!(map),
    };

    let mut seeded = vec![
        ("address", json!(address)),
        ("flood", json!(config.options.flood)),
        ("nick", json!(config.identity.nick)),
        ("prefix", prefix),
        ("channels", json!(config.options.channels)),
        ("modules", json!(config.options.modules)),
        ("admin-users", json!(config.admin.users)),
        ("admin-channels", json!(config.admin.channels)),
    ];
    if let Some(owner) = &config.admin.owner {
        seeded.push(("admin-owner", json!(owner)));
    }
    if let Some(password) = &config.identity.password {
        seeded.push(("password", json!(password)));
    }
    if let Some(nickserv) = &config.identity.nickserv {
        seeded.push(("nickserv", json!(nickserv)));
    }
    seeded
}

/// Validate `value` for option `name`, returning its canonical form.
pub fn normalize(name: &str, value: Value) -> Result<Value, OptionError> {
    match name {
        "address" => {
            let text = value
                .as_str()
                .ok_or_else(|| OptionError::invalid(name, "expected a string"))?;
            let address = parse_address(text)
                .ok_or_else(|| OptionError::invalid(name, "expected [ssl ]host[:port]"))?;
            Ok(json!(address.to_string()))
        }
        "nick" => match value.as_str() {
            Some(nick) if valid_nick(nick) => Ok(value),
            _ => Err(OptionError::invalid(name, "not a valid nickname")),
        },
        "flood" => match value {
            Value::Bool(_) => Ok(value),
            Value::String(ref s) if s == "true" || s == "false" => Ok(json!(s == "true")),
            _ => Err(OptionError::invalid(name, "expected true or false")),
        },
        "prefix" => match value {
            Value::String(ref p) => {
                check_prefix(name, p)?;
                Ok(value)
            }
            Value::Object(ref map) => {
                for p in map.values() {
                    let p = p
                        .as_str()
                        .ok_or_else(|| OptionError::invalid(name, "prefixes must be strings"))?;
                    check_prefix(name, p)?;
                }
                Ok(value)
            }
            _ => Err(OptionError::invalid(name, "expected a string or a map")),
        },
        "channels" | "modules" | "private" | "admin-users" | "admin-channels" => {
            let items = match value {
                Value::Array(items) => items
                    .into_iter()
                    .map(|v| match v {
                        Value::String(s) => Ok(s),
                        _ => Err(OptionError::invalid(name, "list items must be strings")),
                    })
                    .collect::<Result<Vec<_>, _>>()?,
                Value::String(s) => s
                    .split([' ', ','])
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
                _ => return Err(OptionError::invalid(name, "expected a list")),
            };
            Ok(json!(items))
        }
        "admin-owner" | "password" | "nickserv" => match value {
            Value::String(_) | Value::Null => Ok(value),
            _ => Err(OptionError::invalid(name, "expected a string")),
        },
        _ => {
            debug!(option = name, "Rejected unknown option");
            Err(OptionError::Unknown(name.to_string()))
        }
    }
}

fn check_prefix(name: &str, prefix: &str) -> Result<(), OptionError> {
    if prefix.is_empty() {
        return Err(OptionError::invalid(name, "prefix may not be empty"));
    }
    if prefix.chars().count() > MAX_PREFIX_LEN {
        return Err(OptionError::invalid(name, "prefix is too long"));
    }
    Ok(())
}
