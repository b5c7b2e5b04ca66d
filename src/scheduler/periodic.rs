//! Periodic maintenance functions run on every scheduler tick.
//!
//! | name      | period          | fires                                  |
//! |-----------|-----------------|----------------------------------------|
//! | `ping`    | `ping_interval` | `Task::Ping`, arms `ponged`            |
//! | `ponged`  | one shot        | `Task::Ponged` `pong_timeout` later    |
//! | `dump`    | `dump_interval` | schedule heap persisted                |
//! | `collect` | `collect_interval` | `Task::Collect`                     |

use crate::bot::Task;
use crate::config::SchedulerConfig;

/// What a due periodic function asks the scheduler to do.
#[derive(Debug, Clone, PartialEq)]
pub enum PeriodicAction {
    Task(Task),
    Dump,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Ping,
    Ponged,
    Dump,
    Collect,
}

#[derive(Debug, Clone)]
struct Periodic {
    name: &'static str,
    kind: Kind,
    /// Seconds between runs; 0 disables.
    period: f64,
    stamp: f64,
    called: u64,
}

impl Periodic {
    fn new(name: &'static str, kind: Kind, period: u64, now: f64) -> Self {
        Self {
            name,
            kind,
            period: period as f64,
            stamp: now,
            called: 0,
        }
    }

    fn is_due(&self, now: f64) -> bool {
        self.period > 0.0 && now >= self.stamp + self.period
    }
}

pub struct Periodics {
    functions: Vec<Periodic>,
    /// When the last ping went out, while its pong check is armed.
    pinged: Option<f64>,
    collect_timeout: u64,
}

impl Periodics {
    /// Periodic functions timed from `now`. `collect_timeout` is the pool
    /// timeout passed along with each collect.
    pub fn new(config: &SchedulerConfig, collect_timeout: u64, now: f64) -> Self {
        let functions = vec![
            Periodic::new("ping", Kind::Ping, config.ping_interval, now),
            Periodic::new("ponged", Kind::Ponged, config.pong_timeout, now),
            Periodic::new("dump", Kind::Dump, config.dump_interval, now),
            Periodic::new("collect", Kind::Collect, config.collect_interval, now),
        ];
        Self {
            functions,
            pinged: None,
            collect_timeout,
        }
    }

    /// Run every due function, returning what each asked for.
    pub fn due(&mut self, now: f64) -> Vec<PeriodicAction> {
        let mut actions = Vec::new();
        let mut ping_sent = false;

        for periodic in &mut self.functions {
            if periodic.kind == Kind::Ponged && self.pinged.is_none() {
                continue;
            }
            if !periodic.is_due(now) {
                continue;
            }
            periodic.called += 1;
            periodic.stamp = now;
            tracing::debug!(periodic = periodic.name, called = periodic.called, "PERIODIC");

            match periodic.kind {
                Kind::Ping => {
                    actions.push(PeriodicAction::Task(Task::Ping));
                    ping_sent = true;
                }
                Kind::Ponged => {
                    if let Some(pinged) = self.pinged.take() {
                        actions.push(PeriodicAction::Task(Task::Ponged { pinged }));
                    }
                }
                Kind::Dump => actions.push(PeriodicAction::Dump),
                Kind::Collect => actions.push(PeriodicAction::Task(Task::Collect {
                    timeout: self.collect_timeout,
                })),
            }
        }

        if ping_sent {
            self.pinged = Some(now);
            if let Some(ponged) = self.functions.iter_mut().find(|p| p.kind == Kind::Ponged) {
                ponged.stamp = now;
            }
        }
        actions
    }

    /// Run counts by function name.
    pub fn counts(&self) -> Vec<(&'static str, u64)> {
        self.functions.iter().map(|p| (p.name, p.called)).collect()
    }
}
