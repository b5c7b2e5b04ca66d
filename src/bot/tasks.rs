//! Control tasks and the main task loop's handling of them.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::Bot;

/// How long a restart waits for running handlers before collecting them.
const RESTART_GRACE: Duration = Duration::from_secs(6);

/// Collected invocations are those older than the timeout minus this.
const COLLECT_SLACK: u64 = 10;

/// Where to report the outcome of a control task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyTo {
    pub sender: String,
    pub nick: String,
}

impl ReplyTo {
    /// `text` addressed to the requester, unless the reply goes to them
    /// directly.
    pub fn format(&self, text: &str) -> String {
        if self.sender == self.nick {
            text.to_string()
        } else {
            format!("{}: {}", self.nick, text)
        }
    }
}

/// A unit of work for the main task loop. Also the payload of scheduled
/// entries, so every variant is serializable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "lowercase")]
pub enum Task {
    Msg { recipient: String, text: String },
    Reload { reply_to: Option<ReplyTo> },
    Restart,
    Reconnect,
    Quit { by: Option<String> },
    Processes { reply_to: ReplyTo },
    Pids { reply_to: ReplyTo },
    /// Collect invocations running longer than `timeout` seconds.
    Collect { timeout: u64 },
    Ping,
    /// Restart unless a pong arrived after `pinged`.
    Ponged { pinged: f64 },
    Log { text: String },
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Task::Msg { .. } => "msg",
            Task::Reload { .. } => "reload",
            Task::Restart => "restart",
            Task::Reconnect => "reconnect",
            Task::Quit { .. } => "quit",
            Task::Processes { .. } => "processes",
            Task::Pids { .. } => "pids",
            Task::Collect { .. } => "collect",
            Task::Ping => "ping",
            Task::Ponged { .. } => "ponged",
            Task::Log { .. } => "log",
        }
    }
}

/// Whether the main loop keeps going after a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

impl Bot {
    /// Perform one control task.
    pub async fn perform(&self, task: Task) -> Flow {
        info!(task = task.name(), "TASK");
        match task {
            Task::Msg { recipient, text } => {
                for line in text.lines() {
                    self.send(format!("PRIVMSG {recipient} :{line}")).await;
                }
            }
            Task::Reload { reply_to } => self.reload(reply_to).await,
            Task::Restart => self.restart().await,
            Task::Reconnect => self.reconnect().await,
            Task::Quit { by } => {
                let line = match by {
                    Some(nick) => format!("QUIT :{nick} made me do it"),
                    None => "QUIT".to_string(),
                };
                self.send(line).await;
                self.pipeline.stop().await;
                self.services.pool.abort_all();
                return Flow::Exit;
            }
            Task::Processes { reply_to } => {
                let names = self.services.pool.names();
                let text = format!("{} tasks are running ({})", names.len(), names.join(", "));
                self.report(&reply_to, &text).await;
            }
            Task::Pids { reply_to } => {
                let workers: Vec<String> = self
                    .pipeline
                    .census()
                    .into_iter()
                    .filter(|w| w.active)
                    .map(|w| format!("{}: #{}", w.name, w.generation))
                    .collect();
                self.report(&reply_to, &workers.join(", ")).await;
            }
            Task::Collect { timeout } => {
                let pool = &self.services.pool;
                if pool.collectable(Duration::from_secs(timeout)) > 0 {
                    let older = Duration::from_secs(timeout.saturating_sub(COLLECT_SLACK));
                    let collected = pool.collect(older);
                    info!(collected, "Collected hung handlers");
                }
            }
            Task::Ping => {
                let nick = self.services.options.nick();
                self.send(format!("PING {nick}")).await;
            }
            Task::Ponged { pinged } => {
                let ponged = self.services.data.ponged();
                if ponged < pinged {
                    warn!(pinged, ponged, "No pong since last ping, restarting");
                    self.restart().await;
                }
            }
            Task::Log { text } => info!(text = %text, "Task log"),
        }
        Flow::Continue
    }

    /// Swap in freshly built handlers without touching the connection.
    async fn reload(&self, reply_to: Option<ReplyTo>) {
        let started = Instant::now();
        self.pipeline.stop_only(&["messages", "events"]).await;
        let result = self.services.registry.reload(&self.services);
        if let Err(e) = self.pipeline.start_only(&["messages", "events"]).await {
            warn!(error = %e, "Failed to restart dispatchers");
        }

        let seconds = started.elapsed().as_secs_f64();
        let text = match result {
            Ok(()) => {
                info!(seconds, "Reload completed");
                format!("Completed the reload. Took {seconds:.3} seconds")
            }
            Err(e) => {
                warn!(error = %e, seconds, "Reload failed");
                format!("The reload failed. Took {seconds:.3} seconds")
            }
        };
        if let Some(reply_to) = reply_to {
            self.report(&reply_to, &text).await;
        }
    }

    /// Tear down the whole pipeline and bring it back on a new connection.
    async fn restart(&self) {
        info!("Restarting");
        let lifecycle = &self.services.config.lifecycle;
        self.pipeline.stop().await;
        self.pipeline.empty();

        if !self.services.options.flood() {
            tokio::time::sleep(Duration::from_secs(lifecycle.restart_backoff)).await;
        }
        if !self.services.pool.wait_idle(RESTART_GRACE).await {
            let collected = self.services.pool.collect(Duration::ZERO);
            warn!(collected, "Handlers still running at restart, collected");
        }
        self.pipeline.empty();

        if let Err(e) = self.pipeline.start().await {
            warn!(error = %e, "Restart failed, retrying");
            self.request(Task::Restart).await;
        }
    }

    /// Replace the connection, leaving dispatchers and scheduler running.
    async fn reconnect(&self) {
        info!("Reconnecting");
        let lifecycle = &self.services.config.lifecycle;
        self.pipeline.stop_only(&["send", "receive"]).await;
        if !self.services.options.flood() {
            tokio::time::sleep(Duration::from_secs(lifecycle.reconnect_backoff)).await;
        }
        self.services.queues.send.empty();
        if let Err(e) = self.pipeline.start_only(&["receive", "send"]).await {
            warn!(error = %e, "Reconnect failed, restarting");
            self.request(Task::Restart).await;
        }
    }

    async fn report(&self, reply_to: &ReplyTo, text: &str) {
        let line = format!("PRIVMSG {} :{}", reply_to.sender, reply_to.format(text));
        self.send(line).await;
    }

    async fn send(&self, line: String) {
        if let Err(e) = self.services.queues.send.put(line).await {
            warn!(error = %e, "Failed to queue line");
        }
    }

    async fn request(&self, task: Task) {
        if let Err(e) = self.services.queues.tasks.put(task).await {
            warn!(error = %e, "Failed to queue task");
        }
    }
}
