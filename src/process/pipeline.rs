//! The fixed set of pipeline workers and their staged start/stop.
//!
//! ```text
//! start:  receive ─► send ─► messages ─► events ─► schedule
//! stop:   messages ─► events ─► schedule ─► send ─► receive
//! ```
//!
//! Stages stop in data-flow order, so each has stopped forwarding before
//! the next one drains up to its stop sentinel. The sender stops after
//! every stage and before the socket, so replies already queued are still
//! written.

use std::time::Duration;

use tracing::{info, warn};

use super::worker::{Worker, WorkerStatus};
use crate::error::BotError;

pub struct Pipeline {
    socket: Worker,
    send: Worker,
    /// Queue workers in data-flow order, each feeding later ones.
    stages: Vec<Worker>,
    stop_timeout: Duration,
}

impl Pipeline {
    pub fn new(socket: Worker, send: Worker, stages: Vec<Worker>, stop_timeout: Duration) -> Self {
        Self {
            socket,
            send,
            stages,
            stop_timeout,
        }
    }

    fn workers(&self) -> impl Iterator<Item = &Worker> {
        [&self.socket, &self.send].into_iter().chain(self.stages.iter())
    }

    /// Look up a worker by name.
    pub fn get(&self, name: &str) -> Option<&Worker> {
        self.workers().find(|w| w.name() == name)
    }

    /// Start the socket worker, then every queue worker.
    ///
    /// Queue workers are started even if connecting fails; the error is
    /// returned so the caller can schedule a retry.
    pub async fn start(&self) -> Result<(), BotError> {
        let socket = self.socket.start().await;
        if let Err(e) = &socket {
            warn!(error = %e, "Socket worker failed to start");
        }
        self.resume().await;
        socket
    }

    /// Start every queue worker, the sender first.
    pub async fn resume(&self) {
        for worker in std::iter::once(&self.send).chain(self.stages.iter()) {
            if let Err(e) = worker.start().await {
                warn!(worker = worker.name(), error = %e, "Worker failed to start");
            }
        }
    }

    /// Gracefully stop every queue worker: producers before their
    /// consumers, the sender last.
    pub async fn pause(&self) {
        for worker in self.stages.iter().chain(std::iter::once(&self.send)) {
            worker.stop(true, self.stop_timeout).await;
        }
    }

    /// Staged shutdown: queue workers, then the socket.
    pub async fn stop(&self) {
        self.pause().await;
        self.socket.stop(true, self.stop_timeout).await;
        info!("Pipeline stopped");
    }

    /// Stop the named workers, in the order given.
    pub async fn stop_only(&self, names: &[&str]) {
        for name in names {
            if let Some(worker) = self.get(name) {
                worker.stop(true, self.stop_timeout).await;
            }
        }
    }

    /// Start the named workers, in the order given.
    pub async fn start_only(&self, names: &[&str]) -> Result<(), BotError> {
        for name in names {
            if let Some(worker) = self.get(name) {
                worker.start().await?;
            }
        }
        Ok(())
    }

    /// Abort every worker without waiting.
    pub fn terminate(&self) {
        for worker in self.stages.iter().chain([&self.send, &self.socket]) {
            worker.terminate();
        }
    }

    /// Discard everything queued between stages.
    pub fn empty(&self) -> usize {
        self.workers().map(Worker::empty).sum()
    }

    pub fn census(&self) -> Vec<WorkerStatus> {
        self.workers().map(Worker::status).collect()
    }
}
