//! Supervised long-lived workers.
//!
//! A [`Worker`] owns one pipeline stage. Its action is a factory producing a
//! fresh future per start, so the handle persists across restarts while the
//! spawned task is replaced each time.
//!
//! ```text
//! inactive ──start()──► active ──task exits──► inactive
//!                          │
//!                          └──stop() times out──► aborted (terminated)
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, warn};

use super::queue::WorkQueue;
use crate::error::BotError;
use crate::telemetry::spans;

/// Produces the future a worker runs each time it starts.
pub type Action = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Hooks run around a worker's task.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Runs before the task is spawned. An error leaves the worker inactive.
    async fn prepare(&self) -> Result<(), BotError> {
        Ok(())
    }

    /// Asks the running task to wind down on its own. Only called while the
    /// task is active.
    async fn finish(&self);

    /// Discards pending input, returning how much was dropped.
    fn empty(&self) -> usize {
        0
    }
}

/// Lifecycle of a worker consuming a [`WorkQueue`]: finishing enqueues the
/// stop sentinel.
pub struct QueueLifecycle<T> {
    queue: WorkQueue<T>,
}

#[async_trait]
impl<T: Send + 'static> Lifecycle for QueueLifecycle<T> {
    async fn finish(&self) {
        if let Err(e) = self.queue.stop().await {
            warn!(queue = self.queue.name(), error = %e, "Failed to request queue stop");
        }
    }

    fn empty(&self) -> usize {
        self.queue.empty()
    }
}

/// Point-in-time view of a worker.
#[derive(Debug, Clone)]
pub struct WorkerStatus {
    pub name: &'static str,
    pub active: bool,
    pub generation: u64,
    pub uptime: Option<Duration>,
    pub terminated: bool,
}

/// Marks the worker inactive when its task ends, however it ends.
struct ExitGuard {
    name: &'static str,
    generation: u64,
    current: Arc<AtomicU64>,
    inactive: Arc<watch::Sender<bool>>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        // A newer start owns the flag once the generation has moved on.
        if self.current.load(Ordering::Acquire) == self.generation {
            self.inactive.send_replace(true);
        }
        debug!(worker = self.name, generation = self.generation, "Worker exited");
    }
}

pub struct Worker {
    name: &'static str,
    action: Mutex<Option<Action>>,
    lifecycle: Arc<dyn Lifecycle>,
    inactive: Arc<watch::Sender<bool>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    started: Mutex<Option<Instant>>,
    terminated: AtomicBool,
    generation: Arc<AtomicU64>,
}

impl Worker {
    pub fn new(name: &'static str, lifecycle: Arc<dyn Lifecycle>) -> Self {
        let (inactive, _) = watch::channel(true);
        Self {
            name,
            action: Mutex::new(None),
            lifecycle,
            inactive: Arc::new(inactive),
            handle: Mutex::new(None),
            started: Mutex::new(None),
            terminated: AtomicBool::new(false),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Worker consuming `queue`.
    pub fn queue<T: Send + 'static>(name: &'static str, queue: WorkQueue<T>) -> Self {
        Self::new(name, Arc::new(QueueLifecycle { queue }))
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Install the action run by the next start.
    pub fn set_action<F>(&self, action: F)
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        *self.action.lock() = Some(Arc::new(action));
    }

    pub fn is_active(&self) -> bool {
        !*self.inactive.borrow()
    }

    /// Spawn the action unless already running.
    pub async fn start(&self) -> Result<(), BotError> {
        if self.is_active() {
            debug!(worker = self.name, "Worker already active");
            return Ok(());
        }
        let Some(action) = self.action.lock().clone() else {
            warn!(worker = self.name, "Worker has no action, not starting");
            return Ok(());
        };

        self.lifecycle.prepare().await?;

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let guard = ExitGuard {
            name: self.name,
            generation,
            current: Arc::clone(&self.generation),
            inactive: Arc::clone(&self.inactive),
        };
        self.inactive.send_replace(false);
        self.terminated.store(false, Ordering::Release);
        *self.started.lock() = Some(Instant::now());

        let future = action();
        let handle = tokio::spawn(
            async move {
                let _guard = guard;
                future.await;
            }
            .instrument(spans::worker(self.name)),
        );
        *self.handle.lock() = Some(handle);

        info!(worker = self.name, generation, "Worker started");
        Ok(())
    }

    /// Stop the worker, aborting it if it does not exit within `timeout`.
    ///
    /// Returns `false` if the task had to be aborted.
    pub async fn stop(&self, graceful: bool, timeout: Duration) -> bool {
        if !self.is_active() {
            return true;
        }
        if graceful {
            self.lifecycle.finish().await;
        }

        let mut rx = self.inactive.subscribe();
        let exited = tokio::time::timeout(timeout, rx.wait_for(|inactive| *inactive))
            .await
            .is_ok();
        if exited {
            debug!(worker = self.name, "Worker stopped");
            return true;
        }

        warn!(worker = self.name, ?timeout, "Worker did not stop in time, aborting");
        self.terminate();
        false
    }

    /// Abort the task immediately.
    pub fn terminate(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
        if self.is_active() {
            self.terminated.store(true, Ordering::Release);
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.inactive.send_replace(true);
    }

    /// Discard the worker's pending input.
    pub fn empty(&self) -> usize {
        self.lifecycle.empty()
    }

    pub fn status(&self) -> WorkerStatus {
        let active = self.is_active();
        WorkerStatus {
            name: self.name,
            active,
            generation: self.generation.load(Ordering::Acquire),
            uptime: if active {
                self.started.lock().map(|s| s.elapsed())
            } else {
                None
            },
            terminated: self.terminated.load(Ordering::Acquire),
        }
    }
}
