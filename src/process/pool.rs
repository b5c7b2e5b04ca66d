//! Bounded executor pool for handler invocations.
//!
//! Each accepted invocation runs in its own task and is tracked by a
//! [`CommandRecord`]. Admission, completion, and collection all update the
//! record table and the active count under one mutex, and each record is
//! removed exactly once:
//!
//! - the task's exit guard removes it on completion, panic, or abort;
//! - [`ExecutorPool::collect`] removes it before aborting the task, and the
//!   exit guard then finds nothing to do.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::{Instrument, debug, error, info_span, warn};

use crate::error::PoolError;

/// Bookkeeping for one running invocation.
#[derive(Debug)]
pub struct CommandRecord {
    /// Pool ordinal, e.g. `Command 00042`.
    pub name: String,
    /// What is running, e.g. the command or event name.
    pub label: String,
    pub created_at: Instant,
    pub started_at: Option<Instant>,
    abort: Option<AbortHandle>,
}

impl CommandRecord {
    fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at.unwrap_or(self.created_at))
    }
}

#[derive(Default)]
struct PoolState {
    active: usize,
    records: HashMap<u64, CommandRecord>,
}

/// Removes the record and releases the slot when a task ends.
struct ExitGuard {
    id: u64,
    state: Arc<Mutex<PoolState>>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if state.records.remove(&self.id).is_some() {
            state.active -= 1;
        }
    }
}

pub struct ExecutorPool {
    ceiling: usize,
    state: Arc<Mutex<PoolState>>,
    next: AtomicU64,
}

impl ExecutorPool {
    pub fn new(ceiling: usize) -> Self {
        Self {
            ceiling,
            state: Arc::new(Mutex::new(PoolState::default())),
            next: AtomicU64::new(0),
        }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Run `future` in its own task, or reject immediately if the pool is full.
    ///
    /// Returns the record name on success.
    pub fn spawn<F>(&self, label: &str, future: F) -> Result<String, PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.state.lock();
        if state.active >= self.ceiling {
            return Err(PoolError::Full {
                ceiling: self.ceiling,
            });
        }

        let id = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        let name = format!("Command {id:05}");
        state.active += 1;
        state.records.insert(
            id,
            CommandRecord {
                name: name.clone(),
                label: label.to_string(),
                created_at: Instant::now(),
                started_at: None,
                abort: None,
            },
        );

        let guard = ExitGuard {
            id,
            state: Arc::clone(&self.state),
        };
        let started = Arc::clone(&self.state);
        let span = info_span!("executor", name = %name, label = %label);
        let task_label = label.to_string();
        let handle = tokio::spawn(
            async move {
                let _guard = guard;
                if let Some(record) = started.lock().records.get_mut(&id) {
                    record.started_at = Some(Instant::now());
                }
                if let Err(panic) = AssertUnwindSafe(future).catch_unwind().await {
                    error!(label = %task_label, panic = %panic_message(&*panic), "Executor panicked");
                }
            }
            .instrument(span),
        );
        // The task cannot finish before this point: its exit guard needs the
        // lock held here.
        if let Some(record) = state.records.get_mut(&id) {
            record.abort = Some(handle.abort_handle());
        }

        debug!(name = %name, label = %label, active = state.active, "Executor spawned");
        Ok(name)
    }

    /// Number of running invocations.
    pub fn active(&self) -> usize {
        self.state.lock().active
    }

    /// `name (label)` for every running invocation, oldest first.
    pub fn names(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut records: Vec<_> = state.records.iter().collect();
        records.sort_by_key(|(id, _)| **id);
        records
            .into_iter()
            .map(|(_, r)| format!("{} ({})", r.name, r.label))
            .collect()
    }

    /// How many invocations have been running for at least `timeout`.
    pub fn collectable(&self, timeout: Duration) -> usize {
        let now = Instant::now();
        self.state
            .lock()
            .records
            .values()
            .filter(|r| r.age(now) >= timeout)
            .count()
    }

    /// Abort every invocation that has been running for at least `timeout`.
    ///
    /// Returns the number collected.
    pub fn collect(&self, timeout: Duration) -> usize {
        let now = Instant::now();
        let collected: Vec<CommandRecord> = {
            let mut state = self.state.lock();
            let expired: Vec<u64> = state
                .records
                .iter()
                .filter(|(_, r)| r.age(now) >= timeout)
                .map(|(id, _)| *id)
                .collect();
            let removed: Vec<CommandRecord> = expired
                .iter()
                .filter_map(|id| state.records.remove(id))
                .collect();
            state.active -= removed.len();
            removed
        };

        // Abort outside the lock: dropping an aborted task runs its exit guard.
        for record in &collected {
            if let Some(abort) = &record.abort {
                abort.abort();
            }
            warn!(name = %record.name, label = %record.label, "Collected executor");
        }
        collected.len()
    }

    /// Abort everything.
    pub fn abort_all(&self) -> usize {
        self.collect(Duration::ZERO)
    }

    /// Wait up to `timeout` for every invocation to finish.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.active() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn rejects_beyond_ceiling_without_blocking() {
        let pool = ExecutorPool::new(3);
        for _ in 0..3 {
            pool.spawn("hang", std::future::pending()).unwrap();
        }
        assert_eq!(pool.active(), 3);
        assert_eq!(
            pool.spawn("extra", async {}),
            Err(PoolError::Full { ceiling: 3 })
        );
        assert_eq!(pool.active(), 3);
        assert_eq!(pool.abort_all(), 3);
        assert_eq!(pool.active(), 0);
    }

    #[tokio::test]
    async fn completion_releases_slot() {
        let pool = ExecutorPool::new(1);
        let (tx, rx) = oneshot::channel();
        let name = pool
            .spawn("once", async move {
                let _ = tx.send(());
            })
            .unwrap();
        assert_eq!(name, "Command 00001");
        rx.await.unwrap();
        assert!(pool.wait_idle(Duration::from_secs(1)).await);
        assert!(pool.spawn("again", async {}).is_ok());
    }

    #[tokio::test]
    async fn panic_is_contained() {
        let pool = ExecutorPool::new(2);
        pool.spawn("boom", async {
            panic!("handler exploded");
        })
        .unwrap();
        assert!(pool.wait_idle(Duration::from_secs(1)).await);
        assert_eq!(pool.active(), 0);
    }

    #[tokio::test]
    async fn collect_only_takes_expired() {
        let pool = ExecutorPool::new(4);
        pool.spawn("old", std::future::pending()).unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        pool.spawn("new", std::future::pending()).unwrap();
        tokio::task::yield_now().await;

        assert_eq!(pool.collectable(Duration::from_millis(100)), 1);
        assert_eq!(pool.collect(Duration::from_millis(100)), 1);
        assert_eq!(pool.active(), 1);
        assert_eq!(pool.names().len(), 1);
        assert!(pool.names()[0].ends_with("(new)"));
        assert_eq!(pool.abort_all(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn collector_racing_completion_decrements_once() {
        let pool = Arc::new(ExecutorPool::new(64));
        for _ in 0..50 {
            let pool = Arc::clone(&pool);
            for _ in 0..8 {
                pool.spawn("race", async {
                    tokio::task::yield_now().await;
                })
                .unwrap();
            }
            pool.collect(Duration::ZERO);
        }
        assert!(pool.wait_idle(Duration::from_secs(2)).await);
        assert_eq!(pool.active(), 0);
        assert!(pool.names().is_empty());
    }
}
