//! Scheduler worker.
//!
//! Each tick:
//!
//! 1. drain schedule requests for at most two thirds of the tick, pushing
//!    past-due requests straight to the task queue and the rest onto the
//!    heap;
//! 2. fire every due heap entry in `(due, seq)` order;
//! 3. run the periodic functions;
//! 4. sleep out the remainder of the tick.
//!
//! Firing only ever enqueues onto the task queue. The heap is loaded on
//! start and dumped on stop and by the `dump` periodic.

mod heap;
mod periodic;

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

pub use heap::{STORE_KEY, ScheduleHeap, ScheduleRequest, ScheduledTask};
pub use periodic::{PeriodicAction, Periodics};

use crate::bot::{Services, Task};
use crate::config::SchedulerConfig;
use crate::process::Received;

/// Current unix time in seconds.
pub fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Run the scheduler until its queue receives the stop sentinel.
pub async fn run(services: Services, config: SchedulerConfig) {
    let db = services.db.clone();
    let tasks = services.queues.tasks.clone();
    let tick = config.tick();
    let drain_budget = tick.mul_f64(2.0 / 3.0);

    let mut heap = match ScheduleHeap::load(&db) {
        Ok(heap) => heap,
        Err(e) => {
            warn!(error = %e, "Failed to load schedule, starting empty");
            ScheduleHeap::new()
        }
    };
    let mut periodics = Periodics::new(&config, services.config.pool.timeout, unix_now());
    let mut consumer = services.queues.schedule.consumer().await;
    info!(pending = heap.len(), "Scheduler started");

    loop {
        let started = Instant::now();

        // Receive new requests for a bounded part of the tick.
        loop {
            let remaining = drain_budget.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                break;
            }
            match consumer.next_timeout(remaining).await {
                Received::Item(request) => {
                    if request.due <= unix_now() {
                        fire(&tasks, request.task).await;
                    } else {
                        heap.push(request);
                    }
                }
                Received::Stop => {
                    dump(&mut heap, &db);
                    info!(pending = heap.len(), "Scheduler stopped");
                    return;
                }
                Received::Idle => break,
            }
        }

        for entry in heap.pop_due(unix_now()) {
            debug!(due = entry.due, seq = entry.seq, "Firing scheduled task");
            fire(&tasks, entry.task).await;
        }

        for action in periodics.due(unix_now()) {
            match action {
                PeriodicAction::Task(task) => fire(&tasks, task).await,
                PeriodicAction::Dump => dump(&mut heap, &db),
            }
        }

        let remaining = tick.saturating_sub(started.elapsed());
        if remaining > Duration::ZERO {
            tokio::time::sleep(remaining).await;
        }
    }
}

async fn fire(tasks: &crate::process::WorkQueue<Task>, task: Task) {
    if let Err(e) = tasks.put(task).await {
        warn!(error = %e, "Failed to fire task");
    }
}

fn dump(heap: &mut ScheduleHeap, db: &crate::db::Database) {
    if let Err(e) = heap.dump(db) {
        warn!(error = %e, "Failed to persist schedule");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::TempDir;

    fn services(dir: &TempDir) -> Services {
        let mut config = Config::default();
        config.database.path = dir.path().join("sched.db").display().to_string();
        config.scheduler.tick_ms = 30;
        Services::new(&config).unwrap()
    }

    #[tokio::test]
    async fn fires_due_requests_and_persists_the_rest() {
        let dir = TempDir::new().unwrap();
        let services = services(&dir);
        let config = services.config.scheduler.clone();
        let handle = tokio::spawn(run(services.clone(), config));

        let schedule = &services.queues.schedule;
        schedule
            .put(ScheduleRequest {
                due: 0.0,
                task: Task::Log { text: "now".into() },
            })
            .await
            .unwrap();
        schedule
            .put(ScheduleRequest {
                due: unix_now() + 0.1,
                task: Task::Log { text: "soon".into() },
            })
            .await
            .unwrap();
        schedule
            .put(ScheduleRequest {
                due: unix_now() + 3600.0,
                task: Task::Log { text: "later".into() },
            })
            .await
            .unwrap();

        let mut tasks = services.queues.tasks.consumer().await;
        let first = tokio::time::timeout(Duration::from_secs(2), tasks.next()).await;
        assert_eq!(first.unwrap(), Some(Task::Log { text: "now".into() }));
        let second = tokio::time::timeout(Duration::from_secs(2), tasks.next()).await;
        assert_eq!(second.unwrap(), Some(Task::Log { text: "soon".into() }));

        schedule.stop().await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        let pending = ScheduleHeap::load(&services.db).unwrap().snapshot();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].task, Task::Log { text: "later".into() });
    }

    #[test]
    fn unix_now_is_recent() {
        assert!(unix_now() > 1_600_000_000.0);
    }
}
