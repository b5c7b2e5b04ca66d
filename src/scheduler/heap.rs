//! Time-ordered heap of scheduled tasks, persisted under `schedule`.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bot::Task;
use crate::db::{Database, StorageError};

/// Database key holding the pending schedule.
pub const STORE_KEY: &str = "schedule";

/// A request to run `task` at unix time `due`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub due: f64,
    pub task: Task,
}

/// A heap entry. Earlier `due` first; equal times fire in submission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub due: f64,
    pub seq: u64,
    pub task: Task,
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    // Reversed: BinaryHeap is a max-heap.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .total_cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Default)]
pub struct ScheduleHeap {
    heap: BinaryHeap<ScheduledTask>,
    next_seq: u64,
    dirty: bool,
}

impl ScheduleHeap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore the heap persisted by a previous run. Unreadable entries are
    /// skipped.
    pub fn load(db: &Database) -> Result<Self, StorageError> {
        let mut heap = Self::new();
        let Some(stored) = db.load(STORE_KEY)? else {
            return Ok(heap);
        };
        let entries = match stored {
            serde_json::Value::Array(entries) => entries,
            other => {
                warn!(value = %other, "Ignoring malformed schedule");
                return Ok(heap);
            }
        };
        for entry in entries {
            match serde_json::from_value::<ScheduleRequest>(entry) {
                Ok(request) => heap.push(request),
                Err(e) => warn!(error = %e, "Skipping unreadable scheduled task"),
            }
        }
        heap.dirty = false;
        debug!(pending = heap.len(), "Schedule loaded");
        Ok(heap)
    }

    pub fn push(&mut self, request: ScheduleRequest) {
        self.next_seq += 1;
        self.heap.push(ScheduledTask {
            due: request.due,
            seq: self.next_seq,
            task: request.task,
        });
        self.dirty = true;
    }

    /// Remove and return every entry due at or before `now`, in order.
    pub fn pop_due(&mut self, now: f64) -> Vec<ScheduledTask> {
        let mut due = Vec::new();
        while self.heap.peek().is_some_and(|top| top.due <= now) {
            if let Some(entry) = self.heap.pop() {
                due.push(entry);
            }
        }
        if !due.is_empty() {
            self.dirty = true;
        }
        due
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Pending entries as requests, in firing order.
    pub fn snapshot(&self) -> Vec<ScheduleRequest> {
        let mut entries: Vec<&ScheduledTask> = self.heap.iter().collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries
            .into_iter()
            .map(|e| ScheduleRequest {
                due: e.due,
                task: e.task.clone(),
            })
            .collect()
    }

    /// Persist the heap if it changed since the last dump.
    pub fn dump(&mut self, db: &Database) -> Result<bool, StorageError> {
        if !self.dirty {
            return Ok(false);
        }
        let value = serde_json::to_value(self.snapshot())?;
        db.dump(STORE_KEY, &value)?;
        self.dirty = false;
        debug!(pending = self.len(), "Schedule dumped");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn log(text: &str) -> Task {
        Task::Log {
            text: text.to_string(),
        }
    }

    fn request(due: f64, text: &str) -> ScheduleRequest {
        ScheduleRequest {
            due,
            task: log(text),
        }
    }

    #[test]
    fn pops_in_due_order_with_fifo_ties() {
        let mut heap = ScheduleHeap::new();
        heap.push(request(30.0, "c"));
        heap.push(request(10.0, "a"));
        heap.push(request(20.0, "b1"));
        heap.push(request(20.0, "b2"));

        let fired: Vec<Task> = heap.pop_due(25.0).into_iter().map(|e| e.task).collect();
        assert_eq!(fired, vec![log("a"), log("b1"), log("b2")]);
        assert_eq!(heap.len(), 1);
        assert!(heap.pop_due(29.9).is_empty());
    }

    #[test]
    fn dump_and_load_preserve_pending() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("s.db")).unwrap();

        let mut heap = ScheduleHeap::new();
        heap.push(request(2.0, "later"));
        heap.push(request(1.0, "sooner"));
        assert!(heap.dump(&db).unwrap());
        assert!(!heap.dump(&db).unwrap());

        let restored = ScheduleHeap::load(&db).unwrap();
        assert_eq!(
            restored.snapshot(),
            vec![request(1.0, "sooner"), request(2.0, "later")]
        );
    }

    proptest! {
        #[test]
        fn popped_due_times_never_decrease(dues in proptest::collection::vec(0u32..1000, 1..64)) {
            let mut heap = ScheduleHeap::new();
            for (i, due) in dues.iter().enumerate() {
                heap.push(request(f64::from(*due), &i.to_string()));
            }
            let popped = heap.pop_due(f64::MAX);
            prop_assert_eq!(popped.len(), dues.len());
            for pair in popped.windows(2) {
                prop_assert!(pair[0].due < pair[1].due
                    || (pair[0].due == pair[1].due && pair[0].seq < pair[1].seq));
            }
        }
    }
}
