//! Bounded work queues connecting pipeline workers.
//!
//! A queue carries [`Envelope::Item`]s and is shut down by a
//! [`Envelope::Stop`] sentinel, so a consumer drains everything enqueued
//! before the stop request and then exits.
//!
//! Stop sentinels are stamped with the queue's consumer epoch, which advances
//! each time a consumer is released. A consumer that is aborted before
//! reading its sentinel leaves a stale one behind; the next consumer skips it
//! instead of exiting immediately.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};
use tracing::{debug, warn};

use crate::error::QueueError;

/// How long a stop request waits for room in a full queue.
const STOP_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// A queued payload or shutdown request.
#[derive(Debug)]
pub enum Envelope<T> {
    Item(T),
    Stop(u64),
}

/// Outcome of a bounded receive.
#[derive(Debug, PartialEq)]
pub enum Received<T> {
    Item(T),
    Stop,
    Idle,
}

/// Multi-producer, single-consumer bounded queue.
pub struct WorkQueue<T> {
    name: &'static str,
    tx: mpsc::Sender<Envelope<T>>,
    rx: Arc<Mutex<mpsc::Receiver<Envelope<T>>>>,
    epoch: Arc<AtomicU64>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
            rx: Arc::clone(&self.rx),
            epoch: Arc::clone(&self.epoch),
        }
    }
}

impl<T: Send + 'static> WorkQueue<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            name,
            tx,
            rx: Arc::new(Mutex::new(rx)),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Enqueue an item, waiting for room.
    pub async fn put(&self, item: T) -> Result<(), QueueError> {
        self.tx
            .send(Envelope::Item(item))
            .await
            .map_err(|_| QueueError::Closed(self.name))
    }

    /// Enqueue an item without waiting.
    pub fn try_put(&self, item: T) -> Result<(), QueueError> {
        self.tx.try_send(Envelope::Item(item)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full(self.name),
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed(self.name),
        })
    }

    /// Ask the current consumer to exit once it has drained earlier items.
    pub async fn stop(&self) -> Result<(), QueueError> {
        let epoch = self.epoch.load(Ordering::Acquire);
        match tokio::time::timeout(STOP_SEND_TIMEOUT, self.tx.send(Envelope::Stop(epoch))).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(QueueError::Closed(self.name)),
            Err(_) => {
                warn!(queue = self.name, "Queue full, stop request not delivered");
                Err(QueueError::Full(self.name))
            }
        }
    }

    /// Discard everything queued, returning how many entries were dropped.
    ///
    /// Does nothing while a consumer holds the queue.
    pub fn empty(&self) -> usize {
        let Ok(mut rx) = self.rx.try_lock() else {
            debug!(queue = self.name, "Queue has a live consumer, not emptying");
            return 0;
        };
        let mut dropped = 0;
        while rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(queue = self.name, dropped, "Queue emptied");
        }
        dropped
    }

    /// Number of entries waiting.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Become the queue's consumer, waiting for any previous one to exit.
    pub async fn consumer(&self) -> Consumer<T> {
        let rx = Arc::clone(&self.rx).lock_owned().await;
        Consumer {
            name: self.name,
            rx,
            epoch: self.epoch.load(Ordering::Acquire),
            current: Arc::clone(&self.epoch),
        }
    }
}

/// Exclusive receiving side of a [`WorkQueue`].
pub struct Consumer<T> {
    name: &'static str,
    rx: OwnedMutexGuard<mpsc::Receiver<Envelope<T>>>,
    epoch: u64,
    current: Arc<AtomicU64>,
}

impl<T> Drop for Consumer<T> {
    fn drop(&mut self) {
        // Runs before the receiver lock is released.
        self.current.fetch_add(1, Ordering::AcqRel);
    }
}

impl<T> Consumer<T> {
    /// Next item, or `None` once this consumer's stop sentinel arrives.
    pub async fn next(&mut self) -> Option<T> {
        loop {
            match self.rx.recv().await {
                Some(Envelope::Item(item)) => return Some(item),
                Some(Envelope::Stop(epoch)) if epoch >= self.epoch => return None,
                Some(Envelope::Stop(_)) => {
                    debug!(queue = self.name, "Skipping stale stop request");
                }
                None => return None,
            }
        }
    }

    /// Like [`Consumer::next`], but gives up after `wait`.
    pub async fn next_timeout(&mut self, wait: Duration) -> Received<T> {
        match tokio::time::timeout(wait, self.next()).await {
            Ok(Some(item)) => Received::Item(item),
            Ok(None) => Received::Stop,
            Err(_) => Received::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drains_items_before_stop() {
        let queue = WorkQueue::new("test", 8);
        queue.put(1).await.unwrap();
        queue.put(2).await.unwrap();
        queue.stop().await.unwrap();
        queue.put(3).await.unwrap();

        let mut consumer = queue.consumer().await;
        assert_eq!(consumer.next().await, Some(1));
        assert_eq!(consumer.next().await, Some(2));
        assert_eq!(consumer.next().await, None);
    }

    #[tokio::test]
    async fn stale_stop_is_skipped_by_next_consumer() {
        let queue = WorkQueue::new("test", 8);
        {
            let _first = queue.consumer().await;
            queue.stop().await.unwrap();
            // dropped without reading the sentinel
        }
        queue.put(7).await.unwrap();

        let mut second = queue.consumer().await;
        assert_eq!(second.next().await, Some(7));
        queue.stop().await.unwrap();
        assert_eq!(second.next().await, None);
    }

    #[tokio::test]
    async fn try_put_reports_full() {
        let queue = WorkQueue::new("tiny", 1);
        queue.try_put("a").unwrap();
        assert_eq!(queue.try_put("b"), Err(QueueError::Full("tiny")));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn empty_skips_live_consumer() {
        let queue = WorkQueue::new("test", 8);
        queue.put(1).await.unwrap();
        queue.put(2).await.unwrap();

        let consumer = queue.consumer().await;
        assert_eq!(queue.empty(), 0);
        drop(consumer);

        assert_eq!(queue.empty(), 2);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn next_timeout_goes_idle() {
        let queue: WorkQueue<u8> = WorkQueue::new("test", 8);
        let mut consumer = queue.consumer().await;
        assert_eq!(
            consumer.next_timeout(Duration::from_millis(20)).await,
            Received::Idle
        );
        queue.put(9).await.unwrap();
        assert_eq!(
            consumer.next_timeout(Duration::from_millis(20)).await,
            Received::Item(9)
        );
    }
}
