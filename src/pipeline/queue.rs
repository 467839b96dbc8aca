use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use kanal::{AsyncReceiver, AsyncSender};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counters shared by every handle of one queue.
#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicUsize,
    completed: AtomicUsize,
}

/// Bounded FIFO of item URLs shared by one producer and many workers.
///
/// Capacity bounds the number of items *in flight*: enqueued and not yet
/// completed, whether still queued or already held by a worker. Each item
/// carries its slot with it, and the slot is returned when the [`Job`] is
/// completed or dropped.
#[derive(Clone)]
pub struct WorkQueue {
    capacity: usize,
    slots: Arc<Semaphore>,
    tx: AsyncSender<(String, OwnedSemaphorePermit)>,
    rx: AsyncReceiver<(String, OwnedSemaphorePermit)>,
    counters: Arc<Counters>,
}

/// One dequeued item. Dropping it marks the item done.
#[derive(Debug)]
pub struct Job {
    pub url: String,
    _slot: OwnedSemaphorePermit,
    counters: Arc<Counters>,
}

impl Job {
    /// Marks the item as done, freeing its slot for the producer.
    pub fn complete(self) {}
}

impl Drop for Job {
    fn drop(&mut self) {
        self.counters.completed.fetch_add(1, Ordering::Release);
    }
}

/// Returned by [`WorkQueue::enqueue`] when the queue has been closed.
#[derive(Debug, thiserror::Error)]
#[error("Work queue closed")]
pub struct QueueClosed;

impl WorkQueue {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "work queue capacity must be positive");
        let (tx, rx) = kanal::bounded_async(capacity);
        Self {
            capacity,
            slots: Arc::new(Semaphore::new(capacity)),
            tx,
            rx,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends `url`, suspending while `capacity` items are in flight.
    pub async fn enqueue(&self, url: String) -> Result<(), QueueClosed> {
        let slot = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| QueueClosed)?;
        self.tx.send((url, slot)).await.map_err(|_| QueueClosed)?;
        self.counters.enqueued.fetch_add(1, Ordering::Release);
        Ok(())
    }

    /// Takes the oldest item, suspending while the queue is empty.
    ///
    /// Returns `None` once the queue is closed.
    pub async fn dequeue(&self) -> Option<Job> {
        let (url, slot) = self.rx.recv().await.ok()?;
        Some(Job {
            url,
            _slot: slot,
            counters: Arc::clone(&self.counters),
        })
    }

    /// Resolves once every enqueued item has been completed.
    pub async fn wait_drained(&self) {
        let capacity = u32::try_from(self.capacity).unwrap_or(u32::MAX);
        // Holding every slot at once means nothing is in flight.
        if let Ok(all) = self.slots.acquire_many(capacity).await {
            drop(all);
        }
    }

    /// Stops accepting items and wakes every blocked producer and worker.
    ///
    /// Items still queued never reach a worker and are not counted as
    /// completed.
    pub fn close(&self) {
        self.slots.close();
        let _ = self.rx.close();
    }

    /// Items enqueued and not yet completed.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }

    pub fn enqueued(&self) -> usize {
        self.counters.enqueued.load(Ordering::Acquire)
    }

    pub fn completed(&self) -> usize {
        self.counters.completed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = WorkQueue::new(3);
        for url in ["a", "b", "c"] {
            queue.enqueue(url.to_string()).await.unwrap();
        }
        let mut seen = Vec::new();
        for _ in 0..3 {
            let job = queue.dequeue().await.unwrap();
            seen.push(job.url.clone());
            job.complete();
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
        assert_eq!(queue.enqueued(), 3);
        assert_eq!(queue.completed(), 3);
    }

    #[tokio::test]
    async fn test_enqueue_blocks_while_capacity_in_flight() {
        let queue = WorkQueue::new(2);
        queue.enqueue("a".into()).await.unwrap();
        queue.enqueue("b".into()).await.unwrap();

        // Dequeued but not completed still counts against capacity.
        let job = queue.dequeue().await.unwrap();
        let blocked = timeout(Duration::from_millis(50), queue.enqueue("c".into())).await;
        assert!(blocked.is_err(), "enqueue should block with 2 items in flight");
        assert_eq!(queue.in_flight(), 2);

        job.complete();
        timeout(Duration::from_millis(500), queue.enqueue("c".into()))
            .await
            .expect("enqueue should proceed after completion")
            .unwrap();
    }

    #[tokio::test]
    async fn test_dequeue_blocks_while_empty() {
        let queue = WorkQueue::new(1);
        let waiting = timeout(Duration::from_millis(50), queue.dequeue()).await;
        assert!(waiting.is_err());
    }

    #[tokio::test]
    async fn test_wait_drained_requires_completion() {
        let queue = WorkQueue::new(2);
        queue.enqueue("a".into()).await.unwrap();

        let job = queue.dequeue().await.unwrap();
        let early = timeout(Duration::from_millis(50), queue.wait_drained()).await;
        assert!(early.is_err(), "drain must wait for the held job");

        drop(job);
        timeout(Duration::from_millis(500), queue.wait_drained())
            .await
            .expect("drain should resolve once all jobs completed");
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_close_wakes_consumers_and_producers() {
        let queue = WorkQueue::new(1);
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await.map(|j| j.url.clone()) })
        };
        tokio::task::yield_now().await;
        queue.close();
        assert_eq!(consumer.await.unwrap(), None);
        assert!(queue.enqueue("late".into()).await.is_err());
    }

    #[tokio::test]
    async fn test_close_discards_queued_items_without_completing_them() {
        let queue = WorkQueue::new(2);
        queue.enqueue("a".into()).await.unwrap();
        queue.enqueue("b".into()).await.unwrap();
        queue.close();

        assert!(queue.dequeue().await.is_none());
        assert_eq!(queue.enqueued(), 2);
        assert_eq!(queue.completed(), 0);
    }

    #[tokio::test]
    async fn test_producer_never_exceeds_completed_plus_capacity() {
        let capacity = 3;
        let queue = WorkQueue::new(capacity);

        let worker = {
            let queue = queue.clone();
            tokio::spawn(async move {
                while let Some(job) = queue.dequeue().await {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    assert!(queue.enqueued() <= queue.completed() + queue.capacity());
                    job.complete();
                }
            })
        };

        for i in 0..30 {
            queue.enqueue(format!("u{}", i)).await.unwrap();
            assert!(queue.enqueued() <= queue.completed() + capacity);
            assert!(queue.in_flight() <= capacity);
        }
        queue.wait_drained().await;
        assert_eq!(queue.completed(), 30);

        queue.close();
        worker.await.unwrap();
    }
}
