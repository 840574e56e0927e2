//! Bounded work queue with a fixed worker pool
//!
//! The shared ingestion primitive of the platform: a bounded FIFO coupled
//! with N workers, parameterized by a per-item async handler.
//!
//! Contract:
//! - [`WorkerQueue::enqueue`] is synchronous and non-blocking: one insert
//!   attempt, and at capacity the item is dropped and counted. The producing
//!   side is typically a hot WebSocket reader loop that must never block on
//!   downstream stalls; drops convert backpressure into observable loss.
//! - Handler errors (and panics) are logged and swallowed; a worker never
//!   dies from a handler fault.
//! - [`WorkerQueue::close`] places one sentinel per worker into the queue,
//!   waits up to the per-queue timeout for workers to drain their tails,
//!   then aborts stragglers. Items enqueued after close begins are rejected.
//! - Every drop feeds a sliding 60-second window; the drop rate decides the
//!   log severity according to the per-queue [`DropPolicy`].

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex as SyncMutex;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Sliding window length for drop-rate tracking
const DROP_WINDOW: Duration = Duration::from_secs(60);

/// Outcome of a non-blocking enqueue attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Enqueue {
    Queued,
    Dropped,
}

impl Enqueue {
    pub fn is_queued(&self) -> bool {
        matches!(self, Enqueue::Queued)
    }
}

/// Per-queue drop-rate log thresholds, in drops per second.
///
/// `warn_per_sec = Some(0.0)` means any drop warns. `panic_per_sec = None`
/// means the queue never escalates to error.
#[derive(Debug, Clone, Copy)]
pub struct DropPolicy {
    pub warn_per_sec: Option<f64>,
    pub panic_per_sec: Option<f64>,
}

impl DropPolicy {
    /// Stream queue: every drop warns, >= 10/s is a panic-grade error
    pub fn stream() -> Self {
        Self {
            warn_per_sec: Some(0.0),
            panic_per_sec: Some(10.0),
        }
    }

    /// DB queue: every drop warns, >= 5/s is a panic-grade error
    pub fn db() -> Self {
        Self {
            warn_per_sec: Some(0.0),
            panic_per_sec: Some(5.0),
        }
    }

    /// Cache queue: drops are acceptable, warn only above 50/s
    pub fn cache() -> Self {
        Self {
            warn_per_sec: Some(50.0),
            panic_per_sec: None,
        }
    }
}

/// Per-item async handler. Errors are logged by the worker and swallowed.
pub type Handler<T> = Arc<dyn Fn(T) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Hook invoked by each worker when it consumes its shutdown sentinel,
/// before exiting. Used by batching consumers to flush partial tails.
pub type DrainHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

enum Message<T> {
    Item(T),
    Sentinel,
}

/// Bounded FIFO + worker pool with sentinel shutdown
pub struct WorkerQueue<T> {
    name: String,
    tx: mpsc::Sender<Message<T>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    closing: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    drop_window: Arc<SyncMutex<VecDeque<Instant>>>,
    policy: DropPolicy,
    close_timeout: Duration,
}

impl<T: Send + 'static> WorkerQueue<T> {
    /// Create the queue and spawn `workers` consumer tasks.
    ///
    /// A worker count of zero is permitted (items queue up and `close`
    /// returns immediately); production queues always run at least one.
    pub fn new(
        name: impl Into<String>,
        capacity: usize,
        workers: usize,
        policy: DropPolicy,
        close_timeout: Duration,
        handler: Handler<T>,
    ) -> Self {
        Self::with_drain(name, capacity, workers, policy, close_timeout, handler, None)
    }

    /// Like [`WorkerQueue::new`] with a drain hook that runs in each worker
    /// when its sentinel arrives.
    pub fn with_drain(
        name: impl Into<String>,
        capacity: usize,
        workers: usize,
        policy: DropPolicy,
        close_timeout: Duration,
        handler: Handler<T>,
        drain: Option<DrainHook>,
    ) -> Self {
        let name = name.into();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let rx = rx.clone();
            let handler = handler.clone();
            let drain = drain.clone();
            let worker_name = format!("{}-worker-{}", name, i);

            handles.push(tokio::spawn(async move {
                loop {
                    let msg = { rx.lock().await.recv().await };
                    match msg {
                        None => break,
                        Some(Message::Sentinel) => {
                            if let Some(drain) = &drain {
                                drain().await;
                            }
                            debug!(worker = %worker_name, "worker drained, exiting");
                            break;
                        }
                        Some(Message::Item(item)) => {
                            match AssertUnwindSafe(handler(item)).catch_unwind().await {
                                Ok(Ok(())) => {}
                                Ok(Err(e)) => {
                                    error!(worker = %worker_name, "handler error: {e:#}");
                                }
                                Err(_) => {
                                    error!(worker = %worker_name, "handler panicked");
                                }
                            }
                        }
                    }
                }
            }));
        }

        Self {
            name,
            tx,
            workers: Mutex::new(handles),
            closing: Arc::new(AtomicBool::new(false)),
            dropped: Arc::new(AtomicU64::new(0)),
            drop_window: Arc::new(SyncMutex::new(VecDeque::new())),
            policy,
            close_timeout,
        }
    }

    /// Attempt to enqueue one item without blocking.
    ///
    /// Returns [`Enqueue::Dropped`] (and advances the drop telemetry) when
    /// the queue is at capacity or closing.
    pub fn enqueue(&self, item: T) -> Enqueue {
        if self.closing.load(Ordering::SeqCst) {
            self.record_drop();
            return Enqueue::Dropped;
        }

        match self.tx.try_send(Message::Item(item)) {
            Ok(()) => Enqueue::Queued,
            Err(_) => {
                self.record_drop();
                Enqueue::Dropped
            }
        }
    }

    fn record_drop(&self) {
        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;

        let rate = {
            let mut window = self.drop_window.lock();
            let now = Instant::now();
            window.push_back(now);
            while let Some(front) = window.front() {
                if now.duration_since(*front) > DROP_WINDOW {
                    window.pop_front();
                } else {
                    break;
                }
            }
            window.len() as f64 / DROP_WINDOW.as_secs_f64()
        };

        match (self.policy.panic_per_sec, self.policy.warn_per_sec) {
            (Some(panic), _) if rate >= panic => {
                error!(
                    queue = %self.name,
                    rate = format!("{rate:.1}/s"),
                    total,
                    "PANIC: drop rate exceeds threshold"
                );
            }
            (_, Some(warn_at)) if rate >= warn_at => {
                warn!(
                    queue = %self.name,
                    rate = format!("{rate:.1}/s"),
                    total,
                    "queue full, dropping"
                );
            }
            _ => {
                debug!(queue = %self.name, total, "queue full, dropping");
            }
        }
    }

    /// Total items dropped since construction
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Number of drop timestamps currently inside the 60-second window
    pub fn drop_window_len(&self) -> usize {
        self.drop_window.lock().len()
    }

    /// Shut the queue down: reject further enqueues, deliver one sentinel
    /// per worker, wait up to the close timeout for each worker to drain its
    /// tail, then abort any straggler.
    pub async fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);

        let mut workers = self.workers.lock().await;
        for _ in 0..workers.len() {
            // Blocking send: sentinels must land even when the queue is full
            if self.tx.send(Message::Sentinel).await.is_err() {
                break;
            }
        }

        for mut handle in workers.drain(..) {
            if tokio::time::timeout(self.close_timeout, &mut handle)
                .await
                .is_err()
            {
                warn!(
                    queue = %self.name,
                    timeout_s = self.close_timeout.as_secs(),
                    "worker did not finish in time, cancelling"
                );
                handle.abort();
            }
        }

        let dropped = self.dropped_count();
        if dropped > 0 {
            warn!(queue = %self.name, dropped, "queue closed with drops");
        }
        debug!(queue = %self.name, "queue closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn counting_handler(counter: Arc<AtomicUsize>) -> Handler<u64> {
        Arc::new(move |_item| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_enqueue_and_process() {
        let counter = Arc::new(AtomicUsize::new(0));
        let queue = WorkerQueue::new(
            "test",
            100,
            2,
            DropPolicy::stream(),
            Duration::from_secs(5),
            counting_handler(counter.clone()),
        );

        for i in 0..10 {
            assert_eq!(queue.enqueue(i), Enqueue::Queued);
        }

        queue.close().await;
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert_eq!(queue.dropped_count(), 0);
    }

    #[tokio::test]
    async fn test_drop_accounting_at_capacity() {
        // No workers: nothing consumes, so capacity is exact
        let counter = Arc::new(AtomicUsize::new(0));
        let queue = WorkerQueue::new(
            "test",
            10,
            0,
            DropPolicy::stream(),
            Duration::from_secs(1),
            counting_handler(counter),
        );

        let mut queued = 0;
        let mut dropped = 0;
        for i in 0..25 {
            match queue.enqueue(i) {
                Enqueue::Queued => queued += 1,
                Enqueue::Dropped => dropped += 1,
            }
        }

        assert_eq!(queued, 10);
        assert_eq!(dropped, 15);
        assert_eq!(queue.dropped_count(), 15);
        assert_eq!(queue.drop_window_len(), 15);
    }

    #[tokio::test]
    async fn test_sentinel_drains_queued_items() {
        let counter = Arc::new(AtomicUsize::new(0));
        let queue = WorkerQueue::new(
            "test",
            100,
            1,
            DropPolicy::db(),
            Duration::from_secs(5),
            counting_handler(counter.clone()),
        );

        for i in 0..50 {
            assert_eq!(queue.enqueue(i), Enqueue::Queued);
        }

        // Items ahead of the sentinel are all processed before exit
        queue.close().await;
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }

    #[tokio::test]
    async fn test_enqueue_after_close_is_dropped() {
        let counter = Arc::new(AtomicUsize::new(0));
        let queue = WorkerQueue::new(
            "test",
            100,
            1,
            DropPolicy::cache(),
            Duration::from_secs(5),
            counting_handler(counter),
        );

        queue.close().await;
        assert_eq!(queue.enqueue(1), Enqueue::Dropped);
        assert_eq!(queue.dropped_count(), 1);
    }

    #[tokio::test]
    async fn test_handler_error_does_not_kill_worker() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = counter.clone();
        let handler: Handler<u64> = Arc::new(move |item| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                if item % 2 == 0 {
                    anyhow::bail!("boom on {item}");
                }
                Ok(())
            }
            .boxed()
        });

        let queue = WorkerQueue::new(
            "test",
            100,
            1,
            DropPolicy::stream(),
            Duration::from_secs(5),
            handler,
        );

        for i in 0..6 {
            assert_eq!(queue.enqueue(i), Enqueue::Queued);
        }
        queue.close().await;

        // All six items reached the handler despite three failures
        assert_eq!(counter.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_drain_hook_runs_per_worker() {
        let drained = Arc::new(AtomicUsize::new(0));
        let hook_count = drained.clone();
        let drain: DrainHook = Arc::new(move || {
            let hook_count = hook_count.clone();
            async move {
                hook_count.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        });

        let counter = Arc::new(AtomicUsize::new(0));
        let queue = WorkerQueue::with_drain(
            "test",
            100,
            3,
            DropPolicy::db(),
            Duration::from_secs(5),
            counting_handler(counter),
            Some(drain),
        );

        queue.close().await;
        assert_eq!(drained.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_close_aborts_stuck_worker() {
        let never = Arc::new(Notify::new());
        let gate = never.clone();
        let handler: Handler<u64> = Arc::new(move |_| {
            let gate = gate.clone();
            async move {
                gate.notified().await;
                Ok(())
            }
            .boxed()
        });

        let queue = WorkerQueue::new(
            "test",
            10,
            1,
            DropPolicy::stream(),
            Duration::from_millis(100),
            handler,
        );

        assert_eq!(queue.enqueue(1), Enqueue::Queued);
        // Worker is stuck in the handler; close must still return
        queue.close().await;
    }
}
