//! Background worker for resumption and periodic sweeps.
//!
//! Provides a generic `BackgroundWorker<R>` that processes tasks from an
//! unbounded mpsc channel via a `BackgroundRunnable` implementation, with
//! periodic tick callbacks. The channel is unbounded so that synchronous
//! callers (resume hooks fired from arbitrary threads) can submit without
//! awaiting.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Trait for task handlers executed by `BackgroundWorker`.
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    /// The type of task this runnable processes.
    type Task: Send + 'static;

    /// Process a single task.
    async fn run(&mut self, task: Self::Task);

    /// Called periodically (on each tick interval). Default is a no-op.
    async fn on_tick(&mut self) {}

    /// Called once when the worker is shutting down. Default is a no-op.
    async fn shutdown(&mut self) {}
}

/// Cloneable, synchronous submission handle.
pub type TaskSender<T> = mpsc::UnboundedSender<T>;

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Generic background worker that processes tasks via an mpsc channel.
///
/// The worker spawns a tokio task that:
/// 1. Listens for tasks on the channel and calls `run()` for each
/// 2. Calls `on_tick()` at the configured interval
/// 3. Calls `shutdown()` once when stopped
pub struct BackgroundWorker<R: BackgroundRunnable> {
    tx: Option<TaskSender<R::Task>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Start the worker with the given runnable and tick interval.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(runnable: R, tick_interval_ms: u64) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<R::Task>();
        Self::start_on(runnable, tx, rx, tick_interval_ms)
    }

    /// Start the worker on a channel created by the caller, so handles to it
    /// can be given out (to the runnable itself, for instance) before the
    /// worker exists.
    pub fn start_on(
        mut runnable: R,
        tx: TaskSender<R::Task>,
        mut rx: mpsc::UnboundedReceiver<R::Task>,
        tick_interval_ms: u64,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut tick_interval =
                tokio::time::interval(std::time::Duration::from_millis(tick_interval_ms.max(1)));
            // Skip the first immediate tick so on_tick doesn't fire at startup.
            tick_interval.tick().await;

            loop {
                tokio::select! {
                    task = rx.recv() => {
                        match task {
                            Some(t) => runnable.run(t).await,
                            None => break,
                        }
                    }
                    _ = tick_interval.tick() => {
                        runnable.on_tick().await;
                    }
                    _ = &mut shutdown_rx => {
                        break;
                    }
                }
            }

            runnable.shutdown().await;
        });

        Self {
            tx: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Submit a task to the worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has been stopped.
    pub fn submit(&self, task: R::Task) -> anyhow::Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(task)
                .map_err(|_| anyhow::anyhow!("worker channel closed")),
            None => Err(anyhow::anyhow!("worker not running")),
        }
    }

    /// A cloneable submission handle, or `None` once stopped.
    #[must_use]
    pub fn sender(&self) -> Option<TaskSender<R::Task>> {
        self.tx.clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Stop the worker gracefully, waiting for the worker task to complete.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    #[derive(Default, Clone)]
    struct Counters {
        runs: Arc<AtomicU32>,
        ticks: Arc<AtomicU32>,
        shutdowns: Arc<AtomicU32>,
    }

    struct CountingRunnable {
        counters: Counters,
        requeue: Option<TaskSender<u32>>,
    }

    #[async_trait]
    impl BackgroundRunnable for CountingRunnable {
        type Task = u32;

        async fn run(&mut self, remaining: u32) {
            self.counters.runs.fetch_add(1, Ordering::SeqCst);
            if let (Some(tx), true) = (&self.requeue, remaining > 0) {
                let _ = tx.send(remaining - 1);
            }
        }

        async fn on_tick(&mut self) {
            self.counters.ticks.fetch_add(1, Ordering::SeqCst);
        }

        async fn shutdown(&mut self) {
            self.counters.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn start_submit_and_stop() {
        let counters = Counters::default();
        let mut worker = BackgroundWorker::start(
            CountingRunnable {
                counters: counters.clone(),
                requeue: None,
            },
            60_000,
        );

        worker.submit(0).unwrap();
        worker.submit(0).unwrap();
        worker.submit(0).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(counters.runs.load(Ordering::SeqCst), 3);
        worker.stop().await;
        assert_eq!(counters.shutdowns.load(Ordering::SeqCst), 1);
        assert!(!worker.is_running());
    }

    #[tokio::test]
    async fn runnable_can_requeue_through_its_sender() {
        let counters = Counters::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut worker = BackgroundWorker::start_on(
            CountingRunnable {
                counters: counters.clone(),
                requeue: Some(tx.clone()),
            },
            tx,
            rx,
            60_000,
        );

        worker.submit(4).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(counters.runs.load(Ordering::SeqCst), 5);
        worker.stop().await;
    }

    #[tokio::test]
    async fn tick_fires_periodically() {
        let counters = Counters::default();
        let mut worker = BackgroundWorker::start(
            CountingRunnable {
                counters: counters.clone(),
                requeue: None,
            },
            20,
        );

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        worker.stop().await;

        assert!(counters.ticks.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn submit_after_stop_returns_error() {
        let mut worker = BackgroundWorker::start(
            CountingRunnable {
                counters: Counters::default(),
                requeue: None,
            },
            60_000,
        );
        worker.stop().await;

        assert!(worker.submit(1).is_err());
        assert!(worker.sender().is_none());
    }
}
