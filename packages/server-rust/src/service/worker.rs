//! Single-task background workers.
//!
//! A [`BackgroundWorker`] owns one tokio task that feeds queued tasks to a
//! [`BackgroundRunnable`] strictly in submission order and calls its
//! `on_tick` hook on a fixed interval. The event broker runs one worker per
//! queue, which is what gives each queue its FIFO delivery.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Channel capacity used by [`BackgroundWorker::start`].
pub const DEFAULT_WORKER_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// State machine driven by a [`BackgroundWorker`].
///
/// All three hooks run on the worker task, never concurrently with each
/// other, so implementors can keep plain `&mut self` state.
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    type Task: Send + 'static;

    async fn run(&mut self, task: Self::Task);

    /// Periodic housekeeping. Default is a no-op.
    async fn on_tick(&mut self) {}

    /// Last call before the worker task exits. Default is a no-op.
    async fn shutdown(&mut self) {}
}

/// Reason a non-blocking submission was refused.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("worker channel is full")]
    Full,
    #[error("worker is not running")]
    Closed,
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Handle to a running worker task.
pub struct BackgroundWorker<R: BackgroundRunnable> {
    tx: Option<mpsc::Sender<R::Task>>,
    stop_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Spawns the worker with [`DEFAULT_WORKER_CAPACITY`].
    pub fn start(runnable: R, tick_interval_ms: u64) -> Self {
        Self::start_with_capacity(runnable, tick_interval_ms, DEFAULT_WORKER_CAPACITY)
    }

    /// Spawns the worker with a bounded channel of `capacity` tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_with_capacity(runnable: R, tick_interval_ms: u64, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<R::Task>(capacity.max(1));
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let tick = Duration::from_millis(tick_interval_ms.max(1));
        let handle = tokio::spawn(drive(runnable, rx, stop_rx, tick));

        Self {
            tx: Some(tx),
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// Queues a task, waiting for channel capacity.
    ///
    /// # Errors
    ///
    /// Returns an error once the worker has stopped.
    pub async fn submit(&self, task: R::Task) -> anyhow::Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("worker not running"))?;
        tx.send(task)
            .await
            .map_err(|_| anyhow::anyhow!("worker channel closed"))
    }

    /// Queues a task without waiting.
    ///
    /// # Errors
    ///
    /// [`SubmitError::Full`] when the channel has no free slot,
    /// [`SubmitError::Closed`] once the worker has stopped.
    pub fn try_submit(&self, task: R::Task) -> Result<(), SubmitError> {
        let Some(tx) = &self.tx else {
            return Err(SubmitError::Closed);
        };
        tx.try_send(task).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SubmitError::Full,
            mpsc::error::TrySendError::Closed(_) => SubmitError::Closed,
        })
    }

    /// Clone of the task sender, so callers can await a submission without
    /// holding a borrow of the worker.
    #[must_use]
    pub fn sender(&self) -> Option<mpsc::Sender<R::Task>> {
        self.tx.clone()
    }

    /// Signals the worker and waits for its task to exit.
    ///
    /// A task already inside `run` finishes first; tasks still queued are
    /// dropped.
    pub async fn stop(&mut self) {
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(());
        }
        self.tx = None;
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

async fn drive<R: BackgroundRunnable>(
    mut runnable: R,
    mut rx: mpsc::Receiver<R::Task>,
    mut stop_rx: oneshot::Receiver<()>,
    tick: Duration,
) {
    let mut ticker = tokio::time::interval(tick);
    // The first tick of an interval completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            // Stop wins over queued work.
            biased;
            _ = &mut stop_rx => break,
            task = rx.recv() => match task {
                Some(task) => runnable.run(task).await,
                None => break,
            },
            _ = ticker.tick() => runnable.on_tick().await,
        }
    }

    runnable.shutdown().await;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tokio::sync::watch;

    use super::*;

    #[derive(Default, Clone)]
    struct Log {
        entries: Arc<Mutex<Vec<String>>>,
    }

    impl Log {
        fn push(&self, entry: impl Into<String>) {
            self.entries.lock().push(entry.into());
        }

        fn snapshot(&self) -> Vec<String> {
            self.entries.lock().clone()
        }
    }

    struct Recorder(Log);

    #[async_trait]
    impl BackgroundRunnable for Recorder {
        type Task = String;

        async fn run(&mut self, task: String) {
            self.0.push(task);
        }

        async fn on_tick(&mut self) {
            self.0.push("tick");
        }

        async fn shutdown(&mut self) {
            self.0.push("shutdown");
        }
    }

    #[tokio::test]
    async fn runs_tasks_in_submission_order_then_shuts_down() {
        let log = Log::default();
        let mut worker = BackgroundWorker::start(Recorder(log.clone()), 60_000);

        worker.submit("card.events.added".into()).await.unwrap();
        worker.submit("card.events.updated".into()).await.unwrap();
        worker.try_submit("card.events.removed".into()).unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        worker.stop().await;

        assert_eq!(
            log.snapshot(),
            [
                "card.events.added",
                "card.events.updated",
                "card.events.removed",
                "shutdown"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_on_the_configured_interval() {
        let log = Log::default();
        let mut worker = BackgroundWorker::start(Recorder(log.clone()), 20);

        tokio::time::sleep(Duration::from_millis(105)).await;
        worker.stop().await;

        let ticks = log.snapshot().iter().filter(|e| *e == "tick").count();
        assert!(ticks >= 4, "expected at least 4 ticks, saw {ticks}");
    }

    /// Parks every task until the latch opens.
    struct Latched(watch::Receiver<bool>);

    #[async_trait]
    impl BackgroundRunnable for Latched {
        type Task = u32;

        async fn run(&mut self, _task: u32) {
            let _ = self.0.wait_for(|open| *open).await;
        }
    }

    #[tokio::test]
    async fn try_submit_reports_full_channel() {
        let (open, latch) = watch::channel(false);
        let mut worker = BackgroundWorker::start_with_capacity(Latched(latch), 60_000, 1);

        // The first task is taken by the worker and parks; the second fills
        // the single slot.
        worker.try_submit(1).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        worker.try_submit(2).unwrap();
        assert_eq!(worker.try_submit(3), Err(SubmitError::Full));

        open.send_replace(true);
        worker.stop().await;
    }

    #[tokio::test]
    async fn submit_after_stop_is_refused() {
        let mut worker = BackgroundWorker::start(Recorder(Log::default()), 60_000);
        worker.stop().await;

        assert!(worker.submit("late".into()).await.is_err());
        assert_eq!(worker.try_submit("late".into()), Err(SubmitError::Closed));
        assert!(worker.sender().is_none());
    }
}
