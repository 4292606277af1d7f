//! Periodic cleanup tasks.
//!
//! Both the cache and the rate limiter accumulate dead entries between
//! sweeps. [`CleanupTask`] runs a component's [`Sweep`] on a fixed interval
//! in a tokio task owned by the caller: stop it with
//! [`shutdown()`](CleanupTask::shutdown), or drop it to abort.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// A component with dead entries to purge.
#[async_trait]
pub trait Sweep: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Purge dead entries, returning how many were removed.
    async fn sweep(&self) -> usize;
}

/// Handle to a running periodic sweep.
///
/// # Panics
///
/// [`spawn`](Self::spawn) requires a tokio runtime context.
pub struct CleanupTask {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CleanupTask {
    /// Sweep `target` every `interval`, starting one interval from now.
    pub fn spawn<S: Sweep>(target: Arc<S>, interval: Duration) -> Self {
        let (tx, mut rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut rx => break,
                    _ = ticker.tick() => {
                        let removed = target.sweep().await;
                        debug!(component = target.name(), removed, "periodic sweep");
                    }
                }
            }
        });
        Self {
            shutdown: Some(tx),
            handle: Some(handle),
        }
    }

    /// Stop the task and wait for an in-flight sweep to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    /// Whether the task is still running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for CleanupTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSweep {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl Sweep for CountingSweep {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn sweep(&self) -> usize {
            self.runs.fetch_add(1, Ordering::SeqCst);
            0
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sweeps_on_interval() {
        let target = Arc::new(CountingSweep::default());
        let task = CleanupTask::spawn(target.clone(), Duration::from_secs(600));

        tokio::time::sleep(Duration::from_secs(599)).await;
        assert_eq!(target.runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(1_250)).await;
        assert_eq!(target.runs.load(Ordering::SeqCst), 3);

        task.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_sweeping() {
        let target = Arc::new(CountingSweep::default());
        let task = CleanupTask::spawn(target.clone(), Duration::from_secs(10));
        assert!(task.is_running());
        task.shutdown().await;

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(target.runs.load(Ordering::SeqCst), 0);
    }
}
