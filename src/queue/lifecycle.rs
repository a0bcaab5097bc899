//! Idle waiting and graceful shutdown.

use std::sync::atomic::Ordering;
use std::time::Duration;

use super::TaskQueue;
use crate::error::Result;
use crate::types::Event;

impl TaskQueue {
    /// Wait until no task is queued or running
    pub async fn wait_idle(&self) {
        self.wait_until(|queue| {
            let stats = queue.stats();
            stats.pending == 0 && stats.running == 0
        })
        .await;
    }

    /// Gracefully shut down the queue
    ///
    /// 1. Stops accepting submissions
    /// 2. Cancels every queued and running task
    /// 3. Waits up to `timeout` for running tasks to deliver their outcome
    /// 4. Emits [`Event::Shutdown`]
    ///
    /// Calling it again is harmless.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        tracing::info!("Initiating queue shutdown");

        self.inner.accepting_new.store(false, Ordering::SeqCst);
        tracing::info!("Stopped accepting new tasks");

        let cancelled = self.cancel_all();
        tracing::info!(cancelled, "Cancelled outstanding tasks");

        let drained = tokio::time::timeout(
            timeout,
            self.wait_until(|queue| queue.stats().running == 0),
        )
        .await;

        match drained {
            Ok(()) => tracing::info!("All running tasks terminated"),
            Err(_) => tracing::warn!(
                running = self.stats().running,
                "Timeout waiting for running tasks, proceeding with shutdown"
            ),
        }

        self.emit(Event::Shutdown);
        tracing::info!("Queue shutdown complete");
        Ok(())
    }

    async fn wait_until<F>(&self, mut done: F)
    where
        F: FnMut(&TaskQueue) -> bool,
    {
        loop {
            // registered before the check so a release in between is not missed
            let released = self.inner.slot_released.notified();
            if done(self) {
                return;
            }
            tracing::trace!(stats = ?self.stats(), "Waiting for running tasks");
            released.await;
        }
    }
}
