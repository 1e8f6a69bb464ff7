//! Cancellable one-shot timers.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// A single scheduled callback: sleep, then run.
///
/// Cancellation is explicit and idempotent; cancelling a task that already
/// fired or was already cancelled is a no-op. Dropping the handle also
/// cancels, which keeps "at most one live timer" cheap to enforce: storing
/// a replacement into an `Option<DelayedTask>` aborts the old one.
#[derive(Debug)]
pub struct DelayedTask {
    handle: Option<JoinHandle<()>>,
}

impl DelayedTask {
    /// Arm a timer that runs `callback` after `delay`.
    pub fn schedule<F, Fut>(delay: Duration, callback: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback().await;
        });
        Self {
            handle: Some(handle),
        }
    }

    pub fn cancel(&self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }

    /// Whether the callback ran to completion or the timer was cancelled.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Consume the handle without cancelling, leaving the callback to run.
    /// A callback that must retire its own entry uses this; aborting there
    /// would cancel the callback itself at its next suspension point.
    pub fn detach(mut self) {
        self.handle.take();
    }
}

impl Drop for DelayedTask {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn counter_task(delay: Duration, count: &Arc<AtomicUsize>) -> DelayedTask {
        let count = Arc::clone(count);
        DelayedTask::schedule(delay, move || async move {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_delay() {
        let count = Arc::new(AtomicUsize::new(0));
        let _task = counter_task(Duration::from_secs(5), &count);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_the_callback() {
        let count = Arc::new(AtomicUsize::new(0));
        let task = counter_task(Duration::from_secs(5), &count);

        task.cancel();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent_even_after_firing() {
        let count = Arc::new(AtomicUsize::new(0));
        let task = counter_task(Duration::from_secs(1), &count);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(task.is_finished());

        task.cancel();
        task.cancel();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_cancels() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let _task = counter_task(Duration::from_secs(5), &count);
        }
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn detach_lets_the_callback_run() {
        let count = Arc::new(AtomicUsize::new(0));
        let task = counter_task(Duration::from_secs(5), &count);

        task.detach();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_delay_fires_immediately() {
        let count = Arc::new(AtomicUsize::new(0));
        let _task = counter_task(Duration::ZERO, &count);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
