//! Propagator trait and the inert strategy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::error;

use dynlog_scheduler::Scheduler;

use crate::error::PropagateError;

/// Fans "the window set changed" out to every scheduler that must react.
///
/// Strategies differ in reach: in-process, polling, or a message bus. All
/// of them must eventually drive [`Scheduler::reload`] on every node
/// whenever any node mutates the window set. Reloads are idempotent and
/// hash-deduplicated, so duplicate notifications are harmless.
#[async_trait]
pub trait Propagator: Send + Sync {
    /// Called once at composition time; spawns whatever background
    /// listeners the strategy needs.
    async fn setup(&self) -> Result<(), PropagateError>;

    /// Stop background listeners. Idempotent.
    async fn teardown(&self);

    /// Called after a local mutation of the window set.
    async fn propagate(&self) -> Result<(), PropagateError>;

    /// Strategy tag for logs.
    fn name(&self) -> &str;
}

/// Reload the scheduler, logging instead of propagating failures: a failed
/// reload keeps the previous state in effect and the next notification
/// retries from scratch.
pub(crate) async fn reload_scheduler(scheduler: &Arc<Scheduler>, debounce: Option<Duration>) {
    match debounce {
        Some(delay) => scheduler.reload_after(delay).await,
        None => {
            if let Err(err) = scheduler.reload().await {
                error!(error = %err, "propagated reload failed");
            }
        }
    }
}

/// Strategy that propagates nothing. For single-node setups that drive
/// [`Scheduler::reload`] by hand, and for tests.
pub struct NullPropagator;

#[async_trait]
impl Propagator for NullPropagator {
    async fn setup(&self) -> Result<(), PropagateError> {
        Ok(())
    }

    async fn teardown(&self) {}

    async fn propagate(&self) -> Result<(), PropagateError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}
