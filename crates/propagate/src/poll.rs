//! Polling propagation for hosts without a broker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use dynlog_scheduler::{ChangeDigest, Scheduler, TriggerStore};

use crate::error::PropagateError;
use crate::traits::{reload_scheduler, Propagator};

/// Fallback strategy: sweep the store on an interval and reload when the
/// change digest moved.
///
/// Edits show up through modification stamps and deletions through id-set
/// differences, so a removed trigger still causes a reload even though
/// nothing newer was written.
pub struct PollPropagator {
    store: Arc<dyn TriggerStore>,
    scheduler: Arc<Scheduler>,
    interval: Duration,
    shutdown: Arc<Notify>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl PollPropagator {
    pub fn new(
        store: Arc<dyn TriggerStore>,
        scheduler: Arc<Scheduler>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            scheduler,
            interval,
            shutdown: Arc::new(Notify::new()),
            listener: Mutex::new(None),
        }
    }

    /// One sweep: compare against the previous digest and reload on
    /// change. The first sweep only records the baseline.
    async fn sweep(
        store: &Arc<dyn TriggerStore>,
        scheduler: &Arc<Scheduler>,
        prev: &mut Option<(ChangeDigest, DateTime<Utc>)>,
    ) {
        let now = Utc::now();
        let digest = match store.change_digest().await {
            Ok(digest) => digest,
            Err(err) => {
                warn!(error = %err, "change sweep failed, keeping previous baseline");
                return;
            }
        };
        if let Some((prev_digest, last_sweep)) = prev {
            if digest.changed_since(prev_digest, *last_sweep) {
                debug!("window set changed since last sweep, reloading");
                reload_scheduler(scheduler, None).await;
            }
        }
        *prev = Some((digest, now));
    }
}

#[async_trait]
impl Propagator for PollPropagator {
    async fn setup(&self) -> Result<(), PropagateError> {
        let store = Arc::clone(&self.store);
        let scheduler = Arc::clone(&self.scheduler);
        let shutdown = Arc::clone(&self.shutdown);
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let mut prev = None;
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => Self::sweep(&store, &scheduler, &mut prev).await,
                    _ = shutdown.notified() => break,
                }
            }
            info!("poll propagator stopped");
        });
        *self.listener.lock().await = Some(handle);
        Ok(())
    }

    async fn teardown(&self) {
        self.shutdown.notify_waiters();
        if let Some(handle) = self.listener.lock().await.take() {
            handle.abort();
        }
    }

    /// No-op: the local mutation is picked up by the next sweep like any
    /// remote one.
    async fn propagate(&self) -> Result<(), PropagateError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "poll"
    }
}
