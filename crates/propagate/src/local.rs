//! In-process propagation off the store's change feed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use dynlog_scheduler::{Scheduler, TriggerStore};

use crate::error::PropagateError;
use crate::traits::{reload_scheduler, Propagator};

/// Single-process strategy: subscribe to the store's change feed and
/// reload on every mutation.
///
/// Other processes sharing the same backing store are not notified;
/// multi-instance deployments want [`BusPropagator`](crate::BusPropagator)
/// instead.
pub struct LocalPropagator {
    store: Arc<dyn TriggerStore>,
    scheduler: Arc<Scheduler>,
    debounce: Option<Duration>,
    shutdown: Arc<Notify>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl LocalPropagator {
    pub fn new(
        store: Arc<dyn TriggerStore>,
        scheduler: Arc<Scheduler>,
        debounce: Option<Duration>,
    ) -> Self {
        Self {
            store,
            scheduler,
            debounce,
            shutdown: Arc::new(Notify::new()),
            listener: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Propagator for LocalPropagator {
    async fn setup(&self) -> Result<(), PropagateError> {
        let mut feed = self.store.watch();
        let scheduler = Arc::clone(&self.scheduler);
        let debounce = self.debounce;
        let shutdown = Arc::clone(&self.shutdown);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = feed.recv() => match event {
                        Ok(event) => {
                            debug!(?event, "window set changed, reloading");
                            reload_scheduler(&scheduler, debounce).await;
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            // Reloads recompute from scratch, so one catch-up
                            // reload covers everything that was missed.
                            warn!(missed, "change feed lagged, reloading once");
                            reload_scheduler(&scheduler, debounce).await;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = shutdown.notified() => break,
                }
            }
            info!("local propagator listener stopped");
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

    async fn propagate(&self) -> Result<(), PropagateError> {
        reload_scheduler(&self.scheduler, self.debounce).await;
        Ok(())
    }

    fn name(&self) -> &str {
        "local"
    }
}
