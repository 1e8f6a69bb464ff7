//! Store abstraction over triggers and configs.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use dynlog_core::{LogConfig, Trigger};

/// Errors surfaced by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store query timed out after {0:?}")]
    Timeout(Duration),
}

/// Mutation notice emitted on a store's local change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    TriggerChanged(Uuid),
    TriggerRemoved(Uuid),
    ConfigChanged(Uuid),
    ConfigRemoved(Uuid),
}

/// Snapshot of the stored id sets and the latest modification instant.
///
/// Polling propagators compare consecutive digests to detect edits and
/// deletions between sweeps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeDigest {
    pub trigger_ids: BTreeSet<Uuid>,
    pub config_ids: BTreeSet<Uuid>,
    pub latest_update: Option<DateTime<Utc>>,
}

impl ChangeDigest {
    /// Whether anything was written since `since`, or any entity known to
    /// `prev` has vanished.
    pub fn changed_since(&self, prev: &ChangeDigest, since: DateTime<Utc>) -> bool {
        if self.latest_update.is_some_and(|t| t >= since) {
            return true;
        }
        !prev.trigger_ids.is_subset(&self.trigger_ids)
            || !prev.config_ids.is_subset(&self.config_ids)
    }
}

/// Time-range queries over the trigger set.
///
/// Implementations may block on I/O; they must bound their own timeouts
/// and surface failures as [`StoreError`]. Both range queries are
/// restricted to enabled triggers and must stay deterministic under ties:
/// identical starts are ordered by trigger id.
#[async_trait]
pub trait TriggerStore: Send + Sync {
    /// The enabled trigger with the smallest `start` strictly greater
    /// than `after` (ties broken toward the smaller id).
    async fn earliest_enabled_after(
        &self,
        after: DateTime<Utc>,
    ) -> Result<Option<Trigger>, StoreError>;

    /// The enabled trigger valid at `at` with the latest start, a missing
    /// start sorting earliest (ties broken toward the larger id).
    async fn highest_priority_valid_at(
        &self,
        at: DateTime<Utc>,
    ) -> Result<Option<Trigger>, StoreError>;

    /// The stored config a trigger points at.
    async fn config(&self, id: Uuid) -> Result<Option<LogConfig>, StoreError>;

    /// Id sets and latest modification instant, for polling change
    /// detection.
    async fn change_digest(&self) -> Result<ChangeDigest, StoreError>;

    /// The local "window set changed" feed. Stores that cannot observe
    /// their own mutations (e.g. a remote database written to by other
    /// processes) may return a receiver that never fires; hosts then rely
    /// on a polling or bus propagator instead.
    fn watch(&self) -> broadcast::Receiver<StoreEvent>;
}
