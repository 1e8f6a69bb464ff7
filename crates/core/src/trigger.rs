//! Activation windows binding a time range to a stored config.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A time window during which a config should be active.
///
/// Windows may overlap. Among enabled windows valid at the same instant the
/// one with the latest `start` wins; a missing `start` sorts as the earliest
/// possible instant. Ties on identical `start` are broken by `id` so
/// repeated evaluations pick the same winner regardless of store iteration
/// order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub id: Uuid,
    pub name: String,
    pub enabled: bool,
    /// Inclusive lower bound; `None` means "since forever".
    pub start: Option<DateTime<Utc>>,
    /// Exclusive upper bound; `None` means "never ends".
    pub end: Option<DateTime<Utc>>,
    /// The stored config this window activates.
    pub config_id: Uuid,
    /// Bumped by the store on every write.
    pub last_modified: DateTime<Utc>,
}

impl Trigger {
    pub fn new(
        name: impl Into<String>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        config_id: Uuid,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            enabled: true,
            start,
            end,
            config_id,
            last_modified: Utc::now(),
        }
    }

    /// The synthetic "no window active" trigger. Unbounded, nil identity,
    /// never persisted; its config is the process's base configuration.
    pub fn fallback() -> Self {
        Self {
            id: Uuid::nil(),
            name: "default".to_string(),
            enabled: true,
            start: None,
            end: None,
            config_id: Uuid::nil(),
            last_modified: DateTime::<Utc>::MIN_UTC,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.id.is_nil()
    }

    /// Whether this window covers `at`. Start is inclusive, end exclusive,
    /// so back-to-back windows hand over without a gap or double cover.
    pub fn valid_at(&self, at: DateTime<Utc>) -> bool {
        self.enabled
            && self.start.is_none_or(|s| s <= at)
            && self.end.is_none_or(|e| e > at)
    }

    /// Ordering key for overlap priority: latest start wins, ties by id.
    pub fn priority_key(&self) -> (DateTime<Utc>, Uuid) {
        (self.start.unwrap_or(DateTime::<Utc>::MIN_UTC), self.id)
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fmt_bound = |b: &Option<DateTime<Utc>>| match b {
            Some(t) => t.to_rfc3339(),
            None => "..".to_string(),
        };
        write!(
            f,
            "trigger {} [{}, {})",
            self.name,
            fmt_bound(&self.start),
            fmt_bound(&self.end)
        )
    }
}
