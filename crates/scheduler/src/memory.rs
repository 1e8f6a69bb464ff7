//! In-memory reference store.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use dynlog_core::{ConfigError, LogConfig, Trigger};

use crate::store::{ChangeDigest, StoreError, StoreEvent, TriggerStore};

/// In-memory [`TriggerStore`] with a local change feed.
///
/// The reference implementation for tests and single-process hosts. Every
/// mutator bumps `last_modified` and emits a [`StoreEvent`] on the feed.
pub struct MemoryStore {
    inner: RwLock<Inner>,
    events: broadcast::Sender<StoreEvent>,
}

#[derive(Default)]
struct Inner {
    triggers: HashMap<Uuid, Trigger>,
    configs: HashMap<Uuid, LogConfig>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: RwLock::new(Inner::default()),
            events,
        }
    }

    /// Insert or replace a trigger. Returns the stored value with its
    /// refreshed modification stamp.
    pub fn put_trigger(&self, mut trigger: Trigger) -> Trigger {
        trigger.last_modified = Utc::now();
        let id = trigger.id;
        self.inner
            .write()
            .expect("store lock poisoned")
            .triggers
            .insert(id, trigger.clone());
        self.notify(StoreEvent::TriggerChanged(id));
        trigger
    }

    pub fn remove_trigger(&self, id: Uuid) -> Option<Trigger> {
        let removed = self
            .inner
            .write()
            .expect("store lock poisoned")
            .triggers
            .remove(&id);
        if removed.is_some() {
            self.notify(StoreEvent::TriggerRemoved(id));
        }
        removed
    }

    /// Flip a trigger's enabled flag without deleting it. Returns `false`
    /// for unknown ids.
    pub fn set_trigger_enabled(&self, id: Uuid, enabled: bool) -> bool {
        let found = {
            let mut inner = self.inner.write().expect("store lock poisoned");
            match inner.triggers.get_mut(&id) {
                Some(trigger) => {
                    trigger.enabled = enabled;
                    trigger.last_modified = Utc::now();
                    true
                }
                None => false,
            }
        };
        if found {
            self.notify(StoreEvent::TriggerChanged(id));
        }
        found
    }

    /// Insert or replace a config. Returns the stored value with its
    /// refreshed modification stamp.
    pub fn put_config(&self, mut config: LogConfig) -> LogConfig {
        config.last_modified = Utc::now();
        let id = config.id;
        self.inner
            .write()
            .expect("store lock poisoned")
            .configs
            .insert(id, config.clone());
        self.notify(StoreEvent::ConfigChanged(id));
        config
    }

    /// Validate and store a config from an arbitrary JSON document; only
    /// allow-listed keys survive the write.
    pub fn put_config_json(&self, name: &str, json: &str) -> Result<LogConfig, ConfigError> {
        let config = LogConfig::from_json(name, json)?;
        Ok(self.put_config(config))
    }

    pub fn remove_config(&self, id: Uuid) -> Option<LogConfig> {
        let removed = self
            .inner
            .write()
            .expect("store lock poisoned")
            .configs
            .remove(&id);
        if removed.is_some() {
            self.notify(StoreEvent::ConfigRemoved(id));
        }
        removed
    }

    fn notify(&self, event: StoreEvent) {
        // No receivers is fine; the feed is best-effort.
        let _ = self.events.send(event);
        debug!(?event, "store mutated");
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TriggerStore for MemoryStore {
    async fn earliest_enabled_after(
        &self,
        after: DateTime<Utc>,
    ) -> Result<Option<Trigger>, StoreError> {
        let inner = self.inner.read().expect("store lock poisoned");
        Ok(inner
            .triggers
            .values()
            .filter(|t| t.enabled)
            .filter_map(|t| t.start.map(|s| (s, t)))
            .filter(|(start, _)| *start > after)
            .min_by_key(|(start, t)| (*start, t.id))
            .map(|(_, t)| t.clone()))
    }

    async fn highest_priority_valid_at(
        &self,
        at: DateTime<Utc>,
    ) -> Result<Option<Trigger>, StoreError> {
        let inner = self.inner.read().expect("store lock poisoned");
        Ok(inner
            .triggers
            .values()
            .filter(|t| t.valid_at(at))
            .max_by_key(|t| t.priority_key())
            .cloned())
    }

    async fn config(&self, id: Uuid) -> Result<Option<LogConfig>, StoreError> {
        let inner = self.inner.read().expect("store lock poisoned");
        Ok(inner.configs.get(&id).cloned())
    }

    async fn change_digest(&self) -> Result<ChangeDigest, StoreError> {
        let inner = self.inner.read().expect("store lock poisoned");
        let latest_update = inner
            .triggers
            .values()
            .map(|t| t.last_modified)
            .chain(inner.configs.values().map(|c| c.last_modified))
            .max();
        Ok(ChangeDigest {
            trigger_ids: inner.triggers.keys().copied().collect(),
            config_ids: inner.configs.keys().copied().collect(),
            latest_update,
        })
    }

    fn watch(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2017, 1, d, 0, 0, 0).unwrap()
    }

    fn trigger(name: &str, start: Option<u32>, end: Option<u32>) -> Trigger {
        Trigger::new(name, start.map(day), end.map(day), Uuid::new_v4())
    }

    #[tokio::test]
    async fn earliest_after_is_strict_and_skips_disabled() {
        let store = MemoryStore::new();
        store.put_trigger(trigger("at-five", Some(5), None));
        store.put_trigger(trigger("at-ten", Some(10), None));
        let mut disabled = trigger("at-seven", Some(7), None);
        disabled.enabled = false;
        store.put_trigger(disabled);
        store.put_trigger(trigger("unbounded", None, None));

        let hit = store.earliest_enabled_after(day(5)).await.unwrap().unwrap();
        assert_eq!(hit.name, "at-ten");

        let hit = store.earliest_enabled_after(day(4)).await.unwrap().unwrap();
        assert_eq!(hit.name, "at-five");

        assert!(store.earliest_enabled_after(day(10)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn earliest_after_breaks_ties_by_id() {
        let store = MemoryStore::new();
        let a = store.put_trigger(trigger("a", Some(5), None));
        let b = store.put_trigger(trigger("b", Some(5), None));
        let expected = if a.id < b.id { a.id } else { b.id };

        let hit = store.earliest_enabled_after(day(1)).await.unwrap().unwrap();
        assert_eq!(hit.id, expected);
    }

    #[tokio::test]
    async fn highest_priority_prefers_latest_start() {
        let store = MemoryStore::new();
        store.put_trigger(trigger("early", Some(1), Some(20)));
        store.put_trigger(trigger("late", Some(5), Some(20)));
        store.put_trigger(trigger("unbounded", None, None));

        let hit = store
            .highest_priority_valid_at(day(6))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.name, "late");

        let hit = store
            .highest_priority_valid_at(day(2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.name, "early");
    }

    #[tokio::test]
    async fn disabling_removes_from_queries_without_deleting() {
        let store = MemoryStore::new();
        let t = store.put_trigger(trigger("t", Some(1), None));

        assert!(store
            .highest_priority_valid_at(day(2))
            .await
            .unwrap()
            .is_some());

        assert!(store.set_trigger_enabled(t.id, false));
        assert!(store
            .highest_priority_valid_at(day(2))
            .await
            .unwrap()
            .is_none());

        assert!(store.set_trigger_enabled(t.id, true));
        assert!(store
            .highest_priority_valid_at(day(2))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn put_config_json_enforces_allow_list() {
        let store = MemoryStore::new();
        let stored = store
            .put_config_json("c", r#"{"loggers": {"app": {"level": "ERROR", "class": "x"}}}"#)
            .unwrap();

        let spec = stored.spec().unwrap();
        assert!(spec.loggers.contains_key("app"));
        assert!(!stored.payload.contains("class"));

        assert!(store.put_config_json("bad", "}").is_err());
    }

    #[tokio::test]
    async fn watch_sees_mutations() {
        let store = MemoryStore::new();
        let mut feed = store.watch();

        let t = store.put_trigger(trigger("t", None, None));
        assert_eq!(feed.recv().await.unwrap(), StoreEvent::TriggerChanged(t.id));

        store.remove_trigger(t.id);
        assert_eq!(feed.recv().await.unwrap(), StoreEvent::TriggerRemoved(t.id));
    }

    #[tokio::test]
    async fn digest_tracks_removals_and_updates() {
        let store = MemoryStore::new();
        let t = store.put_trigger(trigger("t", None, None));
        let before = store.change_digest().await.unwrap();
        let stamp = Utc::now();

        store.remove_trigger(t.id);
        let after = store.change_digest().await.unwrap();
        assert!(after.changed_since(&before, stamp));
    }
}
