//! Appliers push a resolved configuration into live subsystem state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::reload;
use tracing_subscriber::EnvFilter;

use dynlog_core::{EffectiveConfig, Level};

/// Errors surfaced by appliers.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("filter rebuild failed: {0}")]
    Filter(String),

    #[error("subscriber reload failed: {0}")]
    Reload(String),

    #[error("{0}")]
    Other(String),
}

/// Mutates live subsystem state to reflect an effective configuration.
///
/// Implementations must be atomic from the scheduler's point of view: a
/// failed apply must leave the previous state observable, because the
/// scheduler does not commit the new trigger on error.
#[async_trait]
pub trait Applier: Send + Sync {
    async fn apply(&self, config: &EffectiveConfig) -> Result<(), ApplyError>;

    /// Human-readable name for logs.
    fn name(&self) -> &str {
        "applier"
    }
}

fn directive_level(level: Level) -> &'static str {
    match level {
        Level::Trace => "trace",
        Level::Debug => "debug",
        Level::Info => "info",
        Level::Warn => "warn",
        Level::Error => "error",
    }
}

/// Projects logger levels into a live [`EnvFilter`] through a
/// `tracing_subscriber` reload handle.
///
/// A logger entry named `root` becomes the default directive; every other
/// entry becomes a `target=level` directive, with dotted names mapped to
/// `::` target paths. Handler topology and filter chains are host-specific
/// and outside this projection; hosts that need them implement [`Applier`]
/// against the full [`EffectiveConfig`].
pub struct EnvFilterApplier<S> {
    handle: reload::Handle<EnvFilter, S>,
    default_level: Level,
}

impl<S> EnvFilterApplier<S> {
    pub fn new(handle: reload::Handle<EnvFilter, S>, default_level: Level) -> Self {
        Self {
            handle,
            default_level,
        }
    }

    fn directives(&self, config: &EffectiveConfig) -> String {
        let mut default = self.default_level;
        let mut parts = Vec::with_capacity(config.loggers.len() + 1);
        for (name, logger) in &config.loggers {
            if name == "root" {
                default = logger.level;
            } else {
                let target = name.replace('.', "::");
                parts.push(format!("{}={}", target, directive_level(logger.level)));
            }
        }
        parts.insert(0, directive_level(default).to_string());
        parts.join(",")
    }
}

#[async_trait]
impl<S: Send + Sync + 'static> Applier for EnvFilterApplier<S> {
    async fn apply(&self, config: &EffectiveConfig) -> Result<(), ApplyError> {
        let directives = self.directives(config);
        let filter =
            EnvFilter::try_new(&directives).map_err(|e| ApplyError::Filter(e.to_string()))?;
        self.handle
            .reload(filter)
            .map_err(|e| ApplyError::Reload(e.to_string()))?;
        info!(%directives, "swapped live log filter");
        Ok(())
    }

    fn name(&self) -> &str {
        "env-filter"
    }
}

/// Applier that records every configuration it receives and can be armed
/// to fail. Ships with the crate so hosts can verify their wiring the same
/// way the crate's own tests do.
#[derive(Default)]
pub struct RecordingApplier {
    applied: Mutex<Vec<EffectiveConfig>>,
    fail: AtomicBool,
}

impl RecordingApplier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `apply` fail until called again with `false`.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn applied(&self) -> Vec<EffectiveConfig> {
        self.applied.lock().expect("recording lock poisoned").clone()
    }

    pub fn apply_count(&self) -> usize {
        self.applied.lock().expect("recording lock poisoned").len()
    }

    pub fn last(&self) -> Option<EffectiveConfig> {
        self.applied
            .lock()
            .expect("recording lock poisoned")
            .last()
            .cloned()
    }
}

#[async_trait]
impl Applier for RecordingApplier {
    async fn apply(&self, config: &EffectiveConfig) -> Result<(), ApplyError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ApplyError::Other("armed to fail".to_string()));
        }
        self.applied
            .lock()
            .expect("recording lock poisoned")
            .push(config.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}
