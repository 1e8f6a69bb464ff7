//! Pure resolution of a partial config against the base configuration.

use indexmap::IndexMap;

use crate::base::{BaseConfig, HandlerConfig, LoggerConfig};
use crate::config::ConfigSpec;

/// A fully resolved configuration, ready to hand to an applier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectiveConfig {
    /// Full replace: exactly the loggers the partial mentioned. Appliers
    /// reset every other logger to "no handlers, propagate, default level".
    pub loggers: IndexMap<String, LoggerConfig>,
    /// The base handlers with level/filters overrides folded in.
    pub handlers: IndexMap<String, HandlerConfig>,
}

impl EffectiveConfig {
    /// The synthetic configuration for "no window active": the base's own
    /// loggers and handlers, untouched.
    pub fn default_for(base: &BaseConfig) -> Self {
        Self {
            loggers: base.loggers.clone(),
            handlers: base.handlers.clone(),
        }
    }
}

/// Expand partial logger entries into full entries.
///
/// Defaults are `{level: INFO, propagate: true, handlers: [], filters: []}`,
/// overridden only by the keys present in each entry. Loggers the partial
/// does not mention are absent from the result; the logger namespace is a
/// full replace, not a patch.
pub fn build_loggers(spec: &ConfigSpec) -> IndexMap<String, LoggerConfig> {
    spec.loggers
        .iter()
        .map(|(name, entry)| {
            let mut cfg = LoggerConfig::default();
            if let Some(level) = entry.level {
                cfg.level = level;
            }
            if let Some(propagate) = entry.propagate {
                cfg.propagate = propagate;
            }
            if let Some(filters) = &entry.filters {
                cfg.filters = filters.clone();
            }
            if let Some(handlers) = &entry.handlers {
                cfg.handlers = handlers.clone();
            }
            (name.clone(), cfg)
        })
        .collect()
}

/// Fold handler overrides into the base handlers.
///
/// Handlers are never added or removed; only `level` and `filters` move.
/// Overrides naming a handler absent from the base are ignored.
pub fn merge_handlers(
    base: &IndexMap<String, HandlerConfig>,
    spec: &ConfigSpec,
) -> IndexMap<String, HandlerConfig> {
    let mut merged = base.clone();
    for (name, handler) in merged.iter_mut() {
        if let Some(entry) = spec.handlers.get(name) {
            if let Some(level) = entry.level {
                handler.level = Some(level);
            }
            if let Some(filters) = &entry.filters {
                handler.filters = filters.clone();
            }
        }
    }
    merged
}

/// Resolve a partial config against the base configuration.
///
/// Deterministic and side-effect-free; applying the result is the
/// scheduler's job.
pub fn resolve(base: &BaseConfig, spec: &ConfigSpec) -> EffectiveConfig {
    EffectiveConfig {
        loggers: build_loggers(spec),
        handlers: merge_handlers(&base.handlers, spec),
    }
}
