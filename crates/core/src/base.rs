//! The static configuration the process started with.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;
use crate::level::Level;

fn default_true() -> bool {
    true
}

/// Fully-specified logger entry, as found in the base configuration and in
/// resolved effective configurations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggerConfig {
    #[serde(default)]
    pub level: Level,
    #[serde(default = "default_true")]
    pub propagate: bool,
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default)]
    pub handlers: Vec<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            propagate: true,
            filters: Vec::new(),
            handlers: Vec::new(),
        }
    }
}

/// Handler entry. `level` and `filters` are the only keys a partial config
/// may override; everything else (class, formatter, ...) rides along in
/// `extra` untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandlerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<Level>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// The base configuration, loaded once at composition time. The synthetic
/// "no window active" config derives from it and it anchors every handler
/// merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaseConfig {
    #[serde(default)]
    pub loggers: IndexMap<String, LoggerConfig>,
    #[serde(default)]
    pub handlers: IndexMap<String, HandlerConfig>,
}

impl BaseConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }
}
