//! Stored configs: JSON payloads restricted to an allow-listed shape.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::ConfigError;
use crate::level::Level;

/// Content hash of a stored config. Equal hashes mean re-applying would be
/// a no-op, so the scheduler can skip the applier.
pub type ConfigHash = [u8; 32];

/// Per-logger overrides accepted from a partial config payload.
///
/// Every field is optional so "key present" stays distinguishable from
/// "key absent" when resolving against defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggerOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<Level>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub propagate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handlers: Option<Vec<String>>,
}

/// Per-handler overrides. Handler identity (class, formatter, ...) is never
/// overridable, so only `level` and `filters` survive the write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandlerOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<Level>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<String>>,
}

/// The typed, allow-listed form of a partial config payload.
///
/// Deserializing drops unknown namespaces and unknown keys inside entries;
/// re-serializing therefore stores only the allow-listed shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSpec {
    #[serde(default)]
    pub loggers: IndexMap<String, LoggerOverride>,
    #[serde(default)]
    pub handlers: IndexMap<String, HandlerOverride>,
}

impl ConfigSpec {
    /// Parse a payload. An empty document is a valid empty spec.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A named, stored configuration payload.
///
/// The payload is kept as JSON text: the allow-list is enforced at write
/// time and the text is re-parsed at apply time, so a payload corrupted in
/// storage surfaces as a [`ConfigError`] instead of a partial apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    pub id: Uuid,
    pub name: String,
    pub payload: String,
    /// Bumped by the store on every write.
    pub last_modified: DateTime<Utc>,
}

impl LogConfig {
    pub fn new(name: impl Into<String>, spec: &ConfigSpec) -> Result<Self, ConfigError> {
        Ok(Self {
            id: Uuid::new_v4(),
            name: name.into(),
            payload: spec.to_json()?,
            last_modified: Utc::now(),
        })
    }

    /// Create a config from an arbitrary JSON document, keeping only the
    /// allow-listed keys.
    pub fn from_json(name: impl Into<String>, json: &str) -> Result<Self, ConfigError> {
        let spec = ConfigSpec::from_json(json)?;
        Self::new(name, &spec)
    }

    /// Parse the stored payload back into its typed form.
    pub fn spec(&self) -> Result<ConfigSpec, ConfigError> {
        ConfigSpec::from_json(&self.payload)
    }

    /// SHA-256 over identity and payload.
    pub fn content_hash(&self) -> ConfigHash {
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        hasher.update(self.payload.as_bytes());
        hasher.finalize().into()
    }

    /// Content hash of the synthetic default config ("no window active").
    /// Never collides with a stored config, which always hashes a random
    /// id plus its payload.
    pub fn fallback_hash() -> ConfigHash {
        let mut hasher = Sha256::new();
        hasher.update(Uuid::nil().as_bytes());
        hasher.finalize().into()
    }
}
