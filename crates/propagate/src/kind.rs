//! Strategy selection and settings.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use dynlog_scheduler::{Scheduler, TriggerStore};

use crate::bus::{BusConfig, BusPropagator};
use crate::error::PropagateError;
use crate::local::LocalPropagator;
use crate::poll::PollPropagator;
use crate::traits::{NullPropagator, Propagator};

/// The closed set of propagation strategies, resolved at startup. There is
/// no dynamic strategy loading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagatorKind {
    Null,
    #[default]
    Local,
    Poll,
    Bus,
}

impl FromStr for PropagatorKind {
    type Err = PropagateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "null" => Ok(Self::Null),
            "local" => Ok(Self::Local),
            "poll" => Ok(Self::Poll),
            "bus" => Ok(Self::Bus),
            other => Err(PropagateError::Settings(format!(
                "unknown propagator kind: {other}"
            ))),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    60
}

/// Propagation settings, loadable from a TOML document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagateSettings {
    #[serde(default)]
    pub kind: PropagatorKind,

    /// Sweep period for the poll strategy.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Debounce applied to propagated reloads; absent means reload
    /// immediately.
    #[serde(default)]
    pub debounce_ms: Option<u64>,

    /// Bus wiring; required by the bus strategy.
    #[serde(default)]
    pub bus: Option<BusConfig>,
}

impl Default for PropagateSettings {
    fn default() -> Self {
        Self {
            kind: PropagatorKind::default(),
            poll_interval_secs: default_poll_interval_secs(),
            debounce_ms: None,
            bus: None,
        }
    }
}

impl PropagateSettings {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PropagateError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn debounce(&self) -> Option<Duration> {
        self.debounce_ms.map(Duration::from_millis)
    }
}

/// Build the configured strategy. The factory is the only place strategies
/// come from settings, so a new kind forces the compiler through every
/// arm.
pub fn build_propagator(
    settings: &PropagateSettings,
    store: Arc<dyn TriggerStore>,
    scheduler: Arc<Scheduler>,
) -> Result<Box<dyn Propagator>, PropagateError> {
    let debounce = settings.debounce();
    match settings.kind {
        PropagatorKind::Null => Ok(Box::new(NullPropagator)),
        PropagatorKind::Local => Ok(Box::new(LocalPropagator::new(store, scheduler, debounce))),
        PropagatorKind::Poll => Ok(Box::new(PollPropagator::new(
            store,
            scheduler,
            Duration::from_secs(settings.poll_interval_secs),
        ))),
        PropagatorKind::Bus => {
            let bus = settings.bus.clone().ok_or_else(|| {
                PropagateError::Settings("bus strategy requires [bus] settings".to_string())
            })?;
            Ok(Box::new(BusPropagator::new(bus, store, scheduler, debounce)))
        }
    }
}
