//! dynlog-worker: single-node scheduler daemon.
//!
//! Composition root: wires an in-memory store (optionally seeded from a
//! JSON document), the scheduler with a reloadable env-filter applier, and
//! the configured propagation strategy, then runs until ctrl-c.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter};

use dynlog_core::{BaseConfig, Level, Trigger};
use dynlog_propagate::{build_propagator, PropagateSettings};
use dynlog_scheduler::{EnvFilterApplier, MemoryStore, Scheduler};

// ── CLI ─────────────────────────────────────────────────────────────

/// Time-windowed logging reconfiguration daemon.
#[derive(Parser, Debug)]
#[command(name = "dynlog-worker", version, about)]
struct Cli {
    /// Path to the propagation settings TOML file.
    #[arg(long, env = "DYNLOG_CONFIG", default_value = "config/dynlog.toml")]
    config: String,

    /// Path to the base logging configuration (JSON).
    #[arg(long, env = "DYNLOG_BASE_CONFIG")]
    base_config: Option<PathBuf>,

    /// Optional JSON document seeding configs and triggers into the
    /// store.
    #[arg(long, env = "DYNLOG_SEED")]
    seed: Option<PathBuf>,

    /// Delay before the first reload, in seconds.
    #[arg(long, env = "DYNLOG_FIRST_RELOAD_SECS", default_value_t = 2)]
    first_reload_secs: u64,
}

// ── Seeding ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Seed {
    #[serde(default)]
    configs: Vec<SeedConfig>,
    #[serde(default)]
    triggers: Vec<SeedTrigger>,
}

#[derive(Debug, Deserialize)]
struct SeedConfig {
    name: String,
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct SeedTrigger {
    name: String,
    /// Name of a config from the `configs` list.
    config: String,
    #[serde(default)]
    start: Option<DateTime<Utc>>,
    #[serde(default)]
    end: Option<DateTime<Utc>>,
    #[serde(default)]
    disabled: bool,
}

fn seed_store(store: &MemoryStore, seed: Seed) -> anyhow::Result<(usize, usize)> {
    let mut config_ids = HashMap::new();
    let config_count = seed.configs.len();
    for entry in seed.configs {
        let stored = store
            .put_config_json(&entry.name, &entry.payload.to_string())
            .with_context(|| format!("seeding config '{}'", entry.name))?;
        config_ids.insert(entry.name, stored.id);
    }

    let trigger_count = seed.triggers.len();
    for entry in seed.triggers {
        let config_id = *config_ids
            .get(&entry.config)
            .with_context(|| format!("trigger '{}' references unknown config", entry.name))?;
        let mut trigger = Trigger::new(&entry.name, entry.start, entry.end, config_id);
        trigger.enabled = !entry.disabled;
        store.put_trigger(trigger);
    }
    Ok((config_count, trigger_count))
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let (filter_layer, filter_handle) = reload::Layer::new(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = match PropagateSettings::from_file(&cli.config) {
        Ok(settings) => {
            info!(path = %cli.config, "loaded propagation settings");
            settings
        }
        Err(e) => {
            warn!(error = %e, path = %cli.config, "failed to load settings, using local defaults");
            PropagateSettings::default()
        }
    };

    let base = match &cli.base_config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading base config {}", path.display()))?;
            BaseConfig::from_json(&raw).context("parsing base config")?
        }
        None => BaseConfig::default(),
    };

    let store = Arc::new(MemoryStore::new());
    if let Some(path) = &cli.seed {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading seed file {}", path.display()))?;
        let seed: Seed = serde_json::from_str(&raw).context("parsing seed file")?;
        let (configs, triggers) = seed_store(&store, seed)?;
        info!(configs, triggers, "seeded store");
    }

    let applier = Arc::new(EnvFilterApplier::new(filter_handle, Level::Info));
    let scheduler = Scheduler::new(store.clone(), applier, base);

    let propagator = build_propagator(&settings, store.clone(), scheduler.clone())?;
    propagator.setup().await?;
    info!(strategy = propagator.name(), "propagator ready");

    // Deferred first reload keeps startup snappy when the store is slow.
    scheduler
        .reload_after(Duration::from_secs(cli.first_reload_secs))
        .await;

    info!("dynlog-worker running");
    tokio::signal::ctrl_c().await?;

    info!("shutting down");
    propagator.teardown().await;
    scheduler.disable().await;
    Ok(())
}
