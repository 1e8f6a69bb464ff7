use thiserror::Error;
use uuid::Uuid;

use dynlog_core::ConfigError;

use crate::applier::ApplyError;
use crate::store::StoreError;

/// Errors surfaced by scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("apply error: {0}")]
    Apply(#[from] ApplyError),

    #[error("config {0} referenced by trigger is gone")]
    ConfigMissing(Uuid),
}
