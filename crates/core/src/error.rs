use thiserror::Error;

/// Errors raised while parsing or validating configuration payloads.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("unknown log level: {0}")]
    UnknownLevel(String),
}
