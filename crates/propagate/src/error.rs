use thiserror::Error;

/// Errors surfaced by propagator strategies and their transports.
#[derive(Debug, Error)]
pub enum PropagateError {
    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("zeromq error: {0}")]
    Zmq(#[from] zeromq::ZmqError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("settings error: {0}")]
    Settings(String),

    #[error("settings parse error: {0}")]
    SettingsParse(#[from] toml::de::Error),

    #[error("settings I/O error: {0}")]
    Io(#[from] std::io::Error),
}
