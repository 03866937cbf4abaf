use thiserror::Error;

/// Invalid run or sender settings. Always raised before any worker starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("worker count must be greater than zero")]
    InvalidWorkerCount,

    #[error("rate per worker must be greater than zero, got {0}")]
    InvalidRate(u32),

    #[error("progress cadence must be greater than zero")]
    InvalidProgressCadence,

    #[error("missing setting: {0}")]
    Missing(&'static str),

    #[error("invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Failure of a single publish. Terminal for that message only.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("rejected by broker: {0}")]
    Rejected(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

#[derive(Error, Debug)]
pub enum GustError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("send error: {0}")]
    Send(#[from] SendError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("metrics error: {0}")]
    Metrics(String),
}

pub type Result<T> = std::result::Result<T, GustError>;
