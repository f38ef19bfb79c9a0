use thiserror::Error;

/// Attitude estimator error types
#[derive(Error, Debug)]
pub enum AcsError {
    #[error("Filter kernel scratch allocation failed, kernel left unchanged")]
    KernelAllocation,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Sensor failed: {0}")]
    SensorFailed(String),

    #[error("Bad telemetry frame: {0}")]
    BadFrame(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Channel closed")]
    ChannelClosed,
}

/// Result type for estimator operations
pub type AcsResult<T> = Result<T, AcsError>;
