use thiserror::Error;

/// Workout tracker error types
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Sensor failed: {0}")]
    SensorFailed(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TrackerError>;

impl TrackerError {
    pub(crate) fn lock(what: &str) -> Self {
        TrackerError::Internal(format!("Failed to acquire {} lock", what))
    }
}
