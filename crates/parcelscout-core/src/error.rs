use thiserror::Error;

/// All the ways things can go wrong in ParcelScout
///
/// Lookup misses are deliberately absent: updating, archiving or refreshing a
/// package that isn't there is a no-op, not an error.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Tracking request failed: {0}")]
    ApiError(String),

    #[error("Storage operation failed: {0}")]
    StorageError(#[from] parcelscout_storage::StorageError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Invalid format: expected a JSON array of packages")]
    InvalidFormat,

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
