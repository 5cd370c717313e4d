//! Error types for sentinel-tiles crates.

use thiserror::Error;

/// Result type alias using SatError.
pub type SatResult<T> = Result<T, SatError>;

/// Primary error type for satellite tile operations.
#[derive(Debug, Error)]
pub enum SatError {
    // === Input Errors ===
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Invalid date range: {0}")]
    InvalidDateRange(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    // === Remote Provider Errors ===
    #[error("Rate limited by provider after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("Provider error: {message}")]
    Provider { status: Option<u16>, message: String },

    #[error("Failed to decode raster response: {0}")]
    DecodeError(String),

    // === Data Errors ===
    #[error("Data not available: {0}")]
    DataNotAvailable(String),

    #[error("No usable reference data from any of {requested} requested reference years")]
    InsufficientReferenceData { requested: usize },

    // === Storage Errors ===
    #[error("Storage error: {0}")]
    StorageError(String),

    // === Infrastructure Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

// Conversion from common error types
impl From<std::io::Error> for SatError {
    fn from(err: std::io::Error) -> Self {
        SatError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for SatError {
    fn from(err: serde_json::Error) -> Self {
        SatError::Internal(format!("JSON error: {}", err))
    }
}
