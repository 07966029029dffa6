//! Error types for evaveo-core

use thiserror::Error;

/// Main error type for the evaveo-core library
///
/// None of these reach a tracking call: delivery failures are retried by the
/// queue and initialization problems are logged. They surface only where a
/// caller can act on them, such as loading a config file.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Event delivery error (transport failure or non-2xx response)
    #[error("delivery error: {0}")]
    Delivery(String),

    /// Async runtime unavailable or shut down
    #[error("runtime error: {0}")]
    Runtime(String),
}

/// Result type alias for evaveo-core
pub type Result<T> = std::result::Result<T, Error>;
