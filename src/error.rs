//! Error types for the crate

use thiserror::Error;

use crate::amount::AmountError;

/// Result type for engine, snapshot and tooling operations
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-level errors
#[derive(Error, Debug)]
pub enum Error {
    /// Value layer error (asset mismatch, zero quality, parse)
    #[error("Amount error: {0}")]
    Amount(#[from] AmountError),

    /// Snapshot or report (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Replay input error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Replay row that does not describe a command
    #[error("Invalid replay row {line}: {reason}")]
    InvalidRow { line: u64, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
