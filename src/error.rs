//! Error types for the rate test

use thiserror::Error;

use crate::device::Direction;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to open device: {0}")]
    DeviceOpen(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Stream setup failed: {0}")]
    StreamSetup(String),

    #[error("{0} engine panicked")]
    EnginePanic(Direction),

    #[error("Config file error: {0}")]
    ConfigFile(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Unrecoverable failure reported by a single transfer call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (code {code})")]
pub struct TransferError {
    /// Driver error code
    pub code: i32,
    /// Human readable description
    pub message: String,
}

impl TransferError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
