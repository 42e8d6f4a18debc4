//! Error types for gatekv
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using GateError
pub type Result<T> = std::result::Result<T, GateError>;

/// Unified error type for gatekv operations
#[derive(Debug, Error)]
pub enum GateError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Key Errors
    // -------------------------------------------------------------------------
    #[error("Invalid key type: {0}")]
    InvalidKeyType(String),

    // -------------------------------------------------------------------------
    // Snapshot Errors
    // -------------------------------------------------------------------------
    #[error("Snapshot corruption detected: {0}")]
    CorruptSnapshot(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Concurrency Errors
    // -------------------------------------------------------------------------
    #[error("Coordinator error: {0}")]
    Coordinator(String),
}

impl GateError {
    /// Recoverable errors are reported to the caller as `None` / `false`
    /// by the plain store API; everything else is logged as an error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, GateError::InvalidKeyType(_))
    }
}
