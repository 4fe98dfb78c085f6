//! Error types for the depends analysis API.
//!
//! Module-level errors (`PeError`, `IoError`) stay close to the code that
//! raises them; `DependsError` is what the top-level entry points return.

use thiserror::Error;

use crate::formats::pe::PeError;
use crate::io::error::IoError;

/// Main error type for depends operations.
#[derive(Debug, Error)]
pub enum DependsError {
    /// PE container or table errors
    #[error("PE error: {0}")]
    Pe(#[from] PeError),

    /// Bounded I/O errors (limits, mapping)
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Invalid input data
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for depends operations
pub type Result<T> = std::result::Result<T, DependsError>;
