//! Custom error types for the application.
//!
//! This module defines the primary error type, `GreenhouseError`, for the entire crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of errors that can occur, from I/O and configuration issues to
//! undecodable telemetry and unreachable upstream services.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically file parsing or type mismatches.
//! - **`Configuration`**: Semantic errors in an otherwise well-formed configuration, caught
//!   by `GreenhouseConfig::validate`.
//! - **`Io`** / **`Csv`**: Storage and stream I/O. These are treated as transient: the owning
//!   task logs them and tries again on its next natural cycle.
//! - **`Decode`**: A sensor line or persisted row that could not be parsed. The unit is
//!   dropped and ingestion continues.
//! - **`InvalidInput`**: Caller supplied arguments that can never succeed (empty plant name,
//!   unknown pump command, malformed date).
//! - **`Upstream`**: The message bus or classification model is unavailable. Surfaced to the
//!   caller; never affects ingestion or the registry.
//!
//! "Not found" is deliberately absent: lookups return `Option` and mutations return `bool`.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, GreenhouseError>;

/// Primary error type for the greenhouse telemetry system.
#[derive(Error, Debug)]
pub enum GreenhouseError {
    /// Configuration could not be loaded or deserialized
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration loaded but failed semantic validation
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Stream or filesystem I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding or decoding failure
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A sensor line or stored row could not be parsed
    #[error("Decode error: {0}")]
    Decode(String),

    /// Caller arguments that can never succeed
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Message bus or classifier unavailable
    #[error("Upstream service unavailable: {0}")]
    Upstream(String),
}

impl GreenhouseError {
    /// Whether retrying the same operation at the next poll or read cycle may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GreenhouseError::Io(_) | GreenhouseError::Csv(_) | GreenhouseError::Upstream(_)
        )
    }
}
