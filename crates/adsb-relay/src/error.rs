//! Error types for adsb-relay.
//!
//! This module defines all error types used throughout the adsb-relay crate.
//! Errors are split into the ones a polling cycle recovers from on its own
//! (fetch and upload failures) and the ones that make a snapshot unusable.

use thiserror::Error;

/// The main error type for adsb-relay operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Snapshot Errors ===
    /// The receiver could not be reached or answered with a non-success status.
    #[error("failed to fetch snapshot from {url}: {message}")]
    Fetch {
        /// The URL that was requested.
        url: String,
        /// Description of what went wrong.
        message: String,
    },

    /// The receiver answered, but the payload is not a usable snapshot.
    #[error("malformed snapshot: {message}")]
    MalformedSnapshot {
        /// Description of the missing or invalid part.
        message: String,
    },

    // === Upload Errors ===
    /// The upload sink rejected or failed to deliver a batch.
    #[error("failed to upload batch of {batch_len} flight(s): {message}")]
    Upload {
        /// Number of events in the failed batch.
        batch_len: usize,
        /// Description of what went wrong.
        message: String,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for adsb-relay operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a fetch error for the given URL.
    #[must_use]
    pub fn fetch(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fetch {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create an upload error for a batch of the given size.
    #[must_use]
    pub fn upload(batch_len: usize, message: impl Into<String>) -> Self {
        Self::Upload {
            batch_len,
            message: message.into(),
        }
    }

    /// Create a malformed snapshot error.
    #[must_use]
    pub fn malformed_snapshot(message: impl Into<String>) -> Self {
        Self::MalformedSnapshot {
            message: message.into(),
        }
    }

    /// Create a configuration validation error.
    #[must_use]
    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if the next polling cycle can simply try again.
    ///
    /// Fetch and upload failures are transient. Everything else points at a
    /// payload or setup problem that retrying will not fix.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Fetch { .. } | Self::Upload { .. })
    }

    /// Check if this error means the snapshot payload had an unexpected shape.
    #[must_use]
    pub fn is_malformed_snapshot(&self) -> bool {
        matches!(self, Self::MalformedSnapshot { .. })
    }
}
