//! # Error Taxonomy
//!
//! Errors are split by where they occur relative to the measurement path:
//!
//! - **Configuration** errors (`NotConfigured`, `InvalidSuite`) are fatal to the
//!   call that hit them and are never silently defaulted.
//! - **Provider-creation** errors are recorded into the affected scenario's
//!   result; the suite keeps going.
//! - **Execution** errors (`Execution`, `Timeout`, `EmptyTranscript`) are caught
//!   at the scenario boundary and become entries in `TestResult::errors`.
//! - **Reporting** errors are logged by the reporter and dropped.
//!
//! Health-probe failures never surface as errors; they fold into
//! `HealthStatus::Unhealthy`.

use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, HarnessError>;

#[derive(Error, Debug)]
pub enum HarnessError {
    /// A component was used before `configure()`
    #[error("{component} used before configure()")]
    NotConfigured { component: &'static str },

    /// Suite definition cannot produce any runnable configuration
    #[error("Invalid suite definition: {0}")]
    InvalidSuite(String),

    /// A backend could not be created for the requested provider
    #[error("Failed to create {kind} provider '{provider}': {reason}")]
    ProviderCreation {
        kind: &'static str,
        provider: String,
        reason: String,
    },

    /// A backend failed while streaming
    #[error("{stage} failed: {message}")]
    Execution { stage: &'static str, message: String },

    /// A backend stage exceeded its deadline
    #[error("{stage} timed out after {timeout:?}")]
    Timeout {
        stage: &'static str,
        timeout: Duration,
    },

    /// Transcription finished without producing any text
    #[error("STT produced an empty transcript")]
    EmptyTranscript,

    /// Outbound batch report failed
    #[error("Report to {endpoint} failed: {message}")]
    Reporting { endpoint: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl HarnessError {
    /// Shorthand for a streaming failure in `stage`
    pub fn execution(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Execution {
            stage,
            message: message.into(),
        }
    }

    /// True for errors that must abort the caller instead of being recorded
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::NotConfigured { .. } | Self::InvalidSuite(_))
    }
}
