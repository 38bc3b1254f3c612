use std::time::Duration;
use thiserror::Error;
use std::fmt::Display;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Error)]
pub enum HarvestError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Pipeline stage '{stage}' failed: {message}")]
    StageFailed { stage: &'static str, message: String },

    #[error("Task did not complete: {0}")]
    TaskDropped(String),

    #[error("Target already registered: {0}")]
    DuplicateTarget(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Result sink error: {0}")]
    Sink(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl HarvestError {
    /// Transport-level failures that a later attempt may not hit again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HarvestError::Network(_) | HarvestError::Timeout(_) | HarvestError::TaskDropped(_)
        )
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            HarvestError::Validation(_) => ErrorSeverity::Low,
            HarvestError::InvalidUrl(_) => ErrorSeverity::Low,
            HarvestError::DuplicateTarget(_) => ErrorSeverity::Low,
            HarvestError::NotFound(_) => ErrorSeverity::Low,
            HarvestError::Configuration(_) => ErrorSeverity::High,
            _ => ErrorSeverity::Medium,
        }
    }

    /// Log at a level matching [`Self::severity`].
    pub fn log(&self, context: impl Display) {
        let retryable = self.is_retryable();
        match self.severity() {
            ErrorSeverity::Low => debug!(retryable, "{}: {}", context, self),
            ErrorSeverity::Medium => warn!(retryable, "{}: {}", context, self),
            ErrorSeverity::High => error!(retryable, "{}: {}", context, self),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
}

impl From<reqwest::Error> for HarvestError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            HarvestError::InvalidUrl(err.to_string())
        } else {
            HarvestError::Network(err.to_string())
        }
    }
}

impl From<std::io::Error> for HarvestError {
    fn from(err: std::io::Error) -> Self {
        HarvestError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for HarvestError {
    fn from(err: serde_json::Error) -> Self {
        HarvestError::Serialization(err.to_string())
    }
}

impl From<regex::Error> for HarvestError {
    fn from(err: regex::Error) -> Self {
        HarvestError::Configuration(format!("invalid extraction pattern: {err}"))
    }
}
