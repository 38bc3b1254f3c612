//! Configuration management with serde serialization/deserialization
//!
//! This module provides all configuration structures for the harvester: HTTP fetch
//! behaviour, the bounded worker pool behind the async pipeline, the fork-join
//! splitter, the load-test harness and the contact extraction patterns.

use crate::error::HarvestError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure for the harvester
///
/// Every section falls back to its defaults when missing from a JSON config file,
/// so a file only needs to name the values it overrides.
///
/// # Examples
///
/// ```rust
/// use contact_harvester::{Config, PipelineSettings};
///
/// // Use default configuration
/// let config = Config::default();
/// assert_eq!(config.pipeline.worker_count, 5);
///
/// // Create custom configuration
/// let config = Config {
///     pipeline: PipelineSettings {
///         worker_count: 8,
///         ..Default::default()
///     },
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// HTTP retrieval settings
    pub fetch: FetchSettings,

    /// Bounded worker pool used by the async pipeline
    pub pipeline: PipelineSettings,

    /// Recursive batch splitter settings
    pub fork_join: ForkJoinSettings,

    /// Load-test harness limits
    pub load_test: LoadTestSettings,

    /// Regular expressions used by the contact extractor
    pub extraction: ExtractionPatterns,
}

impl Config {
    /// Load a configuration from a JSON file. Missing sections use defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, HarvestError> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Check every bound the runtime relies on.
    pub fn validate(&self) -> Result<(), HarvestError> {
        if self.fetch.timeout.is_zero() {
            return Err(HarvestError::Configuration(
                "fetch.timeout must be greater than zero".to_string(),
            ));
        }

        if self.fetch.user_agent.trim().is_empty() {
            return Err(HarvestError::Configuration(
                "fetch.user_agent must not be empty".to_string(),
            ));
        }

        if self.pipeline.worker_count == 0 {
            return Err(HarvestError::Configuration(
                "pipeline.worker_count must be greater than 0".to_string(),
            ));
        }

        if self.pipeline.queue_capacity == 0 {
            return Err(HarvestError::Configuration(
                "pipeline.queue_capacity must be greater than 0".to_string(),
            ));
        }

        if self.fork_join.parallelism == 0 {
            return Err(HarvestError::Configuration(
                "fork_join.parallelism must be greater than 0".to_string(),
            ));
        }

        if self.fork_join.batch_threshold == 0 {
            return Err(HarvestError::Configuration(
                "fork_join.batch_threshold must be greater than 0".to_string(),
            ));
        }

        if self.load_test.max_concurrent_tests == 0 {
            return Err(HarvestError::Configuration(
                "load_test.max_concurrent_tests must be greater than 0".to_string(),
            ));
        }

        if self.load_test.status_error_samples > self.load_test.max_recorded_errors {
            return Err(HarvestError::Configuration(
                "load_test.status_error_samples cannot exceed load_test.max_recorded_errors"
                    .to_string(),
            ));
        }

        self.extraction.compile()?;

        Ok(())
    }
}

/// HTTP retrieval settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FetchSettings {
    /// Whole-request timeout (default: 10 seconds)
    pub timeout: Duration,

    /// User-Agent header sent with every request (default: `URL-Parser-Bot/1.0`)
    pub user_agent: String,

    /// Follow HTTP redirects (default: true)
    pub follow_redirects: bool,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: "URL-Parser-Bot/1.0".to_string(),
            follow_redirects: true,
        }
    }
}

/// Worker pool behind the async pipeline
///
/// When all workers are busy and the queue holds `queue_capacity` jobs, the
/// submitting task runs the job itself. Submission never fails because of load.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Number of long-lived workers (default: 5)
    pub worker_count: usize,

    /// Jobs that may wait for a free worker (default: 100)
    pub queue_capacity: usize,

    /// Simulated latency of the side lookup (default: 100ms)
    pub side_lookup_delay: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            worker_count: 5,
            queue_capacity: 100,
            side_lookup_delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ForkJoinSettings {
    /// Leaves that may process concurrently (default: 8)
    pub parallelism: usize,

    /// Ranges of at most this many items are processed directly (default: 3)
    pub batch_threshold: usize,
}

impl Default for ForkJoinSettings {
    fn default() -> Self {
        Self {
            parallelism: 8,
            batch_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoadTestSettings {
    /// Tests whose drivers may run at the same time (default: 50)
    pub max_concurrent_tests: usize,

    /// Error messages retained per test (default: 100)
    pub max_recorded_errors: usize,

    /// Error messages included in a status snapshot (default: 5)
    pub status_error_samples: usize,

    /// How long `stop_all` waits for aborted drivers (default: 5 seconds)
    pub stop_grace_period: Duration,

    /// Extra time past the test duration before workers are aborted (default: 10 seconds)
    pub completion_slack: Duration,
}

impl Default for LoadTestSettings {
    fn default() -> Self {
        Self {
            max_concurrent_tests: 50,
            max_recorded_errors: 100,
            status_error_samples: 5,
            stop_grace_period: Duration::from_secs(5),
            completion_slack: Duration::from_secs(10),
        }
    }
}

/// Contact extraction patterns
///
/// The defaults target Russian-locale pages: street-type keywords for postal
/// addresses and weekday abbreviations for working hours. Case-insensitivity
/// is expressed inline with `(?i)`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExtractionPatterns {
    pub email: String,
    pub phone: String,
    pub address: String,
    pub working_hours: String,
}

impl Default for ExtractionPatterns {
    fn default() -> Self {
        Self {
            email: r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Z|a-z]{2,}\b".to_string(),
            phone: r"(\+?\d{1,3})?\s*\(?(\d{3})\)?\s*[-.\s]?(\d{3})\s*[-.\s]?(\d{2,4})"
                .to_string(),
            address: r"(?i)\b(ул\.|улица|проспект|пр\.|бульвар|б-р|переулок|пер\.)[^,.]{1,50},\s*[^,.]{1,50}"
                .to_string(),
            working_hours: r"(?i)(пн|вт|ср|чт|пт|сб|вс|понед|вторник|среда|четверг|пятница|суббота|воскресенье)[^.]*\d{1,2}[:.]\d{2}[^.]*\d{1,2}[:.]\d{2}"
                .to_string(),
        }
    }
}

impl ExtractionPatterns {
    /// Compile all four patterns, reporting the first one that fails.
    pub fn compile(&self) -> Result<CompiledPatterns, HarvestError> {
        Ok(CompiledPatterns {
            email: regex::Regex::new(&self.email)?,
            phone: regex::Regex::new(&self.phone)?,
            address: regex::Regex::new(&self.address)?,
            working_hours: regex::Regex::new(&self.working_hours)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CompiledPatterns {
    pub email: regex::Regex,
    pub phone: regex::Regex,
    pub address: regex::Regex,
    pub working_hours: regex::Regex,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fetch.timeout, Duration::from_secs(10));
        assert_eq!(config.fetch.user_agent, "URL-Parser-Bot/1.0");
        assert_eq!(config.pipeline.queue_capacity, 100);
        assert_eq!(config.fork_join.parallelism, 8);
        assert_eq!(config.fork_join.batch_threshold, 3);
    }

    #[test]
    fn test_zero_bounds_are_rejected() {
        let mut config = Config::default();
        config.pipeline.worker_count = 0;
        assert!(matches!(
            config.validate(),
            Err(HarvestError::Configuration(_))
        ));

        let mut config = Config::default();
        config.fork_join.batch_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.load_test.status_error_samples = 500;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let mut config = Config::default();
        config.extraction.email = "([unclosed".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("invalid extraction pattern"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"pipeline": {"worker_count": 12}}"#).unwrap();
        assert_eq!(config.pipeline.worker_count, 12);
        assert_eq!(config.pipeline.queue_capacity, 100);
        assert_eq!(config.fork_join.parallelism, 8);
        assert_eq!(config.extraction, ExtractionPatterns::default());
    }
}
