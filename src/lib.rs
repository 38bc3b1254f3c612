//! # Contact Harvester
//!
//! Concurrent URL contact harvesting written in Rust. Each registered target is
//! fetched over HTTP, scanned for emails, phone numbers, postal addresses and
//! working hours, and the outcome is persisted and published.
//!
//! ## Processing strategies
//!
//! | Strategy | Entry point | Concurrency |
//! |----------|-------------|-------------|
//! | Single item | [`ItemProcessor::process`] | caller's task |
//! | Async pipeline | [`AsyncPipeline::process_all`] | bounded worker pool, caller-runs when full |
//! | Fork-join | [`ForkJoinProcessor::process`] | recursive bisection, semaphore-bounded leaves |
//!
//! Both batch strategies return the same [`BatchAggregate`] counters for the
//! same input. The async pipeline additionally scores every item by data
//! quality, reliability and latency.
//!
//! ## Load testing
//!
//! [`LoadTestHarness`] runs time-boxed tests with a configurable number of
//! workers, each repeatedly processing random targets through one strategy.
//! Tests are tracked by an eight-character id until they finish.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use contact_harvester::{Config, HarvestService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = HarvestService::new(Config::default())?;
//!     service
//!         .add_urls(vec!["https://example.com/contacts".to_string()])
//!         .await;
//!
//!     let report = service.process_active_fork_join().await?;
//!     println!(
//!         "{} of {} targets succeeded",
//!         report.stats.successful_urls, report.stats.total_urls_processed
//!     );
//!
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ### Batch Processing
//! ```bash
//! contact-harvester process --input urls.txt --strategy fork-join
//! ```
//!
//! ### Extraction Only
//! ```bash
//! contact-harvester extract --input page.html
//! ```
//!
//! ### Load Test
//! ```bash
//! contact-harvester load-test --threads 10 --duration 60 --test-type async
//! ```

/// Configuration and settings for the harvester
pub mod config;

/// Error types and error handling utilities
pub mod error;

/// Targets, fetch outcomes, item results and batch aggregates
pub mod model;

/// Regex-based contact extraction
pub mod extractor;

/// Content retrieval over HTTP and from fixed documents
pub mod fetcher;

/// Collaborator interfaces and in-memory implementations
pub mod repository;

/// Single-item processing
pub mod processor;

/// Bounded worker pool with caller-runs backpressure
pub mod worker;

/// Staged async pipeline with scoring
pub mod pipeline;

/// Recursive fork-join batch processing
pub mod fork_join;


/// Main harvest service wiring everything together
pub mod service;

/// Command-line interface implementation
pub mod cli;

/// Performance metrics collection and export
pub mod metrics;

/// Utility functions and helpers
pub mod utils;


pub use cli::*;
pub use config::*;
pub use error::*;
pub use extractor::*;
pub use fetcher::*;
pub use fork_join::*;
pub use load_test::*;
pub use metrics::*;
pub use model::*;
pub use pipeline::*;
pub use processor::*;
pub use repository::*;
pub use service::*;
pub use utils::*;
pub use worker::*;
