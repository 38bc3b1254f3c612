//! Main harvest service wiring the processing core together
//!
//! `HarvestService` owns the target repository, the result store and the three
//! processing strategies (single item, async pipeline, fork-join) plus the
//! load-test harness built on top of them.

use crate::{
    AsyncPipeline, CachedTargetRepository, Config, ContactExtractor, ContentFetcher, ForkJoinProcessor, ForkJoinReport,
    HarvestError, HttpFetcher, InMemoryResultStore, InMemoryTargetRepository, ItemProcessor,
    ItemResult, LoadTestHarness, LoggingNotifier, Metrics, PipelineReport, PoolStats,
    ProgressTracker, ReliabilitySource, ResultStatistics, SideLookupService, SyntheticReliability,
    Target, TargetId, TargetRepository,
};
use crate::utils::{extract_domain, validate_url};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Harvest service with every collaborator wired in
///
/// # Examples
///
/// ```rust,no_run
/// use contact_harvester::{Config, HarvestService};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let service = HarvestService::new(Config::default())?;
///     service.add_urls(vec!["https://example.com".to_string()]).await;
///
///     let report = service.process_active_async().await?;
///     println!("Processed {} targets", report.aggregate.processed_count);
///
///     service.shutdown().await;
///     Ok(())
/// }
/// ```
pub struct HarvestService {
    config: Config,
    repository: Arc<CachedTargetRepository<InMemoryTargetRepository>>,
    results: Arc<InMemoryResultStore>,
    processor: ItemProcessor,
    pipeline: Arc<AsyncPipeline>,
    fork_join: Arc<ForkJoinProcessor>,
    load_tests: LoadTestHarness,
}

/// Options for assembling a [`HarvestService`] with non-default collaborators.
pub struct ServiceParts {
    pub fetcher: Arc<dyn ContentFetcher>,
    pub reliability: Arc<dyn ReliabilitySource>,
    pub metrics: Arc<Metrics>,
    pub notify: bool,
}

impl HarvestService {
    /// Build a service that fetches over HTTP. Must be called inside a Tokio runtime.
    pub fn new(config: Config) -> Result<Self, HarvestError> {
        let fetcher = Arc::new(HttpFetcher::new(&config.fetch)?);
        Self::with_parts(
            config,
            ServiceParts {
                fetcher,
                reliability: Arc::new(SyntheticReliability),
                metrics: Arc::new(Metrics::new()),
                notify: true,
            },
        )
    }

    pub fn with_fetcher(config: Config, fetcher: Arc<dyn ContentFetcher>) -> Result<Self, HarvestError> {
        Self::with_parts(
            config,
            ServiceParts {
                fetcher,
                reliability: Arc::new(SyntheticReliability),
                metrics: Arc::new(Metrics::new()),
                notify: true,
            },
        )
    }

    pub fn with_parts(config: Config, parts: ServiceParts) -> Result<Self, HarvestError> {
        config.validate()?;

        let extractor = Arc::new(ContactExtractor::new(&config.extraction)?);
        let repository = Arc::new(CachedTargetRepository::new(
            InMemoryTargetRepository::new(),
        ));
        let results = Arc::new(InMemoryResultStore::new());
        let metrics = parts.metrics;

        let mut processor = ItemProcessor::new(parts.fetcher, extractor, results.clone())
            .with_metrics(metrics.clone());
        if parts.notify {
            processor = processor.with_notifier(Arc::new(LoggingNotifier));
        }

        let lookup = SideLookupService::new(
            results.clone(),
            parts.reliability,
            config.pipeline.side_lookup_delay,
        );
        let pipeline = Arc::new(AsyncPipeline::new(
            &config.pipeline,
            processor.clone(),
            lookup,
            metrics.clone(),
        ));
        let fork_join = Arc::new(ForkJoinProcessor::new(
            &config.fork_join,
            processor.clone(),
            metrics.clone(),
        ));
        let load_tests = LoadTestHarness::new(
            config.load_test.clone(),
            repository.clone(),
            processor.clone(),
            pipeline.clone(),
            fork_join.clone(),
            metrics,
        );

        info!(
            "Harvest service ready: {} pipeline workers, fork-join parallelism {}",
            config.pipeline.worker_count, config.fork_join.parallelism
        );

        Ok(Self {
            config,
            repository,
            results,
            processor,
            pipeline,
            fork_join,
            load_tests,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn repository(&self) -> &Arc<CachedTargetRepository<InMemoryTargetRepository>> {
        &self.repository
    }

    pub fn results(&self) -> &Arc<InMemoryResultStore> {
        &self.results
    }

    pub fn pipeline(&self) -> &AsyncPipeline {
        &self.pipeline
    }

    pub fn fork_join(&self) -> &ForkJoinProcessor {
        &self.fork_join
    }

    pub fn load_tests(&self) -> &LoadTestHarness {
        &self.load_tests
    }

    /// Register addresses as targets, skipping invalid and already known ones.
    pub async fn add_urls(&self, urls: Vec<String>) -> Vec<Target> {
        let mut added = Vec::with_capacity(urls.len());

        for url in urls {
            if let Err(e) = validate_url(&url) {
                warn!("Skipping {}", e);
                continue;
            }

            let name = extract_domain(&url).unwrap_or_else(|| url.clone());
            match self.repository.save(Target::new(url, name)).await {
                Ok(target) => added.push(target),
                Err(HarvestError::DuplicateTarget(address)) => {
                    warn!("Skipping duplicate target {}", address);
                }
                Err(e) => e.log("Could not add target"),
            }
        }

        info!("Added {} targets", added.len());
        added
    }

    pub async fn target(&self, id: TargetId) -> Result<Option<Target>, HarvestError> {
        self.repository.find_by_id(id).await
    }

    pub async fn set_target_active(
        &self,
        id: TargetId,
        active: bool,
    ) -> Result<Target, HarvestError> {
        let target = self.repository.set_active(id, active).await?;
        info!("Target {} is now {}", id, if active { "active" } else { "inactive" });
        Ok(target)
    }

    pub async fn process_single(&self, target: &Target) -> ItemResult {
        self.processor.process(target).await
    }

    pub async fn process_active_async(&self) -> Result<PipelineReport, HarvestError> {
        let targets = self.repository.list_active().await?;
        Ok(self.pipeline.process_all(&targets).await)
    }

    pub async fn process_active_fork_join(&self) -> Result<ForkJoinReport, HarvestError> {
        let targets = self.repository.list_active().await?;
        Ok(self.fork_join.process(&targets).await)
    }

    /// Like [`Self::process_active_async`], reporting completions to `progress`.
    pub async fn process_active_async_tracked(
        &self,
        progress: Arc<ProgressTracker>,
    ) -> Result<PipelineReport, HarvestError> {
        let targets = self.repository.list_active().await?;
        Ok(self.pipeline.process_all_tracked(&targets, progress).await)
    }

    pub async fn process_active_fork_join_tracked(
        &self,
        progress: Arc<ProgressTracker>,
    ) -> Result<ForkJoinReport, HarvestError> {
        let targets = self.repository.list_active().await?;
        Ok(self.fork_join.process_tracked(&targets, progress).await)
    }

    pub fn get_stats(&self) -> ServiceStats {
        let (hits, misses) = self.repository.cache_stats();
        ServiceStats {
            registered_targets: self.repository.inner().len(),
            active_targets: self.repository.inner().count_active(),
            target_cache_hits: hits,
            target_cache_misses: misses,
            results: self.results.statistics(),
            pipeline_pool: self.pipeline.pool_stats(),
            fork_join_parallelism: self.fork_join.parallelism(),
            active_load_tests: self.load_tests.active_tests().active_count,
        }
    }

    /// Stop running load tests. Pool workers exit when the service is dropped.
    pub async fn shutdown(&self) {
        info!("Shutting down harvest service");
        let summary = self.load_tests.stop_all().await;
        if summary.stopped_count > 0 {
            info!("Stopped {} running load tests", summary.stopped_count);
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStats {
    pub registered_targets: usize,
    pub active_targets: usize,
    pub target_cache_hits: u64,
    pub target_cache_misses: u64,
    pub results: ResultStatistics,
    pub pipeline_pool: PoolStats,
    pub fork_join_parallelism: usize,
    pub active_load_tests: usize,
}
