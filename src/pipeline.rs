//! Staged asynchronous processing on a bounded worker pool.
//!
//! Every target becomes a chain of three stages: (a) fetch and extract,
//! (b) transform the item result into formatted fields and a data-quality
//! rating, (c) combine it with a side lookup of the target's history into an
//! overall score. The side lookup is submitted alongside stage (a) and runs
//! concurrently with stages (a) and (b).

use crate::config::PipelineSettings;
use crate::error::HarvestError;
use crate::extractor::ContactKind;
use crate::metrics::Metrics;
use crate::model::{round2, BatchAggregate, ItemResult, Target, TargetId};
use crate::processor::ItemProcessor;
use crate::repository::{ReliabilitySource, ResultHistory};
use crate::worker::{PoolStats, ProgressTracker, TaskHandle, WorkerPool};
use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PerformanceBucket {
    Fast,
    Medium,
    Slow,
}

impl PerformanceBucket {
    pub fn from_millis(response_time_ms: u64) -> Self {
        if response_time_ms > 5000 {
            PerformanceBucket::Slow
        } else if response_time_ms > 2000 {
            PerformanceBucket::Medium
        } else {
            PerformanceBucket::Fast
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataQuality {
    High,
    Medium,
    Low,
}

impl DataQuality {
    pub fn from_score(score: u32) -> Self {
        if score >= 8 {
            DataQuality::High
        } else if score >= 5 {
            DataQuality::Medium
        } else {
            DataQuality::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallRating {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl OverallRating {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            OverallRating::Excellent
        } else if score >= 0.6 {
            OverallRating::Good
        } else if score >= 0.4 {
            OverallRating::Fair
        } else {
            OverallRating::Poor
        }
    }
}

/// Output of stage (b).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformedResult {
    pub item: ItemResult,
    pub performance: PerformanceBucket,
    pub email_formatted: Option<String>,
    pub phone_formatted: Option<String>,
    pub data_quality_score: u32,
    pub data_quality: DataQuality,
}

/// History-derived context for one target.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SideLookup {
    pub previous_success_rate: Option<f64>,
    pub total_processings: usize,
    pub avg_historical_response_time_ms: Option<f64>,
    pub reliability: f64,
}

impl SideLookup {
    pub const DEFAULT_RELIABILITY: f64 = 0.5;
}

impl Default for SideLookup {
    fn default() -> Self {
        Self {
            previous_success_rate: None,
            total_processings: 0,
            avg_historical_response_time_ms: None,
            reliability: Self::DEFAULT_RELIABILITY,
        }
    }
}

/// Output of stage (c).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredResult {
    pub transformed: TransformedResult,
    pub lookup: SideLookup,
    pub performance_score: f64,
    pub overall_score: f64,
    pub overall_rating: OverallRating,
}

/// One pipeline chain's result: fully scored, or the error-shaped item a
/// failing stage was converted into.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum PipelineResult {
    Scored(Box<ScoredResult>),
    Failed(ItemResult),
}

impl PipelineResult {
    pub fn item(&self) -> &ItemResult {
        match self {
            PipelineResult::Scored(scored) => &scored.transformed.item,
            PipelineResult::Failed(item) => item,
        }
    }

    pub fn into_item(self) -> ItemResult {
        match self {
            PipelineResult::Scored(scored) => scored.transformed.item,
            PipelineResult::Failed(item) => item,
        }
    }

    pub fn scored(&self) -> Option<&ScoredResult> {
        match self {
            PipelineResult::Scored(scored) => Some(scored),
            PipelineResult::Failed(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    pub aggregate: BatchAggregate,
    pub results: Vec<PipelineResult>,
    pub elapsed_ms: u64,
    pub caller_runs: usize,
}

impl PipelineReport {
    fn empty() -> Self {
        Self {
            aggregate: BatchAggregate::default(),
            results: Vec::new(),
            elapsed_ms: 0,
            caller_runs: 0,
        }
    }
}

/// Stage (b): derive formatted fields and the data-quality rating.
pub fn transform(item: ItemResult) -> TransformedResult {
    let email_formatted = item
        .findings
        .get(ContactKind::Email)
        .map(|email| email.trim().to_lowercase());
    let phone_formatted = item
        .findings
        .get(ContactKind::Phone)
        .map(|phone| phone.split_whitespace().collect::<Vec<_>>().join(" "));

    let data_quality_score = [
        (ContactKind::Email, 3u32),
        (ContactKind::Phone, 3),
        (ContactKind::Address, 2),
        (ContactKind::WorkingHours, 2),
    ]
    .iter()
    .filter(|(kind, _)| item.has(*kind))
    .map(|(_, weight)| weight)
    .sum();

    TransformedResult {
        performance: PerformanceBucket::from_millis(item.response_time_ms),
        email_formatted,
        phone_formatted,
        data_quality_score,
        data_quality: DataQuality::from_score(data_quality_score),
        item,
    }
}

fn performance_score(response_time_ms: u64) -> f64 {
    match response_time_ms {
        0..=999 => 1.0,
        1000..=2999 => 0.7,
        3000..=4999 => 0.4,
        _ => 0.1,
    }
}

/// Stage (c): weigh data quality, reliability and latency into one score.
pub fn combine(transformed: TransformedResult, lookup: SideLookup) -> ScoredResult {
    let performance = performance_score(transformed.item.response_time_ms);
    let quality = f64::from(transformed.data_quality_score) / 10.0;
    let overall = quality * 0.4 + lookup.reliability * 0.4 + performance * 0.2;

    // rated on the unrounded value; only the reported score is rounded
    ScoredResult {
        transformed,
        lookup,
        performance_score: performance,
        overall_score: round2(overall),
        overall_rating: OverallRating::from_score(overall),
    }
}

/// Looks up a target's processing history after a fixed delay.
pub struct SideLookupService {
    history: Arc<dyn ResultHistory>,
    reliability: Arc<dyn ReliabilitySource>,
    delay: Duration,
}

impl SideLookupService {
    pub fn new(
        history: Arc<dyn ResultHistory>,
        reliability: Arc<dyn ReliabilitySource>,
        delay: Duration,
    ) -> Self {
        Self {
            history,
            reliability,
            delay,
        }
    }

    pub async fn lookup(&self, target_id: TargetId) -> SideLookup {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let records = match self.history.history(target_id).await {
            Ok(records) => records,
            Err(e) => {
                warn!("History lookup for target {} failed: {}", target_id, e);
                Vec::new()
            }
        };

        let total = records.len();
        let successes: Vec<u64> = records
            .iter()
            .filter(|r| r.status_code == 200)
            .map(|r| r.response_time_ms)
            .collect();

        SideLookup {
            previous_success_rate: (total > 0).then(|| successes.len() as f64 / total as f64),
            total_processings: total,
            avg_historical_response_time_ms: (!successes.is_empty())
                .then(|| successes.iter().sum::<u64>() as f64 / successes.len() as f64),
            reliability: self.reliability.reliability(target_id),
        }
    }
}

/// Runs every target through the staged chain on a bounded worker pool.
pub struct AsyncPipeline {
    pool: WorkerPool,
    processor: ItemProcessor,
    lookup: Arc<SideLookupService>,
    metrics: Arc<Metrics>,
}

impl AsyncPipeline {
    /// Starts the pool's workers, so this must run inside a Tokio runtime.
    pub fn new(
        settings: &PipelineSettings,
        processor: ItemProcessor,
        lookup: SideLookupService,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            pool: WorkerPool::new(settings.worker_count, settings.queue_capacity, metrics.clone()),
            processor,
            lookup: Arc::new(lookup),
            metrics,
        }
    }

    pub async fn process_all(&self, targets: &[Target]) -> PipelineReport {
        self.run(targets, None).await
    }

    pub async fn process_all_tracked(
        &self,
        targets: &[Target],
        progress: Arc<ProgressTracker>,
    ) -> PipelineReport {
        self.run(targets, Some(progress)).await
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.get_stats()
    }

    async fn run(&self, targets: &[Target], progress: Option<Arc<ProgressTracker>>) -> PipelineReport {
        if targets.is_empty() {
            return PipelineReport::empty();
        }

        info!("Starting async pipeline for {} targets", targets.len());
        let started = Instant::now();
        let caller_runs_before = self.pool.caller_runs();

        let mut chains = Vec::with_capacity(targets.len());
        for target in targets {
            let fetch = {
                let processor = self.processor.clone();
                let target = target.clone();
                self.pool.submit(async move { processor.process(&target).await }).await
            };
            let lookup = {
                let service = self.lookup.clone();
                let target_id = target.id;
                self.pool.submit(async move { service.lookup(target_id).await }).await
            };

            chains.push(self.chain(target.clone(), fetch, lookup, progress.clone()));
        }

        let results = join_all(chains).await;
        let aggregate = results
            .iter()
            .map(|r| BatchAggregate::from_item(r.item()))
            .sum::<BatchAggregate>();
        let elapsed = started.elapsed();

        info!(
            "Async pipeline finished in {:?}: {} processed, {} successful",
            elapsed, aggregate.processed_count, aggregate.success_count
        );

        PipelineReport {
            aggregate,
            results,
            elapsed_ms: crate::model::millis(elapsed),
            caller_runs: self.pool.caller_runs() - caller_runs_before,
        }
    }

    async fn chain(
        &self,
        target: Target,
        fetch: TaskHandle<ItemResult>,
        lookup: TaskHandle<SideLookup>,
        progress: Option<Arc<ProgressTracker>>,
    ) -> PipelineResult {
        let target_id = target.id;
        let stages = async move {
            let transformed = async move {
                let item = fetch.join().await.map_err(|e| HarvestError::StageFailed {
                    stage: "fetch",
                    message: e.to_string(),
                })?;
                Ok::<_, HarvestError>(transform(item))
            };
            let lookup = async move {
                lookup.join().await.unwrap_or_else(|e| {
                    warn!("Side lookup for target {} failed: {}", target_id, e);
                    SideLookup::default()
                })
            };

            let (transformed, lookup) = tokio::join!(transformed, lookup);
            Ok::<_, HarvestError>(combine(transformed?, lookup))
        };

        let result = match AssertUnwindSafe(stages).catch_unwind().await {
            Ok(Ok(scored)) => PipelineResult::Scored(Box::new(scored)),
            Ok(Err(e)) => {
                warn!("Pipeline failed for {}: {}", target.address, e);
                self.metrics.record_pipeline_failure();
                PipelineResult::Failed(ItemResult::failed(&target, e.to_string()))
            }
            Err(_) => {
                warn!("Pipeline stage panicked for {}", target.address);
                self.metrics.record_pipeline_failure();
                PipelineResult::Failed(ItemResult::failed(&target, "pipeline stage panicked"))
            }
        };

        if let Some(progress) = progress {
            progress.record_completion(result.item().success);
        }
        result
    }
}
