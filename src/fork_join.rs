//! Recursive divide-and-conquer batch processing.
//!
//! A range larger than the batch threshold is bisected at `start + len / 2`.
//! The left half is forked onto its own task while the current task computes
//! the right half, then the left is joined and the two aggregates merged.
//! Leaves hold a permit from a semaphore sized to the configured parallelism,
//! which keeps this work bounded independently of the async pipeline's pool.

use crate::config::ForkJoinSettings;
use crate::metrics::Metrics;
use crate::model::{percentage, BatchAggregate, ItemResult, Target};
use crate::processor::ItemProcessor;
use crate::worker::ProgressTracker;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

pub const PROCESSING_TYPE: &str = "FORK_JOIN_RECURSIVE";

/// Aggregate plus the per-item results of a range, in input order.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub aggregate: BatchAggregate,
    pub results: Vec<ItemResult>,
}

impl BatchOutcome {
    fn leaf(results: Vec<ItemResult>) -> Self {
        Self {
            aggregate: BatchAggregate::from_batch(&results),
            results,
        }
    }

    /// Combine two adjacent ranges, keeping left-then-right order.
    pub fn merge(mut self, right: BatchOutcome) -> Self {
        self.aggregate += right.aggregate;
        self.results.extend(right.results);
        self
    }
}

/// Figures derived from the merged aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedStats {
    pub total_urls_processed: usize,
    pub successful_urls: usize,
    pub success_rate: f64,
    pub average_response_time_ms: Option<f64>,
    pub total_emails_found: usize,
    pub total_phones_found: usize,
    pub total_addresses_found: usize,
    pub email_extraction_rate: f64,
    pub phone_extraction_rate: f64,
    pub total_batches_processed: usize,
    pub parallelism: usize,
}

impl AggregatedStats {
    pub fn from_aggregate(aggregate: &BatchAggregate, parallelism: usize) -> Self {
        Self {
            total_urls_processed: aggregate.processed_count,
            successful_urls: aggregate.success_count,
            success_rate: aggregate.success_rate(),
            average_response_time_ms: aggregate.average_response_time_ms(),
            total_emails_found: aggregate.emails_found,
            total_phones_found: aggregate.phones_found,
            total_addresses_found: aggregate.addresses_found,
            email_extraction_rate: percentage(aggregate.emails_found, aggregate.processed_count),
            phone_extraction_rate: percentage(aggregate.phones_found, aggregate.processed_count),
            total_batches_processed: aggregate.batch_count,
            parallelism,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkJoinReport {
    pub outcome: BatchOutcome,
    pub stats: AggregatedStats,
    pub processing_type: &'static str,
    pub completed_at: DateTime<Utc>,
}

struct SplitContext {
    processor: ItemProcessor,
    permits: Arc<Semaphore>,
    batch_threshold: usize,
    metrics: Arc<Metrics>,
    progress: Option<Arc<ProgressTracker>>,
}

impl SplitContext {
    async fn process_leaf(&self, targets: &[Target]) -> BatchOutcome {
        // The semaphore is never closed, so acquisition only fails if it were.
        let _permit = self.permits.acquire().await.ok();
        debug!("Processing leaf batch of {} targets", targets.len());

        let mut results = Vec::with_capacity(targets.len());
        for target in targets {
            let item = match AssertUnwindSafe(self.processor.process(target))
                .catch_unwind()
                .await
            {
                Ok(item) => item,
                Err(_) => {
                    warn!("Processing panicked for {}", target.address);
                    ItemResult::failed(target, "processing panicked")
                }
            };

            if let Some(progress) = &self.progress {
                progress.record_completion(item.success);
            }
            results.push(item);
        }

        self.metrics.record_leaf();
        BatchOutcome::leaf(results)
    }
}

/// Leaf permits are shared by every call on the same processor, so concurrent
/// callers together never run more than `parallelism` leaves at once.
pub struct ForkJoinProcessor {
    processor: ItemProcessor,
    permits: Arc<Semaphore>,
    parallelism: usize,
    batch_threshold: usize,
    metrics: Arc<Metrics>,
}

impl ForkJoinProcessor {
    pub fn new(settings: &ForkJoinSettings, processor: ItemProcessor, metrics: Arc<Metrics>) -> Self {
        let parallelism = settings.parallelism.max(1);
        Self {
            processor,
            permits: Arc::new(Semaphore::new(parallelism)),
            parallelism,
            batch_threshold: settings.batch_threshold.max(1),
            metrics,
        }
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub async fn process(&self, targets: &[Target]) -> ForkJoinReport {
        self.run(targets, None).await
    }

    pub async fn process_tracked(
        &self,
        targets: &[Target],
        progress: Arc<ProgressTracker>,
    ) -> ForkJoinReport {
        self.run(targets, Some(progress)).await
    }

    async fn run(&self, targets: &[Target], progress: Option<Arc<ProgressTracker>>) -> ForkJoinReport {
        let outcome = if targets.is_empty() {
            BatchOutcome::default()
        } else {
            info!(
                "Starting fork-join processing for {} targets (parallelism {}, threshold {})",
                targets.len(),
                self.parallelism,
                self.batch_threshold
            );

            let context = Arc::new(SplitContext {
                processor: self.processor.clone(),
                permits: self.permits.clone(),
                batch_threshold: self.batch_threshold,
                metrics: self.metrics.clone(),
                progress,
            });
            let targets: Arc<[Target]> = targets.into();
            let len = targets.len();
            split(context, targets, 0, len).await
        };

        let stats = AggregatedStats::from_aggregate(&outcome.aggregate, self.parallelism);
        info!(
            "Fork-join processing finished: {} processed in {} batches, {} successful",
            stats.total_urls_processed, stats.total_batches_processed, stats.successful_urls
        );

        ForkJoinReport {
            outcome,
            stats,
            processing_type: PROCESSING_TYPE,
            completed_at: Utc::now(),
        }
    }
}

fn split(
    context: Arc<SplitContext>,
    targets: Arc<[Target]>,
    start: usize,
    end: usize,
) -> BoxFuture<'static, BatchOutcome> {
    async move {
        let len = end - start;
        if len <= context.batch_threshold {
            return context.process_leaf(&targets[start..end]).await;
        }

        let middle = start + len / 2;
        let left = tokio::spawn(split(context.clone(), targets.clone(), start, middle));
        let right = split(context.clone(), targets.clone(), middle, end).await;

        let left = match left.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Forked batch {}..{} did not complete: {}", start, middle, e);
                let results = targets[start..middle]
                    .iter()
                    .map(|t| ItemResult::failed(t, "forked batch did not complete"))
                    .collect();
                BatchOutcome::leaf(results)
            }
        };

        left.merge(right)
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::ContactExtractor;
    use crate::fetcher::{ContentFetcher, StaticContentFetcher};
    use crate::model::FetchOutcome;
    use crate::repository::InMemoryResultStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Tracks the highest number of fetches in flight at once.
    #[derive(Default)]
    struct PeakTrackingFetcher {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ContentFetcher for PeakTrackingFetcher {
        async fn fetch(&self, _address: &str) -> FetchOutcome {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            FetchOutcome::response(
                200,
                Duration::from_millis(10),
                StaticContentFetcher::SAMPLE_PAGE.to_string(),
            )
        }
    }

    fn targets(count: usize) -> Vec<Target> {
        (0..count)
            .map(|i| Target::new(format!("https://site{i}.example"), format!("Site {i}")).with_id(i as u64 + 1))
            .collect()
    }

    fn processor() -> ForkJoinProcessor {
        fork_join(3)
    }

    fn fork_join(batch_threshold: usize) -> ForkJoinProcessor {
        let item_processor = ItemProcessor::new(
            Arc::new(StaticContentFetcher::sample()),
            Arc::new(ContactExtractor::default()),
            Arc::new(InMemoryResultStore::new()),
        );
        ForkJoinProcessor::new(
            &ForkJoinSettings {
                parallelism: 4,
                batch_threshold,
            },
            item_processor,
            Arc::new(Metrics::noop()),
        )
    }

    #[tokio::test]
    async fn test_empty_input() {
        let report = processor().process(&[]).await;
        assert_eq!(report.outcome.aggregate, BatchAggregate::default());
        assert!(report.outcome.results.is_empty());
        assert_eq!(report.stats.total_batches_processed, 0);
        assert_eq!(report.processing_type, PROCESSING_TYPE);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_every_item_processed_once() {
        for count in [1, 2, 3, 4, 7, 10, 33] {
            let report = processor().process(&targets(count)).await;
            assert_eq!(report.outcome.aggregate.processed_count, count);
            assert_eq!(report.outcome.results.len(), count);
            assert_eq!(report.stats.successful_urls, count);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_results_keep_input_order() {
        let input = targets(17);
        let report = fork_join(2).process(&input).await;

        let addresses: Vec<&str> = report.outcome.results.iter().map(|r| r.address.as_str()).collect();
        let expected: Vec<&str> = input.iter().map(|t| t.address.as_str()).collect();
        assert_eq!(addresses, expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_leaf_count_follows_bisection() {
        // 10 -> 5 + 5 -> (2 + 3) + (2 + 3)
        let report = processor().process(&targets(10)).await;
        assert_eq!(report.stats.total_batches_processed, 4);

        // a single range at or under the threshold is one leaf
        let report = processor().process(&targets(3)).await;
        assert_eq!(report.stats.total_batches_processed, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_enrichment_rates() {
        let report = processor().process(&targets(6)).await;
        let stats = &report.stats;

        assert_eq!(stats.success_rate, 100.0);
        assert_eq!(stats.total_emails_found, 6);
        assert_eq!(stats.total_phones_found, 6);
        assert_eq!(stats.total_addresses_found, 6);
        assert_eq!(stats.email_extraction_rate, 100.0);
        assert_eq!(stats.parallelism, 4);
        assert!(stats.average_response_time_ms.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallelism_bounds_concurrent_callers() {
        let fetcher = Arc::new(PeakTrackingFetcher::default());
        let item_processor = ItemProcessor::new(
            fetcher.clone(),
            Arc::new(ContactExtractor::default()),
            Arc::new(InMemoryResultStore::new()),
        );
        let fork_join = Arc::new(ForkJoinProcessor::new(
            &ForkJoinSettings {
                parallelism: 1,
                batch_threshold: 1,
            },
            item_processor,
            Arc::new(Metrics::noop()),
        ));

        let calls = (0..4).map(|_| {
            let fork_join = fork_join.clone();
            tokio::spawn(async move { fork_join.process(&targets(4)).await })
        });
        for report in futures::future::join_all(calls).await {
            assert_eq!(report.unwrap().stats.successful_urls, 4);
        }

        assert_eq!(fetcher.peak.load(Ordering::SeqCst), 1);
    }
}
