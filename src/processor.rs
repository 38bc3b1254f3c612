use crate::extractor::{ContactExtractor, ContactFindings};
use crate::fetcher::ContentFetcher;
use crate::metrics::Metrics;
use crate::model::{ItemResult, Target};
use crate::repository::{NotificationSink, ResultRecord, ResultSink};
use std::sync::Arc;
use tracing::{debug, warn};

/// Processes one target: fetch, extract, persist, notify.
///
/// Cloning is cheap; every collaborator is shared.
#[derive(Clone)]
pub struct ItemProcessor {
    fetcher: Arc<dyn ContentFetcher>,
    extractor: Arc<ContactExtractor>,
    sink: Arc<dyn ResultSink>,
    notifier: Option<Arc<dyn NotificationSink>>,
    metrics: Arc<Metrics>,
}

impl ItemProcessor {
    pub fn new(
        fetcher: Arc<dyn ContentFetcher>,
        extractor: Arc<ContactExtractor>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            sink,
            notifier: None,
            metrics: Arc::new(Metrics::noop()),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Never fails: transport errors and non-200 responses become failed results.
    ///
    /// Persistence runs on a detached task, so a slow or failing sink never
    /// delays or changes the returned result.
    pub async fn process(&self, target: &Target) -> ItemResult {
        debug!("Processing target {} ({})", target.id, target.address);

        let outcome = self.fetcher.fetch(&target.address).await;
        let findings = match (&outcome.failure, &outcome.body) {
            (None, Some(body)) => self.extractor.extract(body),
            _ => ContactFindings::default(),
        };

        let item = ItemResult::from_outcome(target, &outcome, findings);
        self.metrics.record_item(outcome.elapsed, item.success);

        if let Some(error) = &item.error {
            debug!("Target {} failed: {}", target.address, error);
        }

        self.persist(&item);
        if let Some(notifier) = &self.notifier {
            notifier.publish(target.id, &item);
        }

        item
    }

    fn persist(&self, item: &ItemResult) {
        let sink = self.sink.clone();
        let record = ResultRecord::from(item);

        tokio::spawn(async move {
            let target_id = record.target_id;
            if let Err(e) = sink.record(record).await {
                warn!("Failed to record result for target {}: {}", target_id, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarvestError;
    use crate::extractor::ContactKind;
    use crate::fetcher::StaticContentFetcher;
    use crate::repository::{InMemoryResultStore, MockNotificationSink, ResultHistory};
    use async_trait::async_trait;
    use std::time::Duration;

    struct FailingSink;

    #[async_trait]
    impl ResultSink for FailingSink {
        async fn record(&self, _record: ResultRecord) -> Result<(), HarvestError> {
            Err(HarvestError::Sink("disk full".to_string()))
        }
    }

    fn target() -> Target {
        Target::new("https://company.example", "Company").with_id(7)
    }

    #[tokio::test]
    async fn test_process_extracts_and_records() {
        let store = Arc::new(InMemoryResultStore::new());
        let processor = ItemProcessor::new(
            Arc::new(StaticContentFetcher::sample()),
            Arc::new(ContactExtractor::default()),
            store.clone(),
        );

        let item = processor.process(&target()).await;
        assert!(item.success);
        assert_eq!(item.status_code, 200);
        assert_eq!(item.findings.get(ContactKind::Email), Some("test@example.com"));

        // Recording is detached; give it a moment.
        for _ in 0..50 {
            if !store.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let history = store.history(7).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status_code, 200);
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_change_result() {
        let processor = ItemProcessor::new(
            Arc::new(StaticContentFetcher::sample()),
            Arc::new(ContactExtractor::default()),
            Arc::new(FailingSink),
        );

        let item = processor.process(&target()).await;
        assert!(item.success);
        assert!(item.error.is_none());
    }

    #[tokio::test]
    async fn test_notifier_receives_snapshot() {
        let mut notifier = MockNotificationSink::new();
        notifier
            .expect_publish()
            .withf(|id, item| *id == 7 && item.findings.total_contacts() == 3)
            .times(1)
            .return_const(());

        let processor = ItemProcessor::new(
            Arc::new(StaticContentFetcher::sample()),
            Arc::new(ContactExtractor::default()),
            Arc::new(InMemoryResultStore::new()),
        )
        .with_notifier(Arc::new(notifier));

        processor.process(&target()).await;
    }

    #[tokio::test]
    async fn test_non_200_still_extracts() {
        let processor = ItemProcessor::new(
            Arc::new(StaticContentFetcher::new(404, "gone, try support@example.com")),
            Arc::new(ContactExtractor::default()),
            Arc::new(InMemoryResultStore::new()),
        );

        let item = processor.process(&target()).await;
        assert!(!item.success);
        assert_eq!(item.status_code, 404);
        assert!(item.has(ContactKind::Email));
    }
}
