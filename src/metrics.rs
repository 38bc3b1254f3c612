use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics::{Counter, Gauge, Histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

use crate::error::HarvestError;

/// Handles for every metric the harvester emits.
///
/// Handles are resolved against the global recorder when the struct is built,
/// so install an exporter first. Without one every handle is a no-op.
pub struct Metrics {
    pub items_processed: Counter,
    pub items_failed: Counter,
    pub fetch_duration: Histogram,
    pub caller_runs: Counter,
    pub queue_depth: Gauge,
    pub fork_join_leaves: Counter,
    pub pipeline_failures: Counter,
    pub load_test_requests: Counter,
    pub load_test_errors: Counter,
    pub active_load_tests: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            items_processed: counter!("harvester_items_processed_total"),
            items_failed: counter!("harvester_items_failed_total"),
            fetch_duration: histogram!("harvester_fetch_duration_seconds"),
            caller_runs: counter!("harvester_pool_caller_runs_total"),
            queue_depth: gauge!("harvester_pool_queue_depth"),
            fork_join_leaves: counter!("harvester_fork_join_leaves_total"),
            pipeline_failures: counter!("harvester_pipeline_failures_total"),
            load_test_requests: counter!("harvester_load_test_requests_total"),
            load_test_errors: counter!("harvester_load_test_errors_total"),
            active_load_tests: gauge!("harvester_active_load_tests"),
        }
    }

    pub fn noop() -> Self {
        Self {
            items_processed: Counter::noop(),
            items_failed: Counter::noop(),
            fetch_duration: Histogram::noop(),
            caller_runs: Counter::noop(),
            queue_depth: Gauge::noop(),
            fork_join_leaves: Counter::noop(),
            pipeline_failures: Counter::noop(),
            load_test_requests: Counter::noop(),
            load_test_errors: Counter::noop(),
            active_load_tests: Gauge::noop(),
        }
    }

    pub fn record_item(&self, duration: Duration, success: bool) {
        if success {
            self.items_processed.increment(1);
        } else {
            self.items_failed.increment(1);
        }

        self.fetch_duration.record(duration.as_secs_f64());
    }

    pub fn record_caller_run(&self) {
        self.caller_runs.increment(1);
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth as f64);
    }

    pub fn record_leaf(&self) {
        self.fork_join_leaves.increment(1);
    }

    pub fn record_pipeline_failure(&self) {
        self.pipeline_failures.increment(1);
    }

    pub fn record_load_test_request(&self, success: bool) {
        self.load_test_requests.increment(1);
        if !success {
            self.load_test_errors.increment(1);
        }
    }

    pub fn set_active_tests(&self, count: usize) {
        self.active_load_tests.set(count as f64);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serves the global recorder's metrics in Prometheus text format.
pub struct PrometheusExporter {
    port: u16,
}

impl PrometheusExporter {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    /// Install the global recorder and start the scrape listener.
    ///
    /// Must be called from within a Tokio runtime and before [`Metrics::new`].
    pub fn start(&self) -> Result<(), HarvestError> {
        let address = SocketAddr::from(([0, 0, 0, 0], self.port));

        PrometheusBuilder::new()
            .with_http_listener(address)
            .install()
            .map_err(|e| HarvestError::Configuration(format!("metrics exporter: {e}")))?;

        describe_metrics();
        info!("Prometheus metrics available on http://{}/metrics", address);
        Ok(())
    }
}

fn describe_metrics() {
    describe_counter!("harvester_items_processed_total", "Items fetched with HTTP 200");
    describe_counter!("harvester_items_failed_total", "Items that failed or returned non-200");
    describe_histogram!("harvester_fetch_duration_seconds", "Time spent retrieving one item");
    describe_counter!(
        "harvester_pool_caller_runs_total",
        "Jobs run by the submitter because the pipeline queue was full"
    );
    describe_gauge!("harvester_pool_queue_depth", "Jobs waiting in the pipeline queue");
    describe_counter!("harvester_fork_join_leaves_total", "Batches processed directly by the splitter");
    describe_counter!(
        "harvester_pipeline_failures_total",
        "Pipeline chains converted into error results"
    );
    describe_counter!("harvester_load_test_requests_total", "Requests issued by load-test workers");
    describe_counter!("harvester_load_test_errors_total", "Load-test requests that did not succeed");
    describe_gauge!("harvester_active_load_tests", "Load tests currently registered");
}
