//! Targets, fetch outcomes, per-item results and mergeable batch aggregates.

use crate::extractor::{ContactFindings, ContactKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::time::Duration;

pub type TargetId = u64;

/// A URL registered for harvesting.
///
/// `id` is 0 until a repository assigns one on first save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub id: TargetId,
    pub address: String,
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Target {
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: 0,
            address: address.into(),
            name: name.into(),
            description: None,
            active: true,
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_id(mut self, id: TargetId) -> Self {
        self.id = id;
        self
    }
}

/// Raw result of one retrieval.
///
/// `status` is `None` when no HTTP response arrived; `failure` then describes why.
/// `elapsed` is always measured, including for transport failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub status: Option<u16>,
    pub elapsed: Duration,
    pub body: Option<String>,
    pub failure: Option<String>,
}

impl FetchOutcome {
    /// Status code reported when no HTTP response was received.
    pub const TRANSPORT_FAILURE: i32 = -1;

    pub fn response(status: u16, elapsed: Duration, body: String) -> Self {
        Self {
            status: Some(status),
            elapsed,
            body: Some(body),
            failure: None,
        }
    }

    pub fn failure(elapsed: Duration, description: impl Into<String>) -> Self {
        Self {
            status: None,
            elapsed,
            body: None,
            failure: Some(description.into()),
        }
    }

    pub fn status_code(&self) -> i32 {
        self.status
            .map(i32::from)
            .unwrap_or(Self::TRANSPORT_FAILURE)
    }

    pub fn is_success(&self) -> bool {
        self.status == Some(200)
    }
}

/// Outcome of processing a single target.
///
/// `success` is true only for an HTTP 200. Failed items still carry the
/// measured response time and whatever findings the body produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemResult {
    pub target_id: TargetId,
    pub address: String,
    pub name: String,
    pub status_code: i32,
    pub response_time_ms: u64,
    pub success: bool,
    pub findings: ContactFindings,
    pub error: Option<String>,
    pub processed_at: DateTime<Utc>,
}

impl ItemResult {
    pub fn from_outcome(target: &Target, outcome: &FetchOutcome, findings: ContactFindings) -> Self {
        let success = outcome.is_success();
        let error = match (&outcome.failure, outcome.status) {
            (Some(failure), _) => Some(failure.clone()),
            (None, Some(status)) if !success => Some(format!("HTTP status {status}")),
            _ => None,
        };

        Self {
            target_id: target.id,
            address: target.address.clone(),
            name: target.name.clone(),
            status_code: outcome.status_code(),
            response_time_ms: millis(outcome.elapsed),
            success,
            findings,
            error,
            processed_at: Utc::now(),
        }
    }

    /// Error-shaped result for an item whose processing never produced an outcome.
    pub fn failed(target: &Target, message: impl Into<String>) -> Self {
        Self {
            target_id: target.id,
            address: target.address.clone(),
            name: target.name.clone(),
            status_code: FetchOutcome::TRANSPORT_FAILURE,
            response_time_ms: 0,
            success: false,
            findings: ContactFindings::default(),
            error: Some(message.into()),
            processed_at: Utc::now(),
        }
    }

    pub fn has(&self, kind: ContactKind) -> bool {
        self.findings.contains(kind)
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Counters summarising a set of processed items.
///
/// Aggregates combine with `+`, which is associative and commutative, so
/// batches can be merged in any grouping. A `*_found` counter counts items in
/// which that contact kind appeared, not individual matches. Response time is
/// summed over successful items only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchAggregate {
    pub processed_count: usize,
    pub success_count: usize,
    pub total_response_time_ms: u64,
    pub emails_found: usize,
    pub phones_found: usize,
    pub addresses_found: usize,
    pub working_hours_found: usize,
    pub batch_count: usize,
}

impl BatchAggregate {
    pub fn from_item(item: &ItemResult) -> Self {
        Self {
            processed_count: 1,
            success_count: usize::from(item.success),
            total_response_time_ms: if item.success { item.response_time_ms } else { 0 },
            emails_found: usize::from(item.has(ContactKind::Email)),
            phones_found: usize::from(item.has(ContactKind::Phone)),
            addresses_found: usize::from(item.has(ContactKind::Address)),
            working_hours_found: usize::from(item.has(ContactKind::WorkingHours)),
            batch_count: 0,
        }
    }

    /// Aggregate of one directly processed batch.
    pub fn from_batch<'a>(items: impl IntoIterator<Item = &'a ItemResult>) -> Self {
        let mut aggregate: Self = items.into_iter().map(Self::from_item).sum();
        aggregate.batch_count = 1;
        aggregate
    }

    pub fn failure_count(&self) -> usize {
        self.processed_count - self.success_count
    }

    /// Mean response time of successful items.
    pub fn average_response_time_ms(&self) -> Option<f64> {
        (self.success_count > 0)
            .then(|| self.total_response_time_ms as f64 / self.success_count as f64)
    }

    /// Share of processed items that succeeded, as a percentage.
    pub fn success_rate(&self) -> f64 {
        percentage(self.success_count, self.processed_count)
    }
}

impl Add for BatchAggregate {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            processed_count: self.processed_count + other.processed_count,
            success_count: self.success_count + other.success_count,
            total_response_time_ms: self.total_response_time_ms + other.total_response_time_ms,
            emails_found: self.emails_found + other.emails_found,
            phones_found: self.phones_found + other.phones_found,
            addresses_found: self.addresses_found + other.addresses_found,
            working_hours_found: self.working_hours_found + other.working_hours_found,
            batch_count: self.batch_count + other.batch_count,
        }
    }
}

impl AddAssign for BatchAggregate {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl Sum for BatchAggregate {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

pub(crate) fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

/// Round to two decimal places.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::ContactExtractor;

    fn item(address: &str, status: u16, elapsed_ms: u64, body: &str) -> ItemResult {
        let target = Target::new(address, address).with_id(1);
        let outcome =
            FetchOutcome::response(status, Duration::from_millis(elapsed_ms), body.to_string());
        let findings = ContactExtractor::default().extract(body);
        ItemResult::from_outcome(&target, &outcome, findings)
    }

    fn sample(processed: usize, success: usize, time: u64, emails: usize) -> BatchAggregate {
        BatchAggregate {
            processed_count: processed,
            success_count: success,
            total_response_time_ms: time,
            emails_found: emails,
            batch_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_transport_failure_status() {
        let outcome = FetchOutcome::failure(Duration::from_millis(40), "connection refused");
        assert_eq!(outcome.status_code(), -1);
        assert!(!outcome.is_success());

        let target = Target::new("http://127.0.0.1:1", "down");
        let result = ItemResult::from_outcome(&target, &outcome, ContactFindings::default());
        assert_eq!(result.status_code, -1);
        assert_eq!(result.response_time_ms, 40);
        assert_eq!(result.error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_non_200_is_failure_with_findings() {
        let result = item("https://example.com/404", 404, 12, "lost? write to help@example.com");
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("HTTP status 404"));
        assert!(result.has(ContactKind::Email));

        let aggregate = BatchAggregate::from_item(&result);
        assert_eq!(aggregate.emails_found, 1);
        assert_eq!(aggregate.total_response_time_ms, 0);
        assert_eq!(aggregate.failure_count(), 1);
    }

    #[test]
    fn test_merge_is_associative_and_commutative() {
        let a = sample(3, 2, 120, 1);
        let b = sample(2, 2, 80, 2);
        let c = sample(1, 0, 0, 0);

        assert_eq!((a + b) + c, a + (b + c));
        assert_eq!(a + b, b + a);
        assert_eq!(a + BatchAggregate::default(), a);
    }

    #[test]
    fn test_batch_aggregate_counts() {
        let items = vec![
            item("https://a.example", 200, 100, "a@a.io +7 (999) 123-45-67"),
            item("https://b.example", 200, 300, "nothing here"),
            item("https://c.example", 500, 50, "oops@c.io"),
        ];
        let aggregate = BatchAggregate::from_batch(&items);

        assert_eq!(aggregate.processed_count, 3);
        assert_eq!(aggregate.success_count, 2);
        assert_eq!(aggregate.total_response_time_ms, 400);
        assert_eq!(aggregate.emails_found, 2);
        assert_eq!(aggregate.phones_found, 1);
        assert_eq!(aggregate.batch_count, 1);
        assert_eq!(aggregate.average_response_time_ms(), Some(200.0));
    }

    #[test]
    fn test_empty_aggregate() {
        let aggregate = BatchAggregate::default();
        assert_eq!(aggregate.average_response_time_ms(), None);
        assert_eq!(aggregate.success_rate(), 0.0);
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(0.456), 0.46);
        assert_eq!(round2(0.7), 0.7);
    }
}
