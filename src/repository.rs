//! Collaborator interfaces for the processing core and their in-memory implementations.
//!
//! The processor and load-test harness only see the traits defined here:
//! [`TargetRepository`] for the target list, [`ResultSink`] and [`ResultHistory`]
//! for persisted outcomes, [`NotificationSink`] for fire-and-forget publication
//! and [`ReliabilitySource`] for the side lookup's reliability figure.

use crate::error::HarvestError;
use crate::extractor::{ContactFindings, ContactKind};
use crate::model::{percentage, ItemResult, Target, TargetId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::Rng;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info};

/// Source of harvest targets.
///
/// Implementations provide atomic single-record writes; no multi-record
/// transactions are assumed.
#[async_trait]
pub trait TargetRepository: Send + Sync {
    /// Active targets, newest first.
    async fn list_active(&self) -> Result<Vec<Target>, HarvestError>;

    async fn exists(&self, address: &str) -> Result<bool, HarvestError>;

    /// Insert a target with id 0, or update an existing one.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::DuplicateTarget`] when inserting an address that
    /// is already registered, and [`HarvestError::NotFound`] when updating an
    /// unknown id.
    async fn save(&self, target: Target) -> Result<Target, HarvestError>;

    async fn find_by_id(&self, id: TargetId) -> Result<Option<Target>, HarvestError>;

    /// Every target regardless of state, newest first.
    async fn find_all(&self) -> Result<Vec<Target>, HarvestError>;

    /// Remove a target. Returns whether it existed.
    async fn delete(&self, id: TargetId) -> Result<bool, HarvestError>;

    /// Switch a stored target on or off.
    async fn set_active(&self, id: TargetId, active: bool) -> Result<Target, HarvestError> {
        let mut target = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| HarvestError::NotFound(format!("target {id}")))?;
        target.active = active;
        self.save(target).await
    }
}

/// One persisted processing outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    pub target_id: TargetId,
    pub address: String,
    pub status_code: i32,
    pub response_time_ms: u64,
    pub success: bool,
    pub findings: ContactFindings,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl From<&ItemResult> for ResultRecord {
    fn from(item: &ItemResult) -> Self {
        Self {
            target_id: item.target_id,
            address: item.address.clone(),
            status_code: item.status_code,
            response_time_ms: item.response_time_ms,
            success: item.success,
            findings: item.findings.clone(),
            error: item.error.clone(),
            recorded_at: item.processed_at,
        }
    }
}

#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn record(&self, record: ResultRecord) -> Result<(), HarvestError>;
}

#[async_trait]
pub trait ResultHistory: Send + Sync {
    /// Records for `target_id`, newest first.
    async fn history(&self, target_id: TargetId) -> Result<Vec<ResultRecord>, HarvestError>;
}

/// Fire-and-forget publication of a processed item.
#[cfg_attr(test, mockall::automock)]
pub trait NotificationSink: Send + Sync {
    fn publish(&self, target_id: TargetId, snapshot: &ItemResult);
}

/// Reliability figure in `[0, 1]` used by the pipeline's scoring stage.
#[cfg_attr(test, mockall::automock)]
pub trait ReliabilitySource: Send + Sync {
    fn reliability(&self, target_id: TargetId) -> f64;
}

/// Uniform random reliability in `[0.3, 1.0)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticReliability;

impl ReliabilitySource for SyntheticReliability {
    fn reliability(&self, _target_id: TargetId) -> f64 {
        rand::rng().random_range(0.3..1.0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedReliability(pub f64);

impl ReliabilitySource for FixedReliability {
    fn reliability(&self, _target_id: TargetId) -> f64 {
        self.0
    }
}

/// Logs a one-line summary of every published item.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

impl NotificationSink for LoggingNotifier {
    fn publish(&self, target_id: TargetId, snapshot: &ItemResult) {
        info!(
            "Contacts for target {} ({}): status={} contacts={} score={} email={} phone={}",
            target_id,
            snapshot.address,
            snapshot.status_code,
            snapshot.findings.total_contacts(),
            snapshot.findings.quality_score(),
            snapshot.findings.get(ContactKind::Email).unwrap_or("-"),
            snapshot.findings.get(ContactKind::Phone).unwrap_or("-"),
        );
    }
}

fn newest_first(targets: &mut [Target]) {
    targets.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

/// Concurrent in-memory target store.
#[derive(Debug)]
pub struct InMemoryTargetRepository {
    targets: DashMap<TargetId, Target>,
    addresses: DashMap<String, TargetId>,
    next_id: AtomicU64,
}

impl Default for InMemoryTargetRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTargetRepository {
    pub fn new() -> Self {
        Self {
            targets: DashMap::new(),
            addresses: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn count_active(&self) -> usize {
        self.targets.iter().filter(|t| t.active).count()
    }

    fn insert(&self, mut target: Target) -> Result<Target, HarvestError> {
        match self.addresses.entry(target.address.clone()) {
            Entry::Occupied(_) => Err(HarvestError::DuplicateTarget(target.address)),
            Entry::Vacant(slot) => {
                target.id = self.next_id.fetch_add(1, Ordering::Relaxed);
                slot.insert(target.id);
                self.targets.insert(target.id, target.clone());
                Ok(target)
            }
        }
    }

    // Address bookkeeping happens before the targets map is touched and no
    // guard on one map is held while locking the other.
    fn update(&self, target: Target) -> Result<Target, HarvestError> {
        let previous_address = self
            .targets
            .get(&target.id)
            .map(|t| t.address.clone())
            .ok_or_else(|| HarvestError::NotFound(format!("target {}", target.id)))?;

        let renamed = previous_address != target.address;
        if renamed {
            match self.addresses.entry(target.address.clone()) {
                Entry::Occupied(_) => return Err(HarvestError::DuplicateTarget(target.address)),
                Entry::Vacant(slot) => {
                    slot.insert(target.id);
                }
            }
            self.addresses.remove(&previous_address);
        }

        match self.targets.get_mut(&target.id) {
            Some(mut existing) => {
                *existing = target.clone();
                Ok(target)
            }
            None => {
                // deleted concurrently
                if renamed {
                    self.addresses.remove(&target.address);
                }
                Err(HarvestError::NotFound(format!("target {}", target.id)))
            }
        }
    }
}

#[async_trait]
impl TargetRepository for InMemoryTargetRepository {
    async fn list_active(&self) -> Result<Vec<Target>, HarvestError> {
        let mut active: Vec<Target> = self
            .targets
            .iter()
            .filter(|t| t.active)
            .map(|t| t.value().clone())
            .collect();
        newest_first(&mut active);
        Ok(active)
    }

    async fn exists(&self, address: &str) -> Result<bool, HarvestError> {
        Ok(self.addresses.contains_key(address))
    }

    async fn save(&self, target: Target) -> Result<Target, HarvestError> {
        if target.id == 0 {
            self.insert(target)
        } else {
            self.update(target)
        }
    }

    async fn find_by_id(&self, id: TargetId) -> Result<Option<Target>, HarvestError> {
        Ok(self.targets.get(&id).map(|t| t.value().clone()))
    }

    async fn find_all(&self) -> Result<Vec<Target>, HarvestError> {
        let mut all: Vec<Target> = self.targets.iter().map(|t| t.value().clone()).collect();
        newest_first(&mut all);
        Ok(all)
    }

    async fn delete(&self, id: TargetId) -> Result<bool, HarvestError> {
        match self.targets.remove(&id) {
            Some((_, target)) => {
                self.addresses.remove(&target.address);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Read-through cache over another repository.
///
/// `find_by_id` and `find_all` are served from memory after the first read;
/// any save or delete evicts the touched entry and the cached full list.
/// A read that overlapped a write does not fill the cache.
pub struct CachedTargetRepository<R> {
    inner: R,
    by_id: DashMap<TargetId, Option<Target>>,
    all: RwLock<Option<Vec<Target>>>,
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<R: TargetRepository> CachedTargetRepository<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            by_id: DashMap::new(),
            all: RwLock::new(None),
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// `(hits, misses)` since creation.
    pub fn cache_stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    // The generation is bumped before removal; fills compare it while holding
    // the same lock the removal takes.
    fn evict(&self, id: TargetId) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.by_id.remove(&id);
        *self.all.write().unwrap_or_else(PoisonError::into_inner) = None;
        debug!("Evicted cached target {}", id);
    }
}

#[async_trait]
impl<R: TargetRepository> TargetRepository for CachedTargetRepository<R> {
    async fn list_active(&self) -> Result<Vec<Target>, HarvestError> {
        self.inner.list_active().await
    }

    async fn exists(&self, address: &str) -> Result<bool, HarvestError> {
        self.inner.exists(address).await
    }

    async fn save(&self, target: Target) -> Result<Target, HarvestError> {
        let saved = self.inner.save(target).await?;
        self.evict(saved.id);
        Ok(saved)
    }

    async fn find_by_id(&self, id: TargetId) -> Result<Option<Target>, HarvestError> {
        if let Some(cached) = self.by_id.get(&id) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(cached.value().clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let generation = self.generation.load(Ordering::SeqCst);
        let found = self.inner.find_by_id(id).await?;
        if let Entry::Vacant(slot) = self.by_id.entry(id) {
            if self.generation.load(Ordering::SeqCst) == generation {
                slot.insert(found.clone());
            }
        }
        Ok(found)
    }

    async fn find_all(&self) -> Result<Vec<Target>, HarvestError> {
        let cached = self
            .all
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(all) = cached {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(all);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let generation = self.generation.load(Ordering::SeqCst);
        let all = self.inner.find_all().await?;
        let mut cached = self.all.write().unwrap_or_else(PoisonError::into_inner);
        if self.generation.load(Ordering::SeqCst) == generation {
            *cached = Some(all.clone());
        }
        Ok(all)
    }

    async fn delete(&self, id: TargetId) -> Result<bool, HarvestError> {
        let deleted = self.inner.delete(id).await?;
        self.evict(id);
        Ok(deleted)
    }
}

/// Aggregate view over every stored result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultStatistics {
    pub total_results: usize,
    pub successful_results: usize,
    pub success_rate: f64,
    pub average_response_time_ms: Option<f64>,
}

/// Concurrent in-memory result store, usable as both sink and history.
#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    records: DashMap<TargetId, Vec<ResultRecord>>,
    total: AtomicUsize,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn statistics(&self) -> ResultStatistics {
        let mut total_results = 0;
        let mut successful_results = 0;
        let mut success_time_ms = 0u64;

        for entry in self.records.iter() {
            for record in entry.value() {
                total_results += 1;
                if record.success {
                    successful_results += 1;
                    success_time_ms += record.response_time_ms;
                }
            }
        }

        ResultStatistics {
            total_results,
            successful_results,
            success_rate: percentage(successful_results, total_results),
            average_response_time_ms: (successful_results > 0)
                .then(|| success_time_ms as f64 / successful_results as f64),
        }
    }
}

#[async_trait]
impl ResultSink for InMemoryResultStore {
    async fn record(&self, record: ResultRecord) -> Result<(), HarvestError> {
        self.records.entry(record.target_id).or_default().push(record);
        self.total.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl ResultHistory for InMemoryResultStore {
    async fn history(&self, target_id: TargetId) -> Result<Vec<ResultRecord>, HarvestError> {
        let mut records = self
            .records
            .get(&target_id)
            .map(|r| r.value().clone())
            .unwrap_or_default();
        records.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Pauses the next `find_by_id` after reading, until released.
    #[derive(Default)]
    struct GatedRepository {
        inner: InMemoryTargetRepository,
        armed: AtomicBool,
        reached: Notify,
        release: Notify,
    }

    #[async_trait]
    impl TargetRepository for GatedRepository {
        async fn list_active(&self) -> Result<Vec<Target>, HarvestError> {
            self.inner.list_active().await
        }

        async fn exists(&self, address: &str) -> Result<bool, HarvestError> {
            self.inner.exists(address).await
        }

        async fn save(&self, target: Target) -> Result<Target, HarvestError> {
            self.inner.save(target).await
        }

        async fn find_by_id(&self, id: TargetId) -> Result<Option<Target>, HarvestError> {
            let found = self.inner.find_by_id(id).await?;
            if self.armed.swap(false, Ordering::SeqCst) {
                self.reached.notify_one();
                self.release.notified().await;
            }
            Ok(found)
        }

        async fn find_all(&self) -> Result<Vec<Target>, HarvestError> {
            self.inner.find_all().await
        }

        async fn delete(&self, id: TargetId) -> Result<bool, HarvestError> {
            self.inner.delete(id).await
        }
    }

    fn record(target_id: TargetId, status: i32, ms: u64) -> ResultRecord {
        ResultRecord {
            target_id,
            address: format!("https://t{target_id}.example"),
            status_code: status,
            response_time_ms: ms,
            success: status == 200,
            findings: ContactFindings::default(),
            error: None,
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_save_assigns_ids_and_rejects_duplicates() {
        let repo = InMemoryTargetRepository::new();
        let first = repo.save(Target::new("https://a.example", "A")).await.unwrap();
        let second = repo.save(Target::new("https://b.example", "B")).await.unwrap();

        assert_ne!(first.id, 0);
        assert_ne!(first.id, second.id);
        assert!(repo.exists("https://a.example").await.unwrap());

        let duplicate = repo.save(Target::new("https://a.example", "A again")).await;
        assert!(matches!(duplicate, Err(HarvestError::DuplicateTarget(_))));
        assert_eq!(repo.len(), 2);
    }

    #[tokio::test]
    async fn test_list_active_newest_first() {
        let repo = InMemoryTargetRepository::new();
        let now = Utc::now();

        let mut old = Target::new("https://old.example", "old");
        old.created_at = now - ChronoDuration::hours(2);
        let mut new = Target::new("https://new.example", "new");
        new.created_at = now;
        let mut inactive = Target::new("https://off.example", "off");
        inactive.active = false;

        repo.save(old).await.unwrap();
        repo.save(new).await.unwrap();
        repo.save(inactive).await.unwrap();

        let active = repo.list_active().await.unwrap();
        let names: Vec<&str> = active.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["new", "old"]);
        assert_eq!(repo.count_active(), 2);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let repo = InMemoryTargetRepository::new();
        let mut saved = repo.save(Target::new("https://a.example", "A")).await.unwrap();

        saved.active = false;
        repo.save(saved.clone()).await.unwrap();
        assert!(repo.list_active().await.unwrap().is_empty());

        let reactivated = repo.set_active(saved.id, true).await.unwrap();
        assert!(reactivated.active);
        assert_eq!(repo.count_active(), 1);
        assert!(matches!(
            repo.set_active(999, false).await,
            Err(HarvestError::NotFound(_))
        ));

        assert!(repo.delete(saved.id).await.unwrap());
        assert!(!repo.exists("https://a.example").await.unwrap());
        assert!(!repo.delete(saved.id).await.unwrap());

        let missing = repo.save(Target::new("https://z.example", "Z").with_id(999)).await;
        assert!(matches!(missing, Err(HarvestError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_cache_serves_reads_and_evicts_on_write() {
        let repo = CachedTargetRepository::new(InMemoryTargetRepository::new());
        let saved = repo.save(Target::new("https://a.example", "A")).await.unwrap();

        assert_eq!(repo.find_by_id(saved.id).await.unwrap().unwrap().name, "A");
        assert_eq!(repo.find_by_id(saved.id).await.unwrap().unwrap().name, "A");
        assert_eq!(repo.find_all().await.unwrap().len(), 1);
        assert_eq!(repo.find_all().await.unwrap().len(), 1);
        assert_eq!(repo.cache_stats(), (2, 2));

        let mut renamed = saved.clone();
        renamed.name = "A2".to_string();
        repo.save(renamed).await.unwrap();

        assert_eq!(repo.find_by_id(saved.id).await.unwrap().unwrap().name, "A2");

        repo.save(Target::new("https://b.example", "B")).await.unwrap();
        assert_eq!(repo.find_all().await.unwrap().len(), 2);

        repo.set_active(saved.id, false).await.unwrap();
        assert!(!repo.find_by_id(saved.id).await.unwrap().unwrap().active);

        repo.delete(saved.id).await.unwrap();
        assert!(repo.find_by_id(saved.id).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_read_overlapping_a_write_does_not_fill_cache() {
        let cache = Arc::new(CachedTargetRepository::new(GatedRepository::default()));
        let saved = cache.save(Target::new("https://a.example", "A")).await.unwrap();

        cache.inner().armed.store(true, Ordering::SeqCst);
        let reader = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.find_by_id(saved.id).await })
        };
        cache.inner().reached.notified().await;

        let mut renamed = saved.clone();
        renamed.name = "A2".to_string();
        cache.save(renamed).await.unwrap();
        cache.inner().release.notify_one();

        // the slow reader still sees what it read, but must not cache it
        let stale = reader.await.unwrap().unwrap().unwrap();
        assert_eq!(stale.name, "A");
        assert_eq!(cache.find_by_id(saved.id).await.unwrap().unwrap().name, "A2");
        assert_eq!(cache.find_by_id(saved.id).await.unwrap().unwrap().name, "A2");
    }

    #[test]
    fn test_concurrent_inserts_and_renames_make_progress() {
        let repo = Arc::new(InMemoryTargetRepository::new());
        let seeded: Vec<Target> = (0..16)
            .map(|i| {
                repo.insert(Target::new(format!("https://seed{i}.example"), "seed"))
                    .unwrap()
            })
            .collect();

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        for worker in 0..4 {
            let repo = repo.clone();
            let seeded = seeded.clone();
            let done = done_tx.clone();
            std::thread::spawn(move || {
                for round in 0..200 {
                    repo.insert(Target::new(format!("https://w{worker}-{round}.example"), "new"))
                        .unwrap();

                    let index = worker * 4 + round % 4;
                    let mut renamed = seeded[index].clone();
                    renamed.address = format!("https://seed{index}-{round}.example");
                    repo.update(renamed).unwrap();
                }
                let _ = done.send(());
            });
        }
        drop(done_tx);

        for _ in 0..4 {
            done_rx
                .recv_timeout(Duration::from_secs(10))
                .expect("repository writers stalled");
        }
        assert_eq!(repo.len(), 16 + 4 * 200);
        assert_eq!(repo.addresses.len(), 16 + 4 * 200);
        assert!(tokio_test::block_on(repo.exists("https://seed0-196.example")).unwrap());
        assert!(!tokio_test::block_on(repo.exists("https://seed0.example")).unwrap());
    }

    #[tokio::test]
    async fn test_result_store_history_and_statistics() {
        let store = InMemoryResultStore::new();
        store.record(record(1, 200, 100)).await.unwrap();
        store.record(record(1, 500, 900)).await.unwrap();
        store.record(record(2, 200, 300)).await.unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.history(1).await.unwrap().len(), 2);
        assert!(store.history(42).await.unwrap().is_empty());

        let stats = store.statistics();
        assert_eq!(stats.total_results, 3);
        assert_eq!(stats.successful_results, 2);
        assert_eq!(stats.average_response_time_ms, Some(200.0));
    }

    #[test]
    fn test_synthetic_reliability_range() {
        let source = SyntheticReliability;
        for id in 0..200 {
            let value = source.reliability(id);
            assert!((0.3..1.0).contains(&value));
        }
    }
}
