//! Diff-based cache refresh
//!
//! A load round reads the durable tier, fetches raw streams only for the
//! workouts it does not hold yet (bounded concurrency), reduces them, merges
//! them with the cached entries and hands back the merged set immediately.
//! Writing the merged set to both tiers happens in a background task whose
//! handle is returned but never awaited on the model-building path.

use super::SignalStore;
use crate::error::Result;
use crate::models::{ReducedWorkout, WorkoutRecord};
use crate::providers::StreamProvider;
use crate::reducer::reduce_streams;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Default number of stream fetches in flight at once
pub const DEFAULT_FETCH_CONCURRENCY: usize = 3;

/// Progress of the fetch phase of a load round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncProgress {
    pub completed: usize,
    pub total: usize,
}

/// Result of a load round
#[derive(Debug)]
pub struct SyncOutcome {
    /// Merged cache content for exactly the requested ids
    pub workouts: HashMap<String, ReducedWorkout>,

    /// Ids fetched from the provider this round, sorted
    pub fetched: Vec<String>,

    /// Fetched ids whose streams failed and were cached empty, sorted
    pub failed: Vec<String>,

    /// Background write of the merged set to both tiers
    pub persistence: JoinHandle<Result<()>>,
}

/// Two-tier signal cache with diff-based refresh
pub struct SignalCache {
    local: Arc<dyn SignalStore>,
    durable: Arc<dyn SignalStore>,
    provider: Arc<dyn StreamProvider>,
    concurrency: usize,
}

impl SignalCache {
    pub fn new(
        local: Arc<dyn SignalStore>,
        durable: Arc<dyn SignalStore>,
        provider: Arc<dyn StreamProvider>,
    ) -> Self {
        Self {
            local,
            durable,
            provider,
            concurrency: DEFAULT_FETCH_CONCURRENCY,
        }
    }

    /// Set the maximum number of simultaneous stream fetches
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Whatever the local tier holds for `ids`, for an instant first paint.
    /// May be stale or empty; never used as a source of truth.
    pub fn local_snapshot(&self, ids: &[String]) -> HashMap<String, ReducedWorkout> {
        self.local.get(ids).unwrap_or_default()
    }

    /// Read cached entries for `ids` from the durable tier, falling back to
    /// the local tier when the durable one is unavailable.
    pub async fn get(&self, ids: &[String]) -> Result<HashMap<String, ReducedWorkout>> {
        let durable = Arc::clone(&self.durable);
        let wanted = ids.to_vec();
        let read = tokio::task::spawn_blocking(move || durable.get(&wanted)).await?;

        match read {
            Ok(found) => Ok(found),
            Err(e) => {
                warn!(error = %e, "Durable cache unavailable, reading local tier");
                Ok(self.local_snapshot(ids))
            }
        }
    }

    /// Write entries to both tiers and wait for the durable write
    pub async fn put(&self, workouts: Vec<ReducedWorkout>) -> Result<()> {
        if let Err(e) = self.local.put(&workouts) {
            debug!(error = %e, "Local cache write skipped");
        }
        let durable = Arc::clone(&self.durable);
        tokio::task::spawn_blocking(move || durable.put(&workouts)).await?
    }

    /// Forget a workout in both tiers so the next round fetches it again
    pub async fn invalidate(&self, workout_id: &str) -> Result<()> {
        self.local.remove(workout_id)?;
        let durable = Arc::clone(&self.durable);
        let id = workout_id.to_string();
        tokio::task::spawn_blocking(move || durable.remove(&id)).await?
    }

    /// Run one load round for the wanted workouts.
    ///
    /// `progress` is called after every completed fetch. Dropping the returned
    /// future stops awaiting progress; requests already issued still run to
    /// completion in the background.
    pub async fn load<F>(&self, wanted: &[WorkoutRecord], progress: F) -> Result<SyncOutcome>
    where
        F: FnMut(SyncProgress) + Send,
    {
        let span = info_span!("cache_sync", round = %Uuid::new_v4());
        self.load_round(wanted, progress).instrument(span).await
    }

    async fn load_round<F>(&self, wanted: &[WorkoutRecord], mut progress: F) -> Result<SyncOutcome>
    where
        F: FnMut(SyncProgress) + Send,
    {
        let records: BTreeMap<&str, &WorkoutRecord> =
            wanted.iter().map(|r| (r.id.as_str(), r)).collect();
        let ids: Vec<String> = records.keys().map(|id| id.to_string()).collect();

        let mut workouts = self.get(&ids).await?;
        let uncached: Vec<WorkoutRecord> = records
            .values()
            .filter(|r| !workouts.contains_key(&r.id))
            .map(|r| (*r).clone())
            .collect();

        info!(
            wanted = ids.len(),
            cached = workouts.len(),
            uncached = uncached.len(),
            "Starting cache load"
        );

        let total = uncached.len();
        let mut fetched = Vec::with_capacity(total);
        let mut failed = Vec::new();

        if total > 0 {
            let mut results = self.spawn_fetches(uncached);
            let mut completed = 0;

            while let Some((workout, ok)) = results.recv().await {
                completed += 1;
                progress(SyncProgress { completed, total });

                if !ok {
                    failed.push(workout.workout_id.clone());
                }
                fetched.push(workout.workout_id.clone());
                workouts.insert(workout.workout_id.clone(), workout);
            }

            if completed < total {
                warn!(completed, total, "Some fetch tasks ended without a result");
            }
        }

        fetched.sort();
        failed.sort();

        let persistence = self.spawn_persistence(&workouts, total > 0);

        info!(
            fetched = fetched.len(),
            failed = failed.len(),
            total = workouts.len(),
            "Cache load complete"
        );

        Ok(SyncOutcome {
            workouts,
            fetched,
            failed,
            persistence,
        })
    }

    /// Fetch and reduce each record with at most `concurrency` requests in
    /// flight. A failed fetch yields an empty workout so it is never retried.
    fn spawn_fetches(
        &self,
        records: Vec<WorkoutRecord>,
    ) -> mpsc::UnboundedReceiver<(ReducedWorkout, bool)> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let (tx, rx) = mpsc::unbounded_channel();

        for record in records {
            let semaphore = Arc::clone(&semaphore);
            let provider = Arc::clone(&self.provider);
            let tx = tx.clone();

            tokio::spawn(
                async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return;
                    };

                    let result = match provider.fetch_streams(&record.id).await {
                        Ok(raw) => (reduce_streams(&record, &raw), true),
                        Err(e) => {
                            warn!(
                                workout_id = %record.id,
                                provider = provider.name(),
                                error = %e,
                                "Stream fetch failed, caching empty result"
                            );
                            (ReducedWorkout::empty(&record), false)
                        }
                    };

                    // The receiver is gone when the caller stopped awaiting
                    let _ = tx.send(result);
                }
                .in_current_span(),
            );
        }

        rx
    }

    fn spawn_persistence(
        &self,
        workouts: &HashMap<String, ReducedWorkout>,
        write_durable: bool,
    ) -> JoinHandle<Result<()>> {
        let mut snapshot: Vec<ReducedWorkout> = workouts.values().cloned().collect();
        snapshot.sort_by(|a, b| a.workout_id.cmp(&b.workout_id));

        let local = Arc::clone(&self.local);
        let durable = Arc::clone(&self.durable);
        let span = tracing::Span::current();

        tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            if let Err(e) = local.replace_all(&snapshot) {
                debug!(error = %e, "Local cache write skipped");
            }
            if write_durable {
                durable.replace_all(&snapshot)?;
                debug!(entries = snapshot.len(), "Persisted merged cache");
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{LocalStore, SqliteStore};
    use crate::error::ProviderError;
    use crate::models::RawStreams;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingProvider {
        requested: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        failing: Vec<String>,
    }

    #[async_trait]
    impl StreamProvider for CountingProvider {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn fetch_streams(&self, workout_id: &str) -> std::result::Result<RawStreams, ProviderError> {
            self.requested.lock().unwrap().push(workout_id.to_string());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing.iter().any(|id| id == workout_id) {
                return Err(ProviderError::Unreachable {
                    provider: "counting".to_string(),
                    reason: "timeout".to_string(),
                });
            }

            Ok(RawStreams {
                time: vec![0.0, 60.0, 120.0],
                heart_rate: Some(vec![120.0, 125.0, 130.0]),
                glucose: Some(vec![7.0, 6.8, 6.5]),
                ..RawStreams::default()
            })
        }
    }

    fn record(id: &str) -> WorkoutRecord {
        WorkoutRecord {
            id: id.to_string(),
            start_time: Utc.with_ymd_and_hms(2024, 10, 1, 7, 0, 0).unwrap(),
            name: "Easy run".to_string(),
            category: None,
            duration_seconds: 1800,
            distance_meters: None,
            training_load: None,
            prescribed_fuel_rate: None,
        }
    }

    fn cache_with(provider: Arc<CountingProvider>) -> (SignalCache, Arc<SqliteStore>, Arc<LocalStore>) {
        let durable = Arc::new(SqliteStore::open_in_memory().unwrap());
        let local = Arc::new(LocalStore::new(100));
        let cache = SignalCache::new(local.clone(), durable.clone(), provider);
        (cache, durable, local)
    }

    #[tokio::test]
    async fn test_only_uncached_workouts_are_fetched() {
        let provider = Arc::new(CountingProvider::default());
        let (cache, durable, _) = cache_with(provider.clone());

        durable.put(&[reduce_streams(&record("a"), &RawStreams::default())]).unwrap();

        let outcome = cache.load(&[record("a"), record("b")], |_| {}).await.unwrap();
        outcome.persistence.await.unwrap().unwrap();

        assert_eq!(*provider.requested.lock().unwrap(), vec!["b".to_string()]);
        assert_eq!(outcome.fetched, vec!["b".to_string()]);
        assert_eq!(outcome.workouts.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_fetch_cached_empty_and_not_retried() {
        let provider = Arc::new(CountingProvider {
            failing: vec!["b".to_string()],
            ..CountingProvider::default()
        });
        let (cache, _, _) = cache_with(provider.clone());

        let first = cache.load(&[record("a"), record("b")], |_| {}).await.unwrap();
        assert_eq!(first.failed, vec!["b".to_string()]);
        assert!(first.workouts["b"].is_empty());
        assert!(!first.workouts["a"].is_empty());
        first.persistence.await.unwrap().unwrap();

        let second = cache.load(&[record("a"), record("b")], |_| {}).await.unwrap();
        assert!(second.fetched.is_empty());
        assert_eq!(provider.requested.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unwanted_entries_dropped_on_write_back() {
        let provider = Arc::new(CountingProvider::default());
        let (cache, durable, local) = cache_with(provider);

        let first = cache.load(&[record("a"), record("b")], |_| {}).await.unwrap();
        first.persistence.await.unwrap().unwrap();

        let second = cache.load(&[record("b"), record("c")], |_| {}).await.unwrap();
        assert!(!second.workouts.contains_key("a"));
        second.persistence.await.unwrap().unwrap();

        assert_eq!(durable.keys().unwrap(), vec!["b".to_string(), "c".to_string()]);
        assert_eq!(local.keys().unwrap(), vec!["b".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded_and_progress_reported() {
        let provider = Arc::new(CountingProvider::default());
        let (cache, _, _) = cache_with(provider.clone());
        let cache = cache.with_concurrency(2);

        let records: Vec<WorkoutRecord> = (0..7).map(|i| record(&format!("w{}", i))).collect();
        let mut updates = Vec::new();
        let outcome = cache.load(&records, |p| updates.push(p)).await.unwrap();

        assert_eq!(outcome.fetched.len(), 7);
        assert!(provider.max_in_flight.load(Ordering::SeqCst) <= 2);
        assert_eq!(updates.len(), 7);
        assert_eq!(updates.last(), Some(&SyncProgress { completed: 7, total: 7 }));
        assert!(updates.windows(2).all(|w| w[0].completed < w[1].completed));
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let provider = Arc::new(CountingProvider::default());
        let (cache, _, _) = cache_with(provider.clone());

        let first = cache.load(&[record("a")], |_| {}).await.unwrap();
        first.persistence.await.unwrap().unwrap();

        cache.invalidate("a").await.unwrap();
        let second = cache.load(&[record("a")], |_| {}).await.unwrap();
        assert_eq!(second.fetched, vec!["a".to_string()]);
        assert_eq!(provider.requested.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_local_snapshot_after_round() {
        let provider = Arc::new(CountingProvider::default());
        let (cache, _, _) = cache_with(provider);

        assert!(cache.local_snapshot(&["a".to_string()]).is_empty());
        let outcome = cache.load(&[record("a")], |_| {}).await.unwrap();
        outcome.persistence.await.unwrap().unwrap();
        assert_eq!(cache.local_snapshot(&["a".to_string()]).len(), 1);
    }
}
