//! Volatile in-memory cache tier
//!
//! Best effort only: entries may be evicted at any time and a poisoned lock
//! behaves like an empty cache. Its absence never changes results, it only
//! makes the first render slower.

use super::SignalStore;
use crate::error::Result;
use crate::models::ReducedWorkout;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use tracing::debug;

const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(500) {
    Some(n) => n,
    None => unreachable!(),
};

/// Capacity-bounded in-memory store with least-recently-used eviction
#[derive(Debug)]
pub struct LocalStore {
    entries: Mutex<LruCache<String, ReducedWorkout>>,
}

impl LocalStore {
    /// A zero capacity falls back to the default of 500 entries
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(DEFAULT_CAPACITY);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn insert(entries: &mut LruCache<String, ReducedWorkout>, workout: &ReducedWorkout) {
    if let Some((evicted, _)) = entries.push(workout.workout_id.clone(), workout.clone()) {
        if evicted != workout.workout_id {
            debug!(workout_id = %evicted, "Evicted local cache entry");
        }
    }
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY.get())
    }
}

impl SignalStore for LocalStore {
    fn tier(&self) -> &'static str {
        "local"
    }

    fn get(&self, ids: &[String]) -> Result<HashMap<String, ReducedWorkout>> {
        let Ok(mut entries) = self.entries.lock() else {
            return Ok(HashMap::new());
        };

        let mut found = HashMap::new();
        for id in ids {
            if let Some(workout) = entries.get(id) {
                found.insert(id.clone(), workout.clone());
            }
        }
        Ok(found)
    }

    fn put(&self, workouts: &[ReducedWorkout]) -> Result<()> {
        let Ok(mut entries) = self.entries.lock() else {
            return Ok(());
        };

        for workout in workouts {
            insert(&mut entries, workout);
        }
        Ok(())
    }

    fn replace_all(&self, workouts: &[ReducedWorkout]) -> Result<()> {
        let Ok(mut entries) = self.entries.lock() else {
            return Ok(());
        };

        entries.clear();
        for workout in workouts {
            insert(&mut entries, workout);
        }
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<()> {
        if let Ok(mut entries) = self.entries.lock() {
            entries.pop(id);
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .map(|e| e.iter().map(|(id, _)| id.clone()).collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }
}
