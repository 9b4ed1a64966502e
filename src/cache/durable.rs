//! Durable cache tier backed by SQLite
//!
//! Each reduced workout is stored as one whole JSON object keyed by workout id.
//! Bulk replacement runs inside a single transaction, so a crash mid-write
//! leaves the previously committed content untouched.

use super::SignalStore;
use crate::error::{CacheError, Result};
use crate::models::ReducedWorkout;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// SQLite key-value store of reduced workouts
pub struct SqliteStore {
    connection: Mutex<Connection>,
}

impl SqliteStore {
    /// Create or open a cache database
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        info!(path = %db_path.display(), "Opened durable signal cache");
        Self::with_connection(conn)
    }

    /// In-memory database, for tests and ephemeral sessions
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS signal_cache (
                workout_id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                cached_at INTEGER NOT NULL
            );",
        )?;

        Ok(Self {
            connection: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.connection.lock().map_err(|_| {
            CacheError::Storage {
                tier: "durable".to_string(),
                reason: "connection lock poisoned".to_string(),
            }
            .into()
        })
    }

    fn write_entries(tx: &rusqlite::Transaction<'_>, workouts: &[ReducedWorkout]) -> Result<()> {
        let now = Utc::now().timestamp();
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO signal_cache (workout_id, payload, cached_at)
             VALUES (?1, ?2, ?3)",
        )?;
        for workout in workouts {
            let payload = serde_json::to_string(workout)?;
            stmt.execute(params![&workout.workout_id, payload, now])?;
        }
        Ok(())
    }

    /// Number of cached entries
    pub fn len(&self) -> Result<usize> {
        let count: i64 =
            self.conn()?
                .query_row("SELECT COUNT(*) FROM signal_cache", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl SignalStore for SqliteStore {
    fn tier(&self) -> &'static str {
        "durable"
    }

    fn get(&self, ids: &[String]) -> Result<HashMap<String, ReducedWorkout>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT payload FROM signal_cache WHERE workout_id = ?1")?;

        let mut found = HashMap::new();
        for id in ids {
            let payload: Option<String> = stmt
                .query_row(params![id], |row| row.get(0))
                .optional()?;

            let Some(payload) = payload else {
                continue;
            };

            // A corrupt entry is treated as a miss so the workout is fetched again
            match serde_json::from_str::<ReducedWorkout>(&payload) {
                Ok(workout) => {
                    found.insert(id.clone(), workout);
                }
                Err(e) => {
                    warn!(workout_id = %id, error = %e, "Skipping corrupt cache entry");
                }
            }
        }

        debug!(requested = ids.len(), found = found.len(), "Durable cache lookup");
        Ok(found)
    }

    fn put(&self, workouts: &[ReducedWorkout]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        Self::write_entries(&tx, workouts)?;
        tx.commit()?;
        Ok(())
    }

    fn replace_all(&self, workouts: &[ReducedWorkout]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM signal_cache", [])?;
        Self::write_entries(&tx, workouts)?;
        tx.commit()?;
        debug!(entries = workouts.len(), "Replaced durable cache content");
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM signal_cache WHERE workout_id = ?1", params![id])?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT workout_id FROM signal_cache ORDER BY workout_id")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TimeSeriesPoint, WorkoutCategory};
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn workout(id: &str) -> ReducedWorkout {
        ReducedWorkout {
            workout_id: id.to_string(),
            category: WorkoutCategory::Long,
            prescribed_fuel_rate: Some(60.0),
            starting_glucose: Some(8.2),
            glucose: vec![TimeSeriesPoint::new(0, 8.2), TimeSeriesPoint::new(5, 7.9)],
            heart_rate: vec![TimeSeriesPoint::new(0, 131.0)],
            pace: Some(vec![TimeSeriesPoint::new(0, 5.9)]),
            cadence: None,
            altitude: None,
            date: NaiveDate::from_ymd_opt(2024, 10, 6).unwrap(),
        }
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_cache_creation() {
        let temp_dir = tempdir().unwrap();
        let cache_db = temp_dir.path().join("nested").join("cache.db");

        let store = SqliteStore::open(&cache_db).unwrap();
        assert!(cache_db.exists());
        assert_eq!(store.len().unwrap(), 0);
    }

    #[test]
    fn test_put_and_get_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put(&[workout("a")]).unwrap();

        let found = store.get(&ids(&["a", "b"])).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found["a"], workout("a"));
    }

    #[test]
    fn test_replace_all() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put(&[workout("a"), workout("b")]).unwrap();
        store.replace_all(&[workout("b"), workout("c")]).unwrap();

        assert_eq!(store.keys().unwrap(), ids(&["b", "c"]));
    }

    #[test]
    fn test_corrupt_entry_is_a_miss() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put(&[workout("a")]).unwrap();
        store
            .conn()
            .unwrap()
            .execute(
                "INSERT INTO signal_cache (workout_id, payload, cached_at) VALUES ('bad', '{', 0)",
                [],
            )
            .unwrap();

        let found = store.get(&ids(&["a", "bad"])).unwrap();
        assert_eq!(found.len(), 1);
        assert!(!found.contains_key("bad"));
    }

    #[test]
    fn test_persists_across_reopen() {
        let temp_dir = tempdir().unwrap();
        let cache_db = temp_dir.path().join("cache.db");

        {
            let store = SqliteStore::open(&cache_db).unwrap();
            store.put(&[workout("a")]).unwrap();
        }

        let reopened = SqliteStore::open(&cache_db).unwrap();
        assert_eq!(reopened.keys().unwrap(), ids(&["a"]));
    }

    #[test]
    fn test_remove() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put(&[workout("a"), workout("b")]).unwrap();
        store.remove("a").unwrap();
        assert_eq!(store.keys().unwrap(), ids(&["b"]));
    }
}
