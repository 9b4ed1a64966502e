//! Two-tier cache of reduced per-workout signals
//!
//! - `local`: volatile, best-effort tier used for instant first paint
//! - `durable`: SQLite-backed tier, the source of truth
//! - `sync`: diff-based refresh that fetches only uncached workouts
//!
//! Both tiers implement [`SignalStore`] and are injected into
//! [`SignalCache`] explicitly. The durable tier wins on reads; the local tier
//! is read-through only.

pub mod durable;
pub mod local;
pub mod sync;

use crate::error::Result;
use crate::models::ReducedWorkout;
use std::collections::HashMap;

pub use durable::SqliteStore;
pub use local::LocalStore;
pub use sync::{SignalCache, SyncOutcome, SyncProgress};

/// Key-value store of reduced workouts keyed by workout id.
///
/// Implementations store whole objects only; there are no partial-field
/// updates.
pub trait SignalStore: Send + Sync {
    /// Tier name used in logs
    fn tier(&self) -> &'static str;

    /// Entries for the requested ids that are present. Missing ids are simply
    /// absent from the result.
    fn get(&self, ids: &[String]) -> Result<HashMap<String, ReducedWorkout>>;

    /// Store or overwrite the given entries
    fn put(&self, workouts: &[ReducedWorkout]) -> Result<()>;

    /// Replace the whole content with `workouts`. Either the full new set
    /// becomes visible or the previous content stays intact.
    fn replace_all(&self, workouts: &[ReducedWorkout]) -> Result<()>;

    /// Drop one entry so that it is fetched again on the next sync
    fn remove(&self, id: &str) -> Result<()>;

    /// All cached workout ids
    fn keys(&self) -> Result<Vec<String>>;
}
