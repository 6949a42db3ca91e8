//! Cache store capability.
//!
//! The pipeline never touches storage directly. The orchestrator is handed a
//! `CacheStore` and reads the prior grid and processed units through it at
//! link start. It writes the merged snapshot at most once at link end and
//! holds the build lock while it works.
//!
//! Implementations:
//! - `MemoryCacheStore`: process-local, used by the in-process chain
//!   runner and tests.
//! - `postgres::PgCacheStore`: a key/value table in PostgreSQL.

pub mod postgres;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::model::{CacheSnapshot, GridCell, HarvestError};

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get_snapshot(&self) -> Result<Option<CacheSnapshot>, HarvestError>;

    async fn set_snapshot(&self, snapshot: &CacheSnapshot) -> Result<(), HarvestError>;

    /// Whether a link is currently processing.
    async fn get_lock(&self) -> Result<bool, HarvestError>;

    async fn set_lock(&self, held: bool) -> Result<(), HarvestError>;

    /// Grid of the current snapshot, empty when none exists.
    async fn existing_grid(&self) -> Result<BTreeMap<String, GridCell>, HarvestError> {
        Ok(self.get_snapshot().await?.map(|s| s.grid).unwrap_or_default())
    }

    /// Units already folded into the current snapshot.
    async fn existing_processed_units(&self) -> Result<BTreeSet<String>, HarvestError> {
        Ok(self
            .get_snapshot()
            .await?
            .map(|s| s.meta.processed_units)
            .unwrap_or_default())
    }
}

/// In-memory store. Counts snapshot writes so callers can observe the
/// persistence policy.
#[derive(Default)]
pub struct MemoryCacheStore {
    snapshot: RwLock<Option<CacheSnapshot>>,
    lock: RwLock<bool>,
    writes: AtomicUsize,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: CacheSnapshot) -> Self {
        Self { snapshot: RwLock::new(Some(snapshot)), ..Self::default() }
    }

    /// Number of `set_snapshot` calls so far.
    pub fn snapshot_writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get_snapshot(&self) -> Result<Option<CacheSnapshot>, HarvestError> {
        Ok(self.snapshot.read().await.clone())
    }

    async fn set_snapshot(&self, snapshot: &CacheSnapshot) -> Result<(), HarvestError> {
        *self.snapshot.write().await = Some(snapshot.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_lock(&self) -> Result<bool, HarvestError> {
        Ok(*self.lock.read().await)
    }

    async fn set_lock(&self, held: bool) -> Result<(), HarvestError> {
        *self.lock.write().await = held;
        Ok(())
    }
}
