//! PostgreSQL-backed cache store.
//!
//! Keeps the snapshot (as JSON text) and the build lock in a single
//! key/value table:
//!
//! ```sql
//! CREATE TABLE harvest_cache (
//!     key        TEXT PRIMARY KEY,
//!     value      TEXT NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL
//! );
//! ```
//!
//! The `postgres` client is synchronous, so every call runs on tokio's
//! blocking pool behind a mutex. The client owns a private runtime and must
//! not be dropped on an async worker thread, so `Drop` hands it to the
//! blocking pool as well.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use postgres::{Client, NoTls};

use crate::logging::DataSource;
use crate::model::{CacheSnapshot, HarvestError};
use crate::store::CacheStore;

const CREATE_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS harvest_cache (
        key        TEXT PRIMARY KEY,
        value      TEXT NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )";

const UPSERT: &str = "
    INSERT INTO harvest_cache (key, value, updated_at)
    VALUES ($1, $2, $3)
    ON CONFLICT (key) DO UPDATE
        SET value = EXCLUDED.value,
            updated_at = EXCLUDED.updated_at";

const SELECT: &str = "SELECT value FROM harvest_cache WHERE key = $1";

pub struct PgCacheStore {
    client: Arc<Mutex<Option<Client>>>,
    snapshot_key: String,
    lock_key: String,
}

impl PgCacheStore {
    /// Connects and makes sure the table exists.
    pub async fn connect(database_url: &str, key: &str) -> Result<Self, HarvestError> {
        let url = database_url.to_string();
        let client = tokio::task::spawn_blocking(move || -> Result<Client, postgres::Error> {
            let mut client = Client::connect(&url, NoTls)?;
            client.batch_execute(CREATE_TABLE)?;
            Ok(client)
        })
        .await
        .map_err(|e| HarvestError::Store(e.to_string()))?
        .map_err(|e| HarvestError::Store(format!("connect: {}", e)))?;

        tracing::info!(source = %DataSource::Store, key, "connected to harvest_cache");

        Ok(Self {
            client: Arc::new(Mutex::new(Some(client))),
            snapshot_key: key.to_string(),
            lock_key: format!("{}:lock", key),
        })
    }

    async fn with_client<T, F>(&self, op: F) -> Result<T, HarvestError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Client) -> Result<T, postgres::Error> + Send + 'static,
    {
        let client = Arc::clone(&self.client);
        tokio::task::spawn_blocking(move || {
            let mut guard = client
                .lock()
                .map_err(|_| HarvestError::Store("client mutex poisoned".to_string()))?;
            let client = guard
                .as_mut()
                .ok_or_else(|| HarvestError::Store("connection closed".to_string()))?;
            op(client).map_err(|e| HarvestError::Store(e.to_string()))
        })
        .await
        .map_err(|e| HarvestError::Store(e.to_string()))?
    }

    async fn read(&self, key: &str) -> Result<Option<String>, HarvestError> {
        let key = key.to_string();
        self.with_client(move |client| {
            let row = client.query_opt(SELECT, &[&key])?;
            Ok(row.map(|r| r.get::<_, String>(0)))
        })
        .await
    }

    async fn write(&self, key: &str, value: String) -> Result<(), HarvestError> {
        let key = key.to_string();
        self.with_client(move |client| {
            client.execute(UPSERT, &[&key, &value, &Utc::now()])?;
            Ok(())
        })
        .await
    }
}

impl Drop for PgCacheStore {
    fn drop(&mut self) {
        let client = self.client.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        let Some(client) = client else { return };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || drop(client));
            }
            Err(_) => drop(client),
        }
    }
}

#[async_trait]
impl CacheStore for PgCacheStore {
    async fn get_snapshot(&self) -> Result<Option<CacheSnapshot>, HarvestError> {
        match self.read(&self.snapshot_key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set_snapshot(&self, snapshot: &CacheSnapshot) -> Result<(), HarvestError> {
        let raw = serde_json::to_string(snapshot)?;
        self.write(&self.snapshot_key, raw).await
    }

    async fn get_lock(&self) -> Result<bool, HarvestError> {
        Ok(self.read(&self.lock_key).await?.is_some_and(|v| v == "true"))
    }

    async fn set_lock(&self, held: bool) -> Result<(), HarvestError> {
        self.write(&self.lock_key, held.to_string()).await
    }
}

// ---------------------------------------------------------------------------
// Integration tests
// ---------------------------------------------------------------------------
//
// Require a reachable PostgreSQL in DATABASE_URL; marked #[ignore] so the
// normal build never depends on one.
//
//   cargo test -- --ignored pg_store
