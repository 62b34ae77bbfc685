//! # Model Layer - BMC Pattern Implementation
//!
//! Backend Model Controllers (BMCs) and their data structures for the
//! registry's four DB-owned entities.
//!
//! ## BMC Pattern
//!
//! Each entity has:
//! - **Data Struct**: the serializable model (e.g. `Repository`, `Token`)
//! - **ForCreate Struct**: input for creation operations
//! - **Bmc Struct**: a stateless controller with async CRUD methods
//!
//! ## Available Controllers
//!
//! | BMC | Description |
//! |-----|-------------|
//! | `repository::RepositoryBmc` | configured upstream sources |
//! | `token::TokenBmc` | client credentials |
//! | `package_version::PackageVersionBmc` | cached per-version metadata |
//! | `artifact::ArtifactBmc` | artifact rows and download counters |
//!
//! ## ModelManager
//!
//! The [`ModelManager`] provides centralized access to the database
//! connection and the pluggable ports: BlobStore, KVCache, JobQueue,
//! Analytics, Clock.

pub mod artifact;
pub mod package_version;
pub mod repository;
pub mod token;

use crate::store::{self, Analytics, BlobStore, Clock, Db, JobQueue, KVCache};
use crate::Result;
use registry_common::config::AppConfig;
use std::sync::Arc;

#[derive(Clone)]
pub struct ModelManager {
    pub(crate) db: Db,
    pub blob_store: Arc<dyn BlobStore>,
    pub kv_cache: Arc<dyn KVCache>,
    pub job_queue: Option<Arc<dyn JobQueue>>,
    pub analytics: Arc<dyn Analytics>,
    pub clock: Arc<dyn Clock>,
    pub app_config: Arc<AppConfig>,
}

impl ModelManager {
    /// Constructs a manager wired to the configured adapters.
    pub fn new(
        db: Db,
        blob_store: Arc<dyn BlobStore>,
        kv_cache: Arc<dyn KVCache>,
        job_queue: Option<Arc<dyn JobQueue>>,
        analytics: Arc<dyn Analytics>,
        clock: Arc<dyn Clock>,
        app_config: Arc<AppConfig>,
    ) -> Self {
        ModelManager {
            db,
            blob_store,
            kv_cache,
            job_queue,
            analytics,
            clock,
            app_config,
        }
    }

    /// Constructor for tests: in-memory DB, local filesystem blob store
    /// under a tempdir, in-process cache, no job queue (sync strategy),
    /// no-op analytics, system clock.
    pub async fn new_for_test() -> Result<Self> {
        let db = store::new_db_pool_in_memory().await?;
        let tmp = std::env::temp_dir().join(format!("registry-test-{}", uuid::Uuid::new_v4()));
        Ok(ModelManager {
            db,
            blob_store: Arc::new(store::FsBlobStore::new(tmp)),
            kv_cache: Arc::new(store::MokaKvCache::new()),
            job_queue: None,
            analytics: Arc::new(store::NoopAnalytics),
            clock: Arc::new(store::SystemClock),
            app_config: Arc::new(AppConfig::default()),
        })
    }

    /// Returns the db connection reference for the model layer.
    pub(in crate::model) fn db(&self) -> &Db {
        &self.db
    }

    /// Returns the db connection for integration tests.
    pub fn db_for_test(&self) -> &Db {
        &self.db
    }

    /// Health check - verify database connectivity.
    pub async fn health_check(&self) -> Result<bool> {
        let stmt = self.db.prepare("SELECT 1").await?;
        let mut rows = stmt.query(()).await?;
        Ok(rows.next().await?.is_some())
    }
}
