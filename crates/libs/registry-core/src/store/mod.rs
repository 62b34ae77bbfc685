//! Low-level storage operations: the SQLite connection pool and the
//! pluggable ports (`BlobStore`, `KVCache`, `JobQueue`, `Analytics`,
//! `Clock`) that the rest of the system reaches external state through.
//!
//! # Database
//!
//! The `Database` port named in the design is, concretely, a single
//! libsql connection configured for high-concurrency local access:
//!
//! - WAL mode for concurrent reads during writes
//! - 30-second busy timeout for lock contention
//! - 64MB cache for reduced I/O
//!
//! # Example
//!
//! ```no_run
//! use registry_core::store::new_db_pool;
//!
//! async fn setup() -> registry_core::Result<()> {
//!     let db = new_db_pool("data/registry.db").await?;
//!     Ok(())
//! }
//! ```

use crate::Result;
use libsql::{Builder, Connection};
use std::path::Path;

/// Type alias for database connections.
pub type Db = Connection;

pub mod analytics;
pub mod blob_store;
pub mod clock;
pub mod job_queue;
pub mod kv_cache;

pub use analytics::{Analytics, NoopAnalytics};
pub use blob_store::{BlobStore, FsBlobStore};
pub use clock::{Clock, FixedClock, SystemClock};
pub use job_queue::{InProcessJobQueue, JobQueue};
pub use kv_cache::{KVCache, MokaKvCache};

/// Creates a new database connection at `db_path` with migrations applied.
///
/// # Errors
///
/// Returns an error if the parent directory cannot be created, the
/// database cannot be opened, or a migration fails.
pub async fn new_db_pool(db_path: impl AsRef<Path>) -> Result<Db> {
    let db_path = db_path.as_ref();
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db = Builder::new_local(db_path).build().await?;
    let conn = db.connect()?;

    // SQLite concurrency optimizations for concurrent handler access.
    let _ = conn.execute("PRAGMA journal_mode=WAL;", ()).await;
    let _ = conn.execute("PRAGMA busy_timeout=30000;", ()).await;
    let _ = conn.execute("PRAGMA synchronous=NORMAL;", ()).await;
    let _ = conn.execute("PRAGMA cache_size=-64000;", ()).await;
    let _ = conn.execute("PRAGMA foreign_keys=ON;", ()).await;

    let migrations = [
        include_str!("../../../../../migrations/001_repositories.sql"),
        include_str!("../../../../../migrations/002_tokens.sql"),
        include_str!("../../../../../migrations/003_packages.sql"),
        include_str!("../../../../../migrations/004_artifacts.sql"),
    ];

    for migration in &migrations {
        conn.execute_batch(migration).await?;
    }

    Ok(conn)
}

/// Opens an in-memory database with migrations applied, for unit and
/// integration tests.
pub async fn new_db_pool_in_memory() -> Result<Db> {
    let db = Builder::new_local(":memory:").build().await?;
    let conn = db.connect()?;
    let migrations = [
        include_str!("../../../../../migrations/001_repositories.sql"),
        include_str!("../../../../../migrations/002_tokens.sql"),
        include_str!("../../../../../migrations/003_packages.sql"),
        include_str!("../../../../../migrations/004_artifacts.sql"),
    ];
    for migration in &migrations {
        conn.execute_batch(migration).await?;
    }
    Ok(conn)
}
