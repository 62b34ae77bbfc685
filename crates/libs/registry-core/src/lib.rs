//! # registry-core: domain logic and data access for the package mirror
//!
//! `registry-core` holds the four DB-owned entities (Repository, Token,
//! Package Version, Artifact), the BMC controllers that read and write
//! them, and the pluggable ports (BlobStore, KVCache, JobQueue, Analytics,
//! Clock) the rest of the system reaches external state through.
//!
//! ## Architecture
//!
//! - **BMC Layer**: stateless controllers for all database operations
//! - **Model Structs**: data transfer objects for all entities
//! - **ModelManager**: central manager for the DB connection and ports
//! - **Ports**: traits in [`store`], so the server layer never depends on
//!   a concrete blob/cache/queue backend
//!
//! ## Example
//!
//! ```no_run
//! use registry_core::model::{ModelManager, repository::RepositoryBmc};
//! use registry_core::ctx::Ctx;
//!
//! async fn example(mm: &ModelManager) -> registry_core::Result<()> {
//!     let ctx = Ctx::system();
//!     let repos = RepositoryBmc::list_all(&ctx, mm).await?;
//!     println!("Found {} repositories", repos.len());
//!     Ok(())
//! }
//! ```

/// Request context for attributing model-layer calls.
pub mod ctx;

/// Error types and Result alias for registry-core operations.
pub mod error;

/// Backend Model Controllers (BMC) and data models for all entities.
pub mod model;

/// Low-level storage operations: the DB pool and the pluggable ports.
pub mod store;

/// Shared domain types: identifiers and small state enums.
pub mod types;

/// Utility functions and helpers.
pub mod utils;

pub use ctx::Ctx;
pub use error::{Error, Result};
pub use model::ModelManager;
