//! Error types for registry-core operations.
//!
//! Errors are categorized by source: external errors wrapped via `#[from]`,
//! generic internal errors, and entity-specific not-found variants.

use thiserror::Error;

/// The error type for registry-core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Database error from libsql.
    #[error("database error: {0}")]
    Libsql(#[from] libsql::Error),

    /// JSON serialization/deserialization error.
    #[error("serde_json error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// Standard I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic entity not found error.
    #[error("entity not found")]
    NotFound,

    /// Input validation error.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Authentication failure.
    #[error("authentication failed")]
    AuthError,

    /// Repository lookup failed.
    #[error("repository not found: {0}")]
    RepositoryNotFound(String),

    /// Token lookup failed.
    #[error("token not found")]
    TokenNotFound,

    /// Package version lookup failed.
    #[error("package version not found: {0} {1}")]
    PackageVersionNotFound(String, String),

    /// Artifact lookup failed by (name, version).
    #[error("artifact not found: {0} {1}")]
    ArtifactNotFound(String, String),

    /// Artifact lookup failed by row id.
    #[error("artifact not found: id {0}")]
    ArtifactNotFoundById(i64),

    /// Mutation attempted against the protected `packagist` repository.
    #[error("the packagist repository cannot be modified")]
    ProtectedRepository,

    /// AES-GCM encryption of credentials failed.
    #[error("credential encryption failed")]
    EncryptionError,

    /// AES-GCM decryption of credentials failed (wrong key or corrupt ciphertext).
    #[error("credential decryption failed")]
    DecryptionError,

    /// A stored or requested blob storage key did not match the expected shape.
    #[error("invalid storage key: {0}")]
    InvalidStorageKey(String),

    /// Validation error with a structured reason.
    #[error("validation error: {0}")]
    Validation(#[from] crate::utils::validation::ValidationError),
}

/// A specialized [`Result`] type for registry-core operations.
pub type Result<T> = core::result::Result<T, Error>;
