//! Input validation for package identifiers and other user-facing strings.

#![allow(clippy::expect_used)]

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

lazy_static! {
    /// `vendor/package` form: lowercase alphanumerics, with single
    /// `.`, `_`, or `-` separators allowed mid-segment.
    static ref PACKAGE_NAME_RE: Regex =
        Regex::new(r"^[a-z0-9]([_.-]?[a-z0-9]+)*/[a-z0-9]([_.-]?[a-z0-9]+)*$")
            .expect("valid regex pattern");
    static ref REPOSITORY_ID_RE: Regex =
        Regex::new(r"^[a-zA-Z0-9_-]{1,64}$").expect("valid regex pattern");
}

/// Input validation errors with a recovery hint, mirroring the shape
/// callers surface back to API clients.
#[derive(Debug, Clone, thiserror::Error, Serialize)]
pub enum ValidationError {
    #[error("Package name must be of the form vendor/package, got: {provided}")]
    InvalidPackageName { provided: String },

    #[error("Version string must not be empty")]
    InvalidVersion { provided: String },

    #[error("Repository id must match ^[a-zA-Z0-9_-]{{1,64}}$, got: {provided}")]
    InvalidRepositoryId { provided: String },

    #[error("Repository url must be http(s) or a git URL, got: {provided}")]
    InvalidRepositoryUrl { provided: String },
}

impl ValidationError {
    pub fn context(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Validates a Composer-style `vendor/package` name.
pub fn validate_package_name(name: &str) -> Result<(), ValidationError> {
    if PACKAGE_NAME_RE.is_match(name) {
        return Ok(());
    }
    Err(ValidationError::InvalidPackageName {
        provided: name.to_string(),
    })
}

/// Validates a version string. Version parsing is intentionally lenient
/// (see [`crate::utils::version`]); this only rejects the empty string
/// and embedded whitespace, which can never form a meaningful version.
pub fn validate_version(version: &str) -> Result<(), ValidationError> {
    if !version.is_empty() && !version.chars().any(char::is_whitespace) {
        return Ok(());
    }
    Err(ValidationError::InvalidVersion {
        provided: version.to_string(),
    })
}

/// Validates a repository id (the DB primary key / URL path segment).
pub fn validate_repository_id(id: &str) -> Result<(), ValidationError> {
    if REPOSITORY_ID_RE.is_match(id) {
        return Ok(());
    }
    Err(ValidationError::InvalidRepositoryId {
        provided: id.to_string(),
    })
}

/// Validates a repository URL is http(s) or an `ssh://`/`git@` form.
pub fn validate_repository_url(url: &str) -> Result<(), ValidationError> {
    let ok = url.starts_with("http://")
        || url.starts_with("https://")
        || url.starts_with("ssh://")
        || url.starts_with("git@");
    if ok {
        return Ok(());
    }
    Err(ValidationError::InvalidRepositoryUrl {
        provided: url.to_string(),
    })
}
