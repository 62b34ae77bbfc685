//! Shared domain types: newtypes for identifiers and the small enums that
//! describe repository/token state, following a one-newtype-per-identifier
//! convention.
//!
//! # Example
//!
//! ```
//! use registry_core::types::UnixSeconds;
//!
//! let t = UnixSeconds::new(1_700_000_000);
//! assert_eq!(t.get(), 1_700_000_000);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// A point in time expressed as seconds since the Unix epoch. Stored as
/// `INTEGER` in SQLite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnixSeconds(pub i64);

impl UnixSeconds {
    #[inline]
    pub const fn new(secs: i64) -> Self {
        Self(secs)
    }

    #[inline]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for UnixSeconds {
    fn from(v: i64) -> Self {
        Self(v)
    }
}

impl From<UnixSeconds> for i64 {
    fn from(v: UnixSeconds) -> Self {
        v.0
    }
}

impl fmt::Display for UnixSeconds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The well-known id of the singleton public-registry repository.
///
/// This repository may not be deleted or edited through external
/// interfaces, and is auto-created on first use.
pub const PACKAGIST_REPO_ID: &str = "packagist";

/// Where a [`crate::model::repository::Repository`]'s packages come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Git,
    Composer,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Git => "git",
            SourceKind::Composer => "composer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "git" => Some(SourceKind::Git),
            "composer" => Some(SourceKind::Composer),
            _ => None,
        }
    }
}

/// How a repository's upstream requests are authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    #[default]
    None,
    HttpBasic,
    GitToken,
}

impl CredentialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKind::None => "none",
            CredentialKind::HttpBasic => "http_basic",
            CredentialKind::GitToken => "git_token",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(CredentialKind::None),
            "http_basic" => Some(CredentialKind::HttpBasic),
            "git_token" => Some(CredentialKind::GitToken),
            _ => None,
        }
    }
}

/// Lifecycle state of a [`crate::model::repository::Repository`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryStatus {
    Pending,
    Syncing,
    Active,
    Error,
}

impl RepositoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepositoryStatus::Pending => "pending",
            RepositoryStatus::Syncing => "syncing",
            RepositoryStatus::Active => "active",
            RepositoryStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RepositoryStatus::Pending),
            "syncing" => Some(RepositoryStatus::Syncing),
            "active" => Some(RepositoryStatus::Active),
            "error" => Some(RepositoryStatus::Error),
            _ => None,
        }
    }
}

/// What a [`crate::model::token::Token`] is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Permissions {
    #[default]
    Readonly,
    Write,
}

impl Permissions {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permissions::Readonly => "readonly",
            Permissions::Write => "write",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "readonly" => Some(Permissions::Readonly),
            "write" => Some(Permissions::Write),
            _ => None,
        }
    }
}
