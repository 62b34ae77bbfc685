//! Repositories: configured upstream sources for packages.

use serde::{Deserialize, Serialize};

use crate::ctx::Ctx;
use crate::model::ModelManager;
use crate::types::{CredentialKind, RepositoryStatus, SourceKind, PACKAGIST_REPO_ID};
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize)]
pub struct Repository {
    pub id: String,
    pub url: String,
    pub source_kind: String,
    pub credential_kind: String,
    pub credentials_ciphertext: Option<String>,
    pub filter: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub last_synced_at: Option<i64>,
    pub created_at: i64,
}

impl Repository {
    /// Is this the singleton well-known public registry?
    pub fn is_packagist(&self) -> bool {
        self.id == PACKAGIST_REPO_ID
    }

    /// The package-name filter, parsed from its comma-list storage form.
    pub fn filter_list(&self) -> Option<Vec<String>> {
        self.filter
            .as_ref()
            .map(|f| f.split(',').map(|s| s.trim().to_string()).collect())
    }
}

#[derive(Debug, Deserialize)]
pub struct RepositoryForCreate {
    pub id: String,
    pub url: String,
    pub source_kind: SourceKind,
    #[serde(default)]
    pub credential_kind: CredentialKind,
    /// Already-encrypted credentials (see [`crate::utils::crypto`]); the
    /// BMC never sees plaintext secrets.
    #[serde(default)]
    pub credentials_ciphertext: Option<String>,
    #[serde(default)]
    pub filter: Option<String>,
}

/// Fields an operator may edit through the admin API.
#[derive(Debug, Deserialize, Default)]
pub struct RepositoryForUpdate {
    pub url: Option<String>,
    pub credential_kind: Option<CredentialKind>,
    pub credentials_ciphertext: Option<String>,
    pub filter: Option<String>,
}

pub struct RepositoryBmc;

impl RepositoryBmc {
    pub async fn create(
        _ctx: &Ctx,
        mm: &ModelManager,
        repo_c: RepositoryForCreate,
    ) -> Result<Repository> {
        let db = mm.db();
        let now = mm.clock.now();

        let stmt = db
            .prepare(
                "INSERT INTO repositories (id, url, source_kind, credential_kind, credentials_ciphertext, filter, status, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, 'pending', ?)",
            )
            .await?;
        stmt.execute((
            repo_c.id.clone(),
            repo_c.url,
            repo_c.source_kind.as_str(),
            repo_c.credential_kind.as_str(),
            repo_c.credentials_ciphertext,
            repo_c.filter,
            now,
        ))
        .await?;

        Self::get(_ctx, mm, &repo_c.id).await
    }

    pub async fn get(_ctx: &Ctx, mm: &ModelManager, id: &str) -> Result<Repository> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT id, url, source_kind, credential_kind, credentials_ciphertext, filter, status, error_message, last_synced_at, created_at \
                 FROM repositories WHERE id = ?",
            )
            .await?;
        let mut rows = stmt.query([id]).await?;
        if let Some(row) = rows.next().await? {
            Self::from_row(row)
        } else {
            Err(Error::RepositoryNotFound(id.to_string()))
        }
    }

    pub async fn list_all(_ctx: &Ctx, mm: &ModelManager) -> Result<Vec<Repository>> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT id, url, source_kind, credential_kind, credentials_ciphertext, filter, status, error_message, last_synced_at, created_at \
                 FROM repositories ORDER BY created_at ASC",
            )
            .await?;
        let mut rows = stmt.query(()).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(Self::from_row(row)?);
        }
        Ok(out)
    }

    pub async fn list_pending(_ctx: &Ctx, mm: &ModelManager) -> Result<Vec<Repository>> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT id, url, source_kind, credential_kind, credentials_ciphertext, filter, status, error_message, last_synced_at, created_at \
                 FROM repositories WHERE status = 'pending'",
            )
            .await?;
        let mut rows = stmt.query(()).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(Self::from_row(row)?);
        }
        Ok(out)
    }

    /// Edits operator-visible fields. Rejects the `packagist` singleton.
    pub async fn update(
        ctx: &Ctx,
        mm: &ModelManager,
        id: &str,
        update: RepositoryForUpdate,
    ) -> Result<Repository> {
        if id == PACKAGIST_REPO_ID {
            return Err(Error::ProtectedRepository);
        }
        let existing = Self::get(ctx, mm, id).await?;
        let url = update.url.unwrap_or(existing.url);
        let credential_kind = update
            .credential_kind
            .map(|k| k.as_str().to_string())
            .unwrap_or(existing.credential_kind);
        let credentials_ciphertext = update
            .credentials_ciphertext
            .or(existing.credentials_ciphertext);
        let filter = update.filter.or(existing.filter);

        let db = mm.db();
        let stmt = db
            .prepare(
                "UPDATE repositories SET url = ?, credential_kind = ?, credentials_ciphertext = ?, filter = ? WHERE id = ?",
            )
            .await?;
        stmt.execute((url, credential_kind, credentials_ciphertext, filter, id))
            .await?;
        Self::get(ctx, mm, id).await
    }

    /// Sets sync status. Used by the Sync Engine; not subject to the
    /// `packagist` protection invariant (system-driven status transitions
    /// are how the singleton participates in lazy sync at all).
    pub async fn set_status(
        _ctx: &Ctx,
        mm: &ModelManager,
        id: &str,
        status: RepositoryStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let db = mm.db();
        let stmt = db
            .prepare("UPDATE repositories SET status = ?, error_message = ? WHERE id = ?")
            .await?;
        stmt.execute((status.as_str(), error_message, id)).await?;
        Ok(())
    }

    pub async fn mark_synced(_ctx: &Ctx, mm: &ModelManager, id: &str, ts: i64) -> Result<()> {
        let db = mm.db();
        let stmt = db
            .prepare("UPDATE repositories SET last_synced_at = ? WHERE id = ?")
            .await?;
        stmt.execute((ts, id)).await?;
        Ok(())
    }

    /// Deletes a repository, cascading to its packages and artifacts.
    /// Rejects the `packagist` singleton.
    pub async fn delete(_ctx: &Ctx, mm: &ModelManager, id: &str) -> Result<()> {
        if id == PACKAGIST_REPO_ID {
            return Err(Error::ProtectedRepository);
        }
        let db = mm.db();
        let stmt = db.prepare("DELETE FROM repositories WHERE id = ?").await?;
        let affected = stmt.execute([id]).await?;
        if affected == 0 {
            return Err(Error::RepositoryNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Creates the `packagist` singleton if it does not already exist.
    /// Idempotent; safe to call on every boot and on public-mirror misses.
    pub async fn ensure_packagist_exists(ctx: &Ctx, mm: &ModelManager) -> Result<Repository> {
        match Self::get(ctx, mm, PACKAGIST_REPO_ID).await {
            Ok(repo) => Ok(repo),
            Err(Error::RepositoryNotFound(_)) => {
                Self::create(
                    ctx,
                    mm,
                    RepositoryForCreate {
                        id: PACKAGIST_REPO_ID.to_string(),
                        url: "https://repo.packagist.org".to_string(),
                        source_kind: SourceKind::Composer,
                        credential_kind: CredentialKind::None,
                        credentials_ciphertext: None,
                        filter: None,
                    },
                )
                .await
            }
            Err(e) => Err(e),
        }
    }

    fn from_row(row: libsql::Row) -> Result<Repository> {
        Ok(Repository {
            id: row.get(0)?,
            url: row.get(1)?,
            source_kind: row.get(2)?,
            credential_kind: row.get(3)?,
            credentials_ciphertext: row.get(4)?,
            filter: row.get(5)?,
            status: row.get(6)?,
            error_message: row.get(7)?,
            last_synced_at: row.get(8)?,
            created_at: row.get(9)?,
        })
    }
}
