//! Artifacts: bytes associated with a package version, at most one row
//! per `(repo_id, name, version)`.

use serde::Serialize;

use crate::ctx::Ctx;
use crate::model::ModelManager;
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    pub id: i64,
    pub repo_id: String,
    pub name: String,
    pub version: String,
    pub storage_key: String,
    pub size_bytes: Option<i64>,
    pub download_count: i64,
    pub last_downloaded_at: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct ArtifactForUpsert {
    pub repo_id: String,
    pub name: String,
    pub version: String,
    pub storage_key: String,
    pub size_bytes: Option<i64>,
}

pub struct ArtifactBmc;

impl ArtifactBmc {
    pub async fn upsert(ctx: &Ctx, mm: &ModelManager, a: ArtifactForUpsert) -> Result<Artifact> {
        let db = mm.db();
        let now = mm.clock.now();

        let stmt = db
            .prepare(
                "INSERT INTO artifacts (repo_id, name, version, storage_key, size_bytes, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(repo_id, name, version) DO UPDATE SET \
                   storage_key = excluded.storage_key, \
                   size_bytes = excluded.size_bytes",
            )
            .await?;
        stmt.execute((
            a.repo_id.clone(),
            a.name.clone(),
            a.version.clone(),
            a.storage_key,
            a.size_bytes,
            now,
        ))
        .await?;

        Self::get_by_repo_name_version(ctx, mm, &a.repo_id, &a.name, &a.version)
            .await?
            .ok_or_else(|| Error::ArtifactNotFound(a.name, a.version))
    }

    pub async fn get(_ctx: &Ctx, mm: &ModelManager, id: i64) -> Result<Artifact> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT id, repo_id, name, version, storage_key, size_bytes, download_count, last_downloaded_at, created_at \
                 FROM artifacts WHERE id = ?",
            )
            .await?;
        let mut rows = stmt.query([id]).await?;
        if let Some(row) = rows.next().await? {
            Self::from_row(row)
        } else {
            Err(Error::ArtifactNotFoundById(id))
        }
    }

    pub async fn get_by_repo_name_version(
        _ctx: &Ctx,
        mm: &ModelManager,
        repo_id: &str,
        name: &str,
        version: &str,
    ) -> Result<Option<Artifact>> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT id, repo_id, name, version, storage_key, size_bytes, download_count, last_downloaded_at, created_at \
                 FROM artifacts WHERE repo_id = ? AND name = ? AND version = ?",
            )
            .await?;
        let mut rows = stmt.query((repo_id, name, version)).await?;
        if let Some(row) = rows.next().await? {
            Ok(Some(Self::from_row(row)?))
        } else {
            Ok(None)
        }
    }

    /// Bumps `download_count` by one and sets `last_downloaded_at = ts`.
    /// Monotonic under duplicate delivery: every call increments, so a
    /// small over-count from at-least-once queue semantics is tolerated
    /// by design.
    pub async fn record_download(_ctx: &Ctx, mm: &ModelManager, id: i64, ts: i64) -> Result<()> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "UPDATE artifacts SET download_count = download_count + 1, last_downloaded_at = ? WHERE id = ?",
            )
            .await?;
        let affected = stmt.execute((ts, id)).await?;
        if affected == 0 {
            return Err(Error::ArtifactNotFoundById(id));
        }
        Ok(())
    }

    fn from_row(row: libsql::Row) -> Result<Artifact> {
        Ok(Artifact {
            id: row.get(0)?,
            repo_id: row.get(1)?,
            name: row.get(2)?,
            version: row.get(3)?,
            storage_key: row.get(4)?,
            size_bytes: row.get(5)?,
            download_count: row.get(6)?,
            last_downloaded_at: row.get(7)?,
            created_at: row.get(8)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(repo_id: &str, name: &str, version: &str) -> ArtifactForUpsert {
        ArtifactForUpsert {
            repo_id: repo_id.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            storage_key: format!("public/{repo_id}/{name}/{version}.zip"),
            size_bytes: Some(1024),
        }
    }

    #[tokio::test]
    async fn upsert_is_unique_per_repo_name_version() {
        let mm = ModelManager::new_for_test().await.unwrap();
        let ctx = Ctx::system();
        let first = ArtifactBmc::upsert(&ctx, &mm, sample("packagist", "vendor/pkg", "1.0.0"))
            .await
            .unwrap();
        let second = ArtifactBmc::upsert(&ctx, &mm, sample("packagist", "vendor/pkg", "1.0.0"))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn download_count_is_monotone() {
        let mm = ModelManager::new_for_test().await.unwrap();
        let ctx = Ctx::system();
        let a = ArtifactBmc::upsert(&ctx, &mm, sample("packagist", "vendor/pkg", "1.0.0"))
            .await
            .unwrap();
        assert_eq!(a.download_count, 0);

        ArtifactBmc::record_download(&ctx, &mm, a.id, 100).await.unwrap();
        ArtifactBmc::record_download(&ctx, &mm, a.id, 200).await.unwrap();
        let updated = ArtifactBmc::get(&ctx, &mm, a.id).await.unwrap();
        assert_eq!(updated.download_count, 2);
        assert_eq!(updated.last_downloaded_at, Some(200));
    }

    #[tokio::test]
    async fn record_download_on_unknown_id_errors() {
        let mm = ModelManager::new_for_test().await.unwrap();
        let ctx = Ctx::system();
        let err = ArtifactBmc::record_download(&ctx, &mm, 9999, 1).await.unwrap_err();
        assert!(matches!(err, Error::ArtifactNotFoundById(_)));
    }

    #[tokio::test]
    async fn get_by_repo_name_version_misses_cleanly() {
        let mm = ModelManager::new_for_test().await.unwrap();
        let ctx = Ctx::system();
        let found = ArtifactBmc::get_by_repo_name_version(&ctx, &mm, "packagist", "a/b", "1.0.0")
            .await
            .unwrap();
        assert!(found.is_none());
    }
}
