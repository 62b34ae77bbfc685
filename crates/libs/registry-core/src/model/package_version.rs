//! Package versions: one cached `(name, version)` metadata record per row.

use serde::Serialize;

use crate::ctx::Ctx;
use crate::model::ModelManager;
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize)]
pub struct PackageVersion {
    pub id: i64,
    pub repo_id: String,
    pub name: String,
    pub version: String,
    pub proxy_dist_url: String,
    pub source_dist_url: Option<String>,
    pub dist_reference: Option<String>,
    pub metadata_json: String,
    pub description: Option<String>,
    pub license_json: Option<String>,
    pub r#type: Option<String>,
    pub homepage: Option<String>,
    pub released_at: Option<i64>,
    pub created_at: i64,
}

/// Input to [`PackageVersionBmc::upsert`]. `created_at` is only used on
/// first insert — upsert preserves the original first-seen timestamp.
#[derive(Debug, Clone)]
pub struct PackageVersionForUpsert {
    pub repo_id: String,
    pub name: String,
    pub version: String,
    pub proxy_dist_url: String,
    pub source_dist_url: Option<String>,
    pub dist_reference: Option<String>,
    pub metadata_json: String,
    pub description: Option<String>,
    pub license_json: Option<String>,
    pub r#type: Option<String>,
    pub homepage: Option<String>,
    pub released_at: Option<i64>,
}

pub struct PackageVersionBmc;

impl PackageVersionBmc {
    /// Upserts on `(name, version)`, preserving `created_at` across
    /// re-inserts.
    pub async fn upsert(ctx: &Ctx, mm: &ModelManager, pv: PackageVersionForUpsert) -> Result<PackageVersion> {
        let db = mm.db();
        let now = mm.clock.now();

        let stmt = db
            .prepare(
                "INSERT INTO packages (repo_id, name, version, proxy_dist_url, source_dist_url, dist_reference, metadata_json, description, license_json, type, homepage, released_at, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(name, version) DO UPDATE SET \
                   repo_id = excluded.repo_id, \
                   proxy_dist_url = excluded.proxy_dist_url, \
                   source_dist_url = excluded.source_dist_url, \
                   dist_reference = excluded.dist_reference, \
                   metadata_json = excluded.metadata_json, \
                   description = excluded.description, \
                   license_json = excluded.license_json, \
                   type = excluded.type, \
                   homepage = excluded.homepage, \
                   released_at = excluded.released_at",
            )
            .await?;
        stmt.execute((
            pv.repo_id,
            pv.name.clone(),
            pv.version.clone(),
            pv.proxy_dist_url,
            pv.source_dist_url,
            pv.dist_reference,
            pv.metadata_json,
            pv.description,
            pv.license_json,
            pv.r#type,
            pv.homepage,
            pv.released_at,
            now,
        ))
        .await?;

        Self::get(ctx, mm, &pv.name, &pv.version).await
    }

    pub async fn get(_ctx: &Ctx, mm: &ModelManager, name: &str, version: &str) -> Result<PackageVersion> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT id, repo_id, name, version, proxy_dist_url, source_dist_url, dist_reference, metadata_json, description, license_json, type, homepage, released_at, created_at \
                 FROM packages WHERE name = ? AND version = ?",
            )
            .await?;
        let mut rows = stmt.query((name, version)).await?;
        if let Some(row) = rows.next().await? {
            Self::from_row(row)
        } else {
            Err(Error::PackageVersionNotFound(name.to_string(), version.to_string()))
        }
    }

    /// All cached versions of `name`, used to answer `get_package_metadata`
    /// from the DB tier.
    pub async fn list_by_name(_ctx: &Ctx, mm: &ModelManager, name: &str) -> Result<Vec<PackageVersion>> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT id, repo_id, name, version, proxy_dist_url, source_dist_url, dist_reference, metadata_json, description, license_json, type, homepage, released_at, created_at \
                 FROM packages WHERE name = ? ORDER BY created_at ASC",
            )
            .await?;
        let mut rows = stmt.query([name]).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(Self::from_row(row)?);
        }
        Ok(out)
    }

    /// All versions, for the enumerated index form.
    pub async fn list_all(_ctx: &Ctx, mm: &ModelManager) -> Result<Vec<PackageVersion>> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT id, repo_id, name, version, proxy_dist_url, source_dist_url, dist_reference, metadata_json, description, license_json, type, homepage, released_at, created_at \
                 FROM packages ORDER BY name ASC, created_at ASC",
            )
            .await?;
        let mut rows = stmt.query(()).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(Self::from_row(row)?);
        }
        Ok(out)
    }

    /// Which repository owns `(name, version)` — used by the unified
    /// `/dist/m/...` artifact route to resolve `repo_id`.
    pub async fn find_repo_for_version(_ctx: &Ctx, mm: &ModelManager, name: &str, version: &str) -> Result<Option<String>> {
        let db = mm.db();
        let stmt = db
            .prepare("SELECT repo_id FROM packages WHERE name = ? AND version = ?")
            .await?;
        let mut rows = stmt.query((name, version)).await?;
        if let Some(row) = rows.next().await? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    }

    fn from_row(row: libsql::Row) -> Result<PackageVersion> {
        Ok(PackageVersion {
            id: row.get(0)?,
            repo_id: row.get(1)?,
            name: row.get(2)?,
            version: row.get(3)?,
            proxy_dist_url: row.get(4)?,
            source_dist_url: row.get(5)?,
            dist_reference: row.get(6)?,
            metadata_json: row.get(7)?,
            description: row.get(8)?,
            license_json: row.get(9)?,
            r#type: row.get(10)?,
            homepage: row.get(11)?,
            released_at: row.get(12)?,
            created_at: row.get(13)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(repo_id: &str, name: &str, version: &str) -> PackageVersionForUpsert {
        PackageVersionForUpsert {
            repo_id: repo_id.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            proxy_dist_url: format!("/dist/m/{name}/{version}.zip"),
            source_dist_url: None,
            dist_reference: None,
            metadata_json: "{}".to_string(),
            description: None,
            license_json: None,
            r#type: Some("library".to_string()),
            homepage: None,
            released_at: None,
        }
    }

    #[tokio::test]
    async fn upsert_then_get() {
        let mm = ModelManager::new_for_test().await.unwrap();
        let ctx = Ctx::system();
        let pv = PackageVersionBmc::upsert(&ctx, &mm, sample("packagist", "vendor/pkg", "1.0.0"))
            .await
            .unwrap();
        assert_eq!(pv.name, "vendor/pkg");
        assert_eq!(pv.version, "1.0.0");
    }

    #[tokio::test]
    async fn reinsert_is_no_duplicate_and_preserves_created_at() {
        let mm = ModelManager::new_for_test().await.unwrap();
        let ctx = Ctx::system();
        let first = PackageVersionBmc::upsert(&ctx, &mm, sample("packagist", "vendor/pkg", "1.0.0"))
            .await
            .unwrap();
        let second = PackageVersionBmc::upsert(&ctx, &mm, sample("packagist", "vendor/pkg", "1.0.0"))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);

        let all = PackageVersionBmc::list_by_name(&ctx, &mm, "vendor/pkg").await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn unknown_version_not_found() {
        let mm = ModelManager::new_for_test().await.unwrap();
        let ctx = Ctx::system();
        let err = PackageVersionBmc::get(&ctx, &mm, "vendor/pkg", "9.9.9").await.unwrap_err();
        assert!(matches!(err, Error::PackageVersionNotFound(_, _)));
    }

    #[tokio::test]
    async fn find_repo_for_version_resolves_owner() {
        let mm = ModelManager::new_for_test().await.unwrap();
        let ctx = Ctx::system();
        PackageVersionBmc::upsert(&ctx, &mm, sample("my-repo", "vendor/pkg", "2.0.0"))
            .await
            .unwrap();
        let repo = PackageVersionBmc::find_repo_for_version(&ctx, &mm, "vendor/pkg", "2.0.0")
            .await
            .unwrap();
        assert_eq!(repo, Some("my-repo".to_string()));
    }
}
