//! The Index Assembler: answers `GET /packages.json` from the
//! enumerated set of versions this mirror has already discovered, sweeping
//! any `pending` repository into a sync job on the way past.

use std::time::Duration;

use serde_json::Value;

use registry_core::Ctx;
use registry_core::ModelManager;
use registry_core::model::package_version::{PackageVersion, PackageVersionBmc};
use registry_core::model::repository::RepositoryBmc;

use crate::error::{Result, ServerError};
use crate::job::{Job, JobProcessor};
use crate::metadata::{has_live_upstream, sanitize_version};

const INDEX_CACHE_TTL: Duration = Duration::from_secs(300);
const INDEX_KEY: &str = "packages:all:packages.json";
const INDEX_META_KEY: &str = "packages:all:packages.json:metadata";

pub struct IndexResult {
    pub body: Vec<u8>,
    pub last_modified_ms: i64,
    pub not_modified: bool,
}

/// Assembles the full package index, honoring `If-Modified-Since`. Every
/// call sweeps `pending` repositories into a `RepositorySync` job first —
/// cheap when, as is the common case, there are none.
///
/// While any Composer-style upstream is active or public mirroring is
/// enabled, returns the lazy-URL skeleton instead of an enumerated index:
/// clients fetch each package's versions from `/p2/{package}.json` on
/// demand rather than downloading every discovered version up front.
pub async fn get_index(mm: &ModelManager, jobs: &JobProcessor, if_modified_since_ms: Option<i64>) -> Result<IndexResult> {
    sweep_pending_repositories(mm, jobs).await.map_err(ServerError::Core)?;

    if let Some(meta_json) = mm.kv_cache.get(INDEX_META_KEY).await.map_err(ServerError::Core)? {
        let last_modified_ms = parse_last_modified(&meta_json).unwrap_or(0);
        if let Some(client_ms) = if_modified_since_ms {
            if last_modified_ms <= client_ms {
                return Ok(IndexResult { body: Vec::new(), last_modified_ms, not_modified: true });
            }
        }
        if let Some(body) = mm.kv_cache.get(INDEX_KEY).await.map_err(ServerError::Core)? {
            return Ok(IndexResult { body: body.into_bytes(), last_modified_ms, not_modified: false });
        }
    }

    let doc = if has_live_upstream(mm).await? {
        lazy_index_skeleton()
    } else {
        let ctx = Ctx::system();
        let rows = PackageVersionBmc::list_all(&ctx, mm).await.map_err(ServerError::Core)?;
        assemble_index(&rows)
    };
    let last_modified_ms = mm.clock.now_ms();

    let body = doc.to_string();
    let _ = mm.kv_cache.put(INDEX_KEY, body.clone(), Some(INDEX_CACHE_TTL)).await;
    let meta = serde_json::json!({ "lastModified": last_modified_ms }).to_string();
    let _ = mm.kv_cache.put(INDEX_META_KEY, meta, Some(INDEX_CACHE_TTL)).await;

    Ok(IndexResult { body: body.into_bytes(), last_modified_ms, not_modified: false })
}

/// The Composer lazy-provider index: no enumerated packages, just the
/// templates clients substitute `%package%`/`%version%` into to fetch
/// metadata and dist archives on demand.
fn lazy_index_skeleton() -> Value {
    serde_json::json!({
        "packages": {},
        "providers-lazy-url": "/p2/%package%.json",
        "metadata-url": "/p2/%package%.json",
        "mirrors": [
            { "dist-url": "/dist/m/%package%/%version%.zip", "preferred": true }
        ]
    })
}

fn parse_last_modified(meta_json: &str) -> Option<i64> {
    serde_json::from_str::<Value>(meta_json)
        .ok()
        .and_then(|v| v.get("lastModified").and_then(Value::as_i64))
}

async fn sweep_pending_repositories(mm: &ModelManager, jobs: &JobProcessor) -> registry_core::Result<()> {
    let ctx = Ctx::system();
    let pending = RepositoryBmc::list_pending(&ctx, mm).await?;
    if pending.is_empty() {
        return Ok(());
    }

    let sync_jobs = pending.into_iter().map(|r| Job::RepositorySync { repo_id: r.id }).collect();
    jobs.enqueue_all(sync_jobs).await;

    for key in [INDEX_KEY, INDEX_META_KEY] {
        let _ = mm.kv_cache.delete(key).await;
    }
    Ok(())
}

/// Every row becomes one `{name: {version: entry}}` leaf, its `dist.url`
/// already the unified `/dist/m/{name}/{version}.zip` proxy route since
/// that's what the sync engine persisted.
fn assemble_index(rows: &[PackageVersion]) -> Value {
    let mut packages = serde_json::Map::new();
    for row in rows {
        let mut entry: Value = serde_json::from_str(&row.metadata_json).unwrap_or_else(|_| serde_json::json!({}));
        sanitize_version(&mut entry);
        if let Some(obj) = entry.as_object_mut() {
            obj.insert("name".to_string(), serde_json::json!(row.name));
            obj.insert("version".to_string(), serde_json::json!(row.version));
            obj.insert(
                "dist".to_string(),
                serde_json::json!({
                    "type": "zip",
                    "url": row.proxy_dist_url,
                    "reference": row.dist_reference,
                }),
            );
        }

        let versions = packages
            .entry(row.name.clone())
            .or_insert_with(|| serde_json::json!({}));
        if let Some(versions_obj) = versions.as_object_mut() {
            versions_obj.insert(row.version.clone(), entry);
        }
    }
    serde_json::json!({ "packages": Value::Object(packages) })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row(name: &str, version: &str) -> PackageVersion {
        PackageVersion {
            id: 1,
            repo_id: "packagist".to_string(),
            name: name.to_string(),
            version: version.to_string(),
            proxy_dist_url: format!("/dist/m/{name}/{version}.zip"),
            source_dist_url: None,
            dist_reference: Some("abc".to_string()),
            metadata_json: "{}".to_string(),
            description: None,
            license_json: None,
            r#type: None,
            homepage: None,
            released_at: None,
            created_at: 0,
        }
    }

    #[test]
    fn assembles_multiple_versions_under_one_name() {
        let rows = vec![sample_row("vendor/pkg", "1.0.0"), sample_row("vendor/pkg", "1.1.0")];
        let doc = assemble_index(&rows);
        let versions = doc["packages"]["vendor/pkg"].as_object().unwrap();
        assert_eq!(versions.len(), 2);
        assert!(versions.contains_key("1.0.0"));
        assert!(versions.contains_key("1.1.0"));
    }

    #[test]
    fn dist_url_is_already_the_unified_proxy_route() {
        let rows = vec![sample_row("vendor/pkg", "1.0.0")];
        let doc = assemble_index(&rows);
        assert_eq!(
            doc["packages"]["vendor/pkg"]["1.0.0"]["dist"]["url"],
            serde_json::json!("/dist/m/vendor/pkg/1.0.0.zip")
        );
    }

    #[tokio::test]
    async fn get_index_roundtrips_through_db_when_kv_is_empty() {
        let mm = ModelManager::new_for_test().await.unwrap();
        let jobs = JobProcessor::new(mm.clone());
        let ctx = Ctx::system();

        // No active Composer upstream and mirroring off: the enumerated,
        // DB-backed form applies instead of the lazy-URL skeleton.
        mm.kv_cache.put("settings:packagist_mirroring_enabled", "false".to_string(), None).await.unwrap();

        PackageVersionBmc::upsert(
            &ctx,
            &mm,
            registry_core::model::package_version::PackageVersionForUpsert {
                repo_id: "packagist".to_string(),
                name: "vendor/pkg".to_string(),
                version: "1.0.0".to_string(),
                proxy_dist_url: "/dist/m/vendor/pkg/1.0.0.zip".to_string(),
                source_dist_url: None,
                dist_reference: Some("abc".to_string()),
                metadata_json: "{}".to_string(),
                description: None,
                license_json: None,
                r#type: None,
                homepage: None,
                released_at: Some(0),
            },
        )
        .await
        .unwrap();

        let result = get_index(&mm, &jobs, None).await.unwrap();
        let doc: Value = serde_json::from_slice(&result.body).unwrap();
        assert!(doc["packages"]["vendor/pkg"]["1.0.0"].is_object());
    }

    #[tokio::test]
    async fn not_modified_when_client_is_current() {
        let mm = ModelManager::new_for_test().await.unwrap();
        let jobs = JobProcessor::new(mm.clone());
        let first = get_index(&mm, &jobs, None).await.unwrap();
        let second = get_index(&mm, &jobs, Some(first.last_modified_ms)).await.unwrap();
        assert!(second.not_modified);
        assert!(second.body.is_empty());
    }

    #[tokio::test]
    async fn mirroring_enabled_by_default_serves_lazy_skeleton() {
        let mm = ModelManager::new_for_test().await.unwrap();
        let jobs = JobProcessor::new(mm.clone());

        let result = get_index(&mm, &jobs, None).await.unwrap();
        let doc: Value = serde_json::from_slice(&result.body).unwrap();
        assert_eq!(doc["packages"], serde_json::json!({}));
        assert_eq!(doc["providers-lazy-url"], serde_json::json!("/p2/%package%.json"));
        assert!(doc["mirrors"].is_array());
    }
}
