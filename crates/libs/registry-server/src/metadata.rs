//! The Metadata Resolver: answers `GET /p2/{vendor}/{package}.json`
//! from KV, then DB, then an authenticated upstream fetch, rewriting every
//! `dist.url` to point back at this proxy before the document ever leaves.

use std::time::Duration;

use serde_json::Value;

use registry_core::Ctx;
use registry_core::ModelManager;
use registry_core::model::package_version::{PackageVersion, PackageVersionBmc, PackageVersionForUpsert};
use registry_core::model::repository::RepositoryBmc;
use registry_core::types::{RepositoryStatus, SourceKind};

use crate::error::{Result, ServerError};
use crate::sync::{apply_auth, http_client};

const METADATA_CACHE_TTL: Duration = Duration::from_secs(300);

const OBJECT_FIELDS: &[&str] = &[
    "require",
    "require-dev",
    "suggest",
    "provide",
    "replace",
    "conflict",
    "autoload",
    "autoload-dev",
    "extra",
    "repositories",
];
const ARRAY_FIELDS: &[&str] = &["bin", "license", "authors", "keywords", "include-path"];

const SENTINEL: &str = "__unset";

pub struct MetadataResult {
    pub body: Vec<u8>,
    pub last_modified_ms: i64,
    pub not_modified: bool,
}

/// Resolves one package's `p2` document through the three-tier cache,
/// honoring `If-Modified-Since` against the cached freshness marker.
pub async fn get_package_metadata(
    mm: &ModelManager,
    name: &str,
    if_modified_since_ms: Option<i64>,
) -> Result<MetadataResult> {
    let doc_key = format!("p2:{name}");
    let meta_key = format!("p2:{name}:metadata");

    if let Some(meta_json) = mm.kv_cache.get(&meta_key).await.map_err(ServerError::Core)? {
        let last_modified_ms = parse_last_modified(&meta_json).unwrap_or(0);
        if let Some(client_ms) = if_modified_since_ms {
            if last_modified_ms <= client_ms {
                return Ok(MetadataResult { body: Vec::new(), last_modified_ms, not_modified: true });
            }
        }
        if let Some(body) = mm.kv_cache.get(&doc_key).await.map_err(ServerError::Core)? {
            if is_well_formed_document(&body, name) {
                return Ok(MetadataResult { body: body.into_bytes(), last_modified_ms, not_modified: false });
            }
            evict_corrupt_cache_entry(mm.clone(), doc_key.clone(), meta_key.clone());
        }
    }

    let ctx = Ctx::system();
    let rows = PackageVersionBmc::list_by_name(&ctx, mm, name).await.map_err(ServerError::Core)?;
    if !rows.is_empty() {
        let last_modified_ms = mm.clock.now_ms();
        let doc = assemble_document(name, &rows);
        cache_document(mm, &doc_key, &meta_key, &doc, last_modified_ms).await;
        return Ok(MetadataResult { body: doc.to_string().into_bytes(), last_modified_ms, not_modified: false });
    }

    let raw = fetch_from_upstream(mm, name).await?;
    let rewritten = rewrite_document(raw.clone(), name);
    let last_modified_ms = mm.clock.now_ms();
    cache_document(mm, &doc_key, &meta_key, &rewritten, last_modified_ms).await;
    persist_discovered(mm.clone(), name.to_string(), raw);

    Ok(MetadataResult { body: rewritten.to_string().into_bytes(), last_modified_ms, not_modified: false })
}

fn parse_last_modified(meta_json: &str) -> Option<i64> {
    serde_json::from_str::<Value>(meta_json)
        .ok()
        .and_then(|v| v.get("lastModified").and_then(Value::as_i64))
}

/// A cached document is trusted only if it parses and has the
/// `{packages: {name: [...]}}` shape this resolver always writes.
fn is_well_formed_document(body: &str, name: &str) -> bool {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("packages").and_then(|p| p.get(name)).map(Value::is_array))
        .unwrap_or(false)
}

/// Drops a cache entry that failed shape validation, off the request path.
fn evict_corrupt_cache_entry(mm: ModelManager, doc_key: String, meta_key: String) {
    tokio::spawn(async move {
        let _ = mm.kv_cache.delete(&doc_key).await;
        let _ = mm.kv_cache.delete(&meta_key).await;
    });
}

async fn cache_document(mm: &ModelManager, doc_key: &str, meta_key: &str, doc: &Value, last_modified_ms: i64) {
    let body = doc.to_string();
    let _ = mm.kv_cache.put(doc_key, body, Some(METADATA_CACHE_TTL)).await;
    let meta = serde_json::json!({ "lastModified": last_modified_ms }).to_string();
    let _ = mm.kv_cache.put(meta_key, meta, Some(METADATA_CACHE_TTL)).await;
}

/// Tries every active Composer repository in turn (first success wins),
/// then the public Packagist mirror, unless that's been disabled. Returns
/// the untransformed upstream document; the caller rewrites a copy for the
/// response/cache while persisting this one as-is.
async fn fetch_from_upstream(mm: &ModelManager, name: &str) -> Result<Value> {
    let ctx = Ctx::system();
    let key = &mm.app_config.storage.encryption_key;
    let client = http_client();

    let repos = RepositoryBmc::list_all(&ctx, mm).await.map_err(ServerError::Core)?;
    for repo in repos.iter().filter(|r| {
        !r.is_packagist()
            && r.status == RepositoryStatus::Active.as_str()
            && SourceKind::parse(&r.source_kind) == Some(SourceKind::Composer)
    }) {
        let url = format!("{}/p2/{name}.json", repo.url.trim_end_matches('/'));
        if let Ok(resp) = apply_auth(client.get(&url), repo, key).send().await {
            if let Ok(resp) = resp.error_for_status() {
                if let Ok(body) = resp.json::<Value>().await {
                    return Ok(body);
                }
            }
        }
    }

    if mirroring_enabled(mm).await {
        let url = format!("https://repo.packagist.org/p2/{name}.json");
        if let Ok(resp) = client.get(&url).send().await {
            if let Ok(resp) = resp.error_for_status() {
                if let Ok(body) = resp.json::<Value>().await {
                    return Ok(body);
                }
            }
        }
    }

    Err(ServerError::NotFound(format!("package {name} not found")))
}

/// Whether any active Composer-style upstream repository is configured, or
/// the public Packagist fallback is enabled. Shared with the index
/// assembler, which serves the lazy-URL skeleton instead of an enumerated
/// index while this holds.
pub(crate) async fn has_live_upstream(mm: &ModelManager) -> Result<bool> {
    let ctx = Ctx::system();
    let repos = RepositoryBmc::list_all(&ctx, mm).await.map_err(ServerError::Core)?;
    let has_active_composer_repo = repos.iter().any(|r| {
        !r.is_packagist()
            && r.status == RepositoryStatus::Active.as_str()
            && SourceKind::parse(&r.source_kind) == Some(SourceKind::Composer)
    });
    Ok(has_active_composer_repo || mirroring_enabled(mm).await)
}

async fn mirroring_enabled(mm: &ModelManager) -> bool {
    match mm.kv_cache.get("settings:packagist_mirroring_enabled").await {
        Ok(Some(v)) => v != "false",
        _ => true,
    }
}

/// Rewrites every version's `dist.url` to the proxy's unified route and
/// drops the `__unset` sentinel Composer repositories emit for cleared
/// fields.
fn rewrite_document(mut doc: Value, name: &str) -> Value {
    if let Some(versions) = doc.get_mut("packages").and_then(|p| p.get_mut(name)).and_then(Value::as_array_mut) {
        for version in versions {
            sanitize_version(version);
            rewrite_dist(version, name);
        }
    }
    doc
}

/// Drops the `__unset` sentinel Composer repositories emit for cleared
/// fields and discards a malformed `source` object. Shared with the index
/// assembler, since both read the same untransformed `metadata_json` rows.
pub(crate) fn sanitize_version(version: &mut Value) {
    let Some(obj) = version.as_object_mut() else { return };

    for field in OBJECT_FIELDS {
        if obj.get(*field).and_then(Value::as_str) == Some(SENTINEL) {
            obj.insert((*field).to_string(), serde_json::json!({}));
        }
    }
    for field in ARRAY_FIELDS {
        if obj.get(*field).and_then(Value::as_str) == Some(SENTINEL) {
            obj.insert((*field).to_string(), serde_json::json!([]));
        }
    }

    let source_is_invalid = match obj.get("source") {
        None => false,
        Some(Value::Object(_)) => false,
        _ => true,
    };
    if source_is_invalid {
        obj.remove("source");
    }
}

fn rewrite_dist(version: &mut Value, name: &str) {
    let Some(obj) = version.as_object_mut() else { return };
    let version_str = obj.get("version").and_then(Value::as_str).unwrap_or("0").to_string();
    let proxy_url = format!("/dist/m/{name}/{version_str}.zip");

    let dist = obj.entry("dist").or_insert_with(|| serde_json::json!({}));
    if let Some(dist_obj) = dist.as_object_mut() {
        dist_obj.insert("type".to_string(), serde_json::json!("zip"));
        dist_obj.insert("url".to_string(), serde_json::json!(proxy_url));
        let needs_reference = !matches!(dist_obj.get("reference"), Some(Value::String(_)));
        if needs_reference {
            dist_obj.insert("reference".to_string(), serde_json::json!(format!("{name}-{version_str}")));
        }
    }
}

fn assemble_document(name: &str, rows: &[PackageVersion]) -> Value {
    let versions: Vec<Value> = rows
        .iter()
        .filter_map(|row| {
            let mut entry: Value = serde_json::from_str(&row.metadata_json).ok()?;
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
            Some(entry)
        })
        .collect();

    serde_json::json!({ "packages": { name: versions } })
}

/// Upserts every discovered version in the background; the response to
/// the client is already in flight by the time this runs.
fn persist_discovered(mm: ModelManager, name: String, doc: Value) {
    tokio::spawn(async move {
        let ctx = Ctx::system();
        let Some(versions) = doc.get("packages").and_then(|p| p.get(&name)).and_then(Value::as_array) else {
            return;
        };
        for entry in versions {
            let Some(version) = entry.get("version").and_then(Value::as_str) else { continue };
            let dist = entry.get("dist");
            let upsert = PackageVersionForUpsert {
                repo_id: registry_core::types::PACKAGIST_REPO_ID.to_string(),
                name: name.clone(),
                version: version.to_string(),
                proxy_dist_url: format!("/dist/m/{name}/{version}.zip"),
                source_dist_url: dist.and_then(|d| d.get("url")).and_then(Value::as_str).map(str::to_string),
                dist_reference: dist.and_then(|d| d.get("reference")).and_then(Value::as_str).map(str::to_string),
                metadata_json: entry.to_string(),
                description: entry.get("description").and_then(Value::as_str).map(str::to_string),
                license_json: entry.get("license").map(|l| l.to_string()),
                r#type: entry.get("type").and_then(Value::as_str).map(str::to_string),
                homepage: entry.get("homepage").and_then(Value::as_str).map(str::to_string),
                released_at: None,
            };
            if let Err(e) = PackageVersionBmc::upsert(&ctx, &mm, upsert).await {
                tracing::warn!(name = %name, version, error = %e, "failed to persist fetched metadata");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_object_field_becomes_empty_object() {
        let mut version = serde_json::json!({"require": "__unset"});
        sanitize_version(&mut version);
        assert_eq!(version["require"], serde_json::json!({}));
    }

    #[test]
    fn sentinel_array_field_becomes_empty_array() {
        let mut version = serde_json::json!({"keywords": "__unset"});
        sanitize_version(&mut version);
        assert_eq!(version["keywords"], serde_json::json!([]));
    }

    #[test]
    fn invalid_source_is_dropped() {
        let mut version = serde_json::json!({"source": "__unset"});
        sanitize_version(&mut version);
        assert!(version.get("source").is_none());
    }

    #[test]
    fn valid_source_object_is_kept() {
        let mut version = serde_json::json!({"source": {"type": "git", "url": "https://x", "reference": "a"}});
        sanitize_version(&mut version);
        assert!(version.get("source").is_some());
    }

    #[test]
    fn dist_url_is_rewritten_to_proxy_route() {
        let mut version = serde_json::json!({"version": "1.0.0", "dist": {"url": "https://original/a.zip"}});
        rewrite_dist(&mut version, "vendor/pkg");
        assert_eq!(version["dist"]["url"], serde_json::json!("/dist/m/vendor/pkg/1.0.0.zip"));
    }

    #[test]
    fn missing_reference_is_synthesized() {
        let mut version = serde_json::json!({"version": "2.0.0", "dist": {"url": "x"}});
        rewrite_dist(&mut version, "vendor/pkg");
        assert_eq!(version["dist"]["reference"], serde_json::json!("vendor/pkg-2.0.0"));
    }

    #[test]
    fn assemble_document_wraps_rows_under_name() {
        let row = PackageVersion {
            id: 1,
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
            released_at: None,
            created_at: 0,
        };
        let doc = assemble_document("vendor/pkg", &[row]);
        assert_eq!(doc["packages"]["vendor/pkg"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn assemble_document_sanitizes_stored_sentinels() {
        let row = PackageVersion {
            id: 1,
            repo_id: "packagist".to_string(),
            name: "vendor/pkg".to_string(),
            version: "1.0.0".to_string(),
            proxy_dist_url: "/dist/m/vendor/pkg/1.0.0.zip".to_string(),
            source_dist_url: None,
            dist_reference: Some("abc".to_string()),
            metadata_json: r#"{"require": "__unset"}"#.to_string(),
            description: None,
            license_json: None,
            r#type: None,
            homepage: None,
            released_at: None,
            created_at: 0,
        };
        let doc = assemble_document("vendor/pkg", &[row]);
        assert_eq!(doc["packages"]["vendor/pkg"][0]["require"], serde_json::json!({}));
    }

    #[test]
    fn well_formed_document_is_accepted() {
        let body = serde_json::json!({"packages": {"vendor/pkg": []}}).to_string();
        assert!(is_well_formed_document(&body, "vendor/pkg"));
    }

    #[test]
    fn malformed_document_is_rejected() {
        assert!(!is_well_formed_document("not json", "vendor/pkg"));
        assert!(!is_well_formed_document(r#"{"packages": {}}"#, "vendor/pkg"));
        assert!(!is_well_formed_document(r#"{"packages": {"vendor/pkg": "oops"}}"#, "vendor/pkg"));
    }

    #[tokio::test]
    async fn corrupt_cache_entry_is_evicted_and_falls_through() {
        let mm = ModelManager::new_for_test().await.unwrap();
        let doc_key = "p2:vendor/pkg".to_string();
        let meta_key = "p2:vendor/pkg:metadata".to_string();
        mm.kv_cache.put(&doc_key, "not json".to_string(), None).await.unwrap();
        mm.kv_cache
            .put(&meta_key, serde_json::json!({"lastModified": 1}).to_string(), None)
            .await
            .unwrap();

        let ctx = Ctx::system();
        PackageVersionBmc::upsert(
            &ctx,
            &mm,
            PackageVersionForUpsert {
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

        let result = get_package_metadata(&mm, "vendor/pkg", None).await.unwrap();
        let doc: Value = serde_json::from_slice(&result.body).unwrap();
        assert!(doc["packages"]["vendor/pkg"].as_array().unwrap().len() == 1);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(mm.kv_cache.get(&doc_key).await.unwrap().is_none());
    }
}
