//! The Artifact Server: serves ZIP bytes for a package
//! version, preferring BlobStore over a fresh upstream fetch, and answers
//! README/CHANGELOG side-artifact requests out of the same storage keys.

use registry_core::Ctx;
use registry_core::ModelManager;
use registry_core::model::artifact::{ArtifactBmc, ArtifactForUpsert};
use registry_core::model::package_version::{PackageVersion, PackageVersionBmc};
use registry_core::model::repository::RepositoryBmc;
use registry_core::types::PACKAGIST_REPO_ID;
use registry_core::utils::storage_key;
use registry_core::utils::version::normalization_candidates;
use registry_core::utils::zip_extract::{self, NOT_FOUND_SENTINEL, SideArtifact};

use crate::error::{Result, ServerError};
use crate::job::{Job, JobProcessor};
use crate::sync::{apply_auth, http_client};

#[derive(Debug)]
pub struct ArtifactResponse {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub last_modified_ms: Option<i64>,
    pub x_cache: &'static str,
    pub not_modified: bool,
    /// False only for the never-seen-before, explicit-repository race path
    /// ([`fetch_on_demand`]): those bytes are streamed through without a
    /// Package Version row to persist against, so the client must not
    /// cache them as long as an already-known artifact.
    pub persisted: bool,
}

/// Serves one version's ZIP. `repo_id` is `Some` for the per-repository
/// route (`/dist/{repo}/...`) and `None` for the unified route
/// (`/dist/m/...`), which resolves ownership from the database.
pub async fn get_artifact(
    mm: &ModelManager,
    jobs: &JobProcessor,
    repo_id: Option<&str>,
    name: &str,
    version: &str,
    if_modified_since_ms: Option<i64>,
) -> Result<ArtifactResponse> {
    let ctx = Ctx::system();
    let filename = format!("{}--{}.zip", name.replace('/', "--"), version);

    let Some(row) = resolve_version(&ctx, mm, name, version).await.map_err(ServerError::Core)? else {
        return fetch_on_demand(mm, repo_id, name, version, &filename).await;
    };

    if let Some(explicit) = repo_id {
        if explicit != row.repo_id {
            return Err(ServerError::NotFound(format!("package not found: {name} {version}")));
        }
    }

    let key = storage_key::build(&row.repo_id, &row.name, &row.version);
    let existing = ArtifactBmc::get_by_repo_name_version(&ctx, mm, &row.repo_id, &row.name, &row.version)
        .await
        .map_err(ServerError::Core)?;

    if let Some(client_ms) = if_modified_since_ms {
        if let Some(a) = &existing {
            if a.created_at * 1000 <= client_ms {
                return Ok(ArtifactResponse {
                    bytes: Vec::new(),
                    filename,
                    last_modified_ms: Some(a.created_at * 1000),
                    x_cache: "HIT-DB",
                    not_modified: true,
                    persisted: true,
                });
            }
        }
    }

    if let Some(bytes) = mm.blob_store.get(&key).await.map_err(ServerError::Core)? {
        if let Some(a) = existing {
            jobs.enqueue(Job::ArtifactDownloaded { artifact_id: a.id, ts: mm.clock.now() }).await;
            return Ok(ArtifactResponse {
                bytes,
                filename,
                last_modified_ms: Some(a.created_at * 1000),
                x_cache: "HIT-DB",
                not_modified: false,
                persisted: true,
            });
        }
        return Ok(ArtifactResponse {
            bytes,
            filename,
            last_modified_ms: None,
            x_cache: "HIT-DB",
            not_modified: false,
            persisted: true,
        });
    }

    let source_url = row
        .source_dist_url
        .clone()
        .ok_or_else(|| ServerError::NotFound(format!("no source url for {name} {version}")))?;
    let x_cache = if row.repo_id == PACKAGIST_REPO_ID { "MISS-PACKAGIST" } else { "MISS-UPSTREAM" };

    let bytes = fetch_bytes(mm, &row.repo_id, &source_url).await?;

    persist_in_background(mm.clone(), jobs.clone(), row.clone(), key, bytes.clone());

    Ok(ArtifactResponse { bytes, filename, last_modified_ms: None, x_cache, not_modified: false, persisted: true })
}

/// Tries the exact version first, then each normalization candidate
/// (`.0` strip, `N.x-dev`, `-patchN`→`-pN`) in order.
async fn resolve_version(ctx: &Ctx, mm: &ModelManager, name: &str, version: &str) -> registry_core::Result<Option<PackageVersion>> {
    for candidate in normalization_candidates(version) {
        match PackageVersionBmc::get(ctx, mm, name, &candidate).await {
            Ok(row) => return Ok(Some(row)),
            Err(registry_core::Error::PackageVersionNotFound(_, _)) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(None)
}

/// A version this mirror has never seen: if the caller named an explicit
/// repository, stream it through from upstream without persisting.
async fn fetch_on_demand(
    mm: &ModelManager,
    repo_id: Option<&str>,
    name: &str,
    version: &str,
    filename: &str,
) -> Result<ArtifactResponse> {
    let Some(repo_id) = repo_id else {
        return Err(ServerError::NotFound(format!("package not found: {name} {version}")));
    };
    let ctx = Ctx::system();
    let repo = RepositoryBmc::get(&ctx, mm, repo_id).await.map_err(ServerError::Core)?;
    let key = &mm.app_config.storage.encryption_key;
    let client = http_client();

    let doc_url = format!("{}/p2/{name}.json", repo.url.trim_end_matches('/'));
    let resp = apply_auth(client.get(&doc_url), &repo, key)
        .send()
        .await
        .map_err(|e| ServerError::from_upstream(&e))?;
    let doc: serde_json::Value = resp.error_for_status().map_err(|e| ServerError::from_upstream(&e))?.json().await.map_err(|e| ServerError::from_upstream(&e))?;

    let dist_url = doc
        .get("packages")
        .and_then(|p| p.get(name))
        .and_then(|versions| versions.as_array())
        .and_then(|versions| versions.iter().find(|v| v.get("version").and_then(|s| s.as_str()) == Some(version)))
        .and_then(|v| v.get("dist"))
        .and_then(|d| d.get("url"))
        .and_then(|u| u.as_str())
        .ok_or_else(|| ServerError::NotFound(format!("package not found: {name} {version}")))?
        .to_string();

    let bytes = fetch_bytes(mm, repo_id, &dist_url).await?;
    Ok(ArtifactResponse {
        bytes,
        filename: filename.to_string(),
        last_modified_ms: None,
        x_cache: "MISS-UPSTREAM",
        not_modified: false,
        persisted: false,
    })
}

async fn fetch_bytes(mm: &ModelManager, repo_id: &str, source_url: &str) -> Result<Vec<u8>> {
    if !(source_url.starts_with("http://") || source_url.starts_with("https://")) {
        return Err(ServerError::NotFound("unsupported source protocol".to_string()));
    }

    let ctx = Ctx::system();
    let repo = RepositoryBmc::get(&ctx, mm, repo_id).await.map_err(ServerError::Core)?;
    let key = &mm.app_config.storage.encryption_key;
    let client = http_client();

    let resp = apply_auth(client.get(source_url), &repo, key)
        .send()
        .await
        .map_err(|e| ServerError::from_upstream(&e))?;

    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(ServerError::UpstreamAuthFailed);
    }
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ServerError::UpstreamNotFound);
    }
    let resp = resp.error_for_status().map_err(|e| ServerError::from_upstream(&e))?;
    let bytes = resp.bytes().await.map_err(|e| ServerError::from_upstream(&e))?;
    Ok(bytes.to_vec())
}

/// Writes the freshly-fetched bytes to BlobStore, upserts the Artifact
/// row, extracts side artifacts, and enqueues the download job — all
/// after the response has already gone out. A BlobStore failure here is
/// logged, never surfaced to the client.
fn persist_in_background(mm: ModelManager, jobs: JobProcessor, row: PackageVersion, key: String, bytes: Vec<u8>) {
    tokio::spawn(async move {
        let ctx = Ctx::system();
        if let Err(e) = mm.blob_store.put(&key, &bytes).await {
            tracing::warn!(key, error = %e, "failed to persist artifact bytes");
        }

        let artifact = match ArtifactBmc::upsert(
            &ctx,
            &mm,
            ArtifactForUpsert {
                repo_id: row.repo_id.clone(),
                name: row.name.clone(),
                version: row.version.clone(),
                storage_key: key.clone(),
                size_bytes: Some(bytes.len() as i64),
            },
        )
        .await
        {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(error = %e, "failed to upsert artifact row");
                return;
            }
        };

        extract_and_store_side_artifact(&mm, &key, &bytes, SideArtifact::Readme).await;
        extract_and_store_side_artifact(&mm, &key, &bytes, SideArtifact::Changelog).await;

        jobs.enqueue(Job::ArtifactDownloaded { artifact_id: artifact.id, ts: mm.clock.now() }).await;
    });
}

async fn extract_and_store_side_artifact(mm: &ModelManager, artifact_key: &str, bytes: &[u8], which: SideArtifact) {
    let side_key = format!("{artifact_key}{}", which.key_suffix());
    let contents = zip_extract::extract(bytes, which).unwrap_or_else(|| NOT_FOUND_SENTINEL.to_vec());
    if let Err(e) = mm.blob_store.put(&side_key, &contents).await {
        tracing::warn!(key = side_key, error = %e, "failed to persist side artifact");
    }
}

/// Serves a README or CHANGELOG, fetching and extracting on demand if
/// neither the artifact nor its side artifact has been cached yet.
pub async fn get_side_artifact(
    mm: &ModelManager,
    jobs: &JobProcessor,
    repo_id: Option<&str>,
    name: &str,
    version: &str,
    which: SideArtifact,
) -> Result<Vec<u8>> {
    let ctx = Ctx::system();
    let row = resolve_version(&ctx, mm, name, version)
        .await
        .map_err(ServerError::Core)?
        .ok_or_else(|| ServerError::NotFound(format!("package not found: {name} {version}")))?;

    if let Some(explicit) = repo_id {
        if explicit != row.repo_id {
            return Err(ServerError::NotFound(format!("package not found: {name} {version}")));
        }
    }

    let artifact_key = storage_key::build(&row.repo_id, &row.name, &row.version);
    let side_key = format!("{artifact_key}{}", which.key_suffix());

    if let Some(cached) = mm.blob_store.get(&side_key).await.map_err(ServerError::Core)? {
        if cached == NOT_FOUND_SENTINEL {
            return Err(ServerError::NotFound("no such side artifact".to_string()));
        }
        return Ok(cached);
    }

    let artifact = get_artifact(mm, jobs, repo_id, name, version, None).await?;
    let extracted = zip_extract::extract(&artifact.bytes, which);
    let contents = extracted.clone().unwrap_or_else(|| NOT_FOUND_SENTINEL.to_vec());
    let _ = mm.blob_store.put(&side_key, &contents).await;

    extracted.ok_or_else(|| ServerError::NotFound("no such side artifact".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_replaces_slash_with_double_dash() {
        let filename = format!("{}--{}.zip", "vendor/pkg".replace('/', "--"), "1.0.0");
        assert_eq!(filename, "vendor--pkg--1.0.0.zip");
    }

    #[tokio::test]
    async fn unknown_version_with_no_repo_hint_is_not_found() {
        let mm = ModelManager::new_for_test().await.unwrap();
        let jobs = JobProcessor::new(mm.clone());
        let err = get_artifact(&mm, &jobs, None, "vendor/pkg", "9.9.9", None).await.unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
    }

    #[tokio::test]
    async fn blob_hit_serves_cached_bytes_and_enqueues_download() {
        let mm = ModelManager::new_for_test().await.unwrap();
        let jobs = JobProcessor::new(mm.clone());
        let ctx = Ctx::system();

        PackageVersionBmc::upsert(
            &ctx,
            &mm,
            registry_core::model::package_version::PackageVersionForUpsert {
                repo_id: "packagist".to_string(),
                name: "vendor/pkg".to_string(),
                version: "1.0.0".to_string(),
                proxy_dist_url: "/dist/m/vendor/pkg/1.0.0.zip".to_string(),
                source_dist_url: Some("https://example.test/a.zip".to_string()),
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

        let key = storage_key::build("packagist", "vendor/pkg", "1.0.0");
        mm.blob_store.put(&key, b"zip-bytes").await.unwrap();
        ArtifactBmc::upsert(
            &ctx,
            &mm,
            ArtifactForUpsert {
                repo_id: "packagist".to_string(),
                name: "vendor/pkg".to_string(),
                version: "1.0.0".to_string(),
                storage_key: key,
                size_bytes: Some(9),
            },
        )
        .await
        .unwrap();

        let response = get_artifact(&mm, &jobs, None, "vendor/pkg", "1.0.0", None).await.unwrap();
        assert_eq!(response.bytes, b"zip-bytes");
        assert_eq!(response.x_cache, "HIT-DB");
        assert_eq!(response.filename, "vendor--pkg--1.0.0.zip");
        assert!(response.persisted);
    }

    #[tokio::test]
    async fn on_demand_fetch_is_not_marked_persisted() {
        use registry_core::model::repository::RepositoryForCreate;
        use registry_core::types::{CredentialKind, SourceKind};
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/p2/vendor/pkg.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "packages": {
                    "vendor/pkg": [{
                        "name": "vendor/pkg",
                        "version": "1.0.0",
                        "dist": { "type": "zip", "url": format!("{}/a.zip", server.uri()) }
                    }]
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/a.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"on-demand-bytes".to_vec()))
            .mount(&server)
            .await;

        let mm = ModelManager::new_for_test().await.unwrap();
        let jobs = JobProcessor::new(mm.clone());
        let ctx = Ctx::system();

        RepositoryBmc::create(
            &ctx,
            &mm,
            RepositoryForCreate {
                id: "my-repo".to_string(),
                url: server.uri(),
                source_kind: SourceKind::Composer,
                credential_kind: CredentialKind::None,
                credentials_ciphertext: None,
                filter: None,
            },
        )
        .await
        .unwrap();

        let response = get_artifact(&mm, &jobs, Some("my-repo"), "vendor/pkg", "1.0.0", None).await.unwrap();
        assert_eq!(response.bytes, b"on-demand-bytes");
        assert_eq!(response.x_cache, "MISS-UPSTREAM");
        assert!(!response.persisted);
    }
}
