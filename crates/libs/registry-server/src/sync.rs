//! The Sync Engine: discovers packages and versions from a
//! configured repository's upstream and persists them as Package Versions.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use registry_core::Ctx;
use registry_core::ModelManager;
use registry_core::model::package_version::{PackageVersionBmc, PackageVersionForUpsert};
use registry_core::model::repository::{Repository, RepositoryBmc};
use registry_core::types::{CredentialKind, RepositoryStatus, SourceKind};
use registry_core::utils::crypto;
use registry_core::utils::retry::with_backoff;

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(25);
const TOP_LEVEL_ATTEMPTS: u32 = 3;
const PER_FILE_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, serde::Serialize)]
pub struct SyncResult {
    pub ok: bool,
    pub packages: usize,
    pub strategy: Option<String>,
    pub error: Option<String>,
}

/// One discovered `(name, version)` with whatever upstream supplied, ready
/// to be upserted as a Package Version.
struct DiscoveredVersion {
    name: String,
    version: String,
    dist_reference: Option<String>,
    source_dist_url: Option<String>,
    metadata: Value,
}

pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(UPSTREAM_TIMEOUT)
        .build()
        .unwrap_or_default()
}

/// Drives the full sync contract: marks `syncing`, dispatches by
/// `source_kind`, persists discovered versions, and settles on
/// `active`/`error`. Invalidates the index/metadata KV caches on success.
pub async fn sync(mm: &ModelManager, repo_id: &str) -> registry_core::Result<SyncResult> {
    let ctx = Ctx::system();
    let repo = RepositoryBmc::get(&ctx, mm, repo_id).await?;
    RepositoryBmc::set_status(&ctx, mm, repo_id, RepositoryStatus::Syncing, None).await?;

    let key = &mm.app_config.storage.encryption_key;
    let source_kind = SourceKind::parse(&repo.source_kind).unwrap_or(SourceKind::Composer);
    let outcome = match source_kind {
        SourceKind::Composer => composer_direct(&repo, key).await.map(|v| (v, "composer-direct")),
        SourceKind::Git => match github_native(&repo, key).await {
            Ok(v) => Ok((v, "git-native")),
            Err(_) => github_tree(&repo).await.map(|v| (v, "git-tree")),
        },
    };

    match outcome {
        Ok((versions, strategy)) => {
            let count = persist(&ctx, mm, &repo, versions).await;
            RepositoryBmc::set_status(&ctx, mm, repo_id, RepositoryStatus::Active, None).await?;
            RepositoryBmc::mark_synced(&ctx, mm, repo_id, mm.clock.now()).await?;
            invalidate_index_caches(mm).await;
            Ok(SyncResult {
                ok: true,
                packages: count,
                strategy: Some(strategy.to_string()),
                error: None,
            })
        }
        Err(e) => {
            let message = e.to_string();
            RepositoryBmc::set_status(&ctx, mm, repo_id, RepositoryStatus::Error, Some(&message)).await?;
            Ok(SyncResult {
                ok: false,
                packages: 0,
                strategy: None,
                error: Some(message),
            })
        }
    }
}

/// Job-processor entry point: runs [`sync`] and folds any DB-layer error
/// into the returned error, since job handlers only propagate for logging.
pub async fn sync_repository(mm: &ModelManager, repo_id: &str) -> anyhow::Result<()> {
    let result = sync(mm, repo_id).await?;
    if !result.ok {
        tracing::warn!(repo_id, error = ?result.error, "repository sync failed");
    }
    Ok(())
}

async fn invalidate_index_caches(mm: &ModelManager) {
    for key in ["packages:all:packages.json", "packages:all:packages.json:metadata"] {
        let _ = mm.kv_cache.delete(key).await;
    }
}

async fn persist(ctx: &Ctx, mm: &ModelManager, repo: &Repository, versions: Vec<DiscoveredVersion>) -> usize {
    let mut count = 0;
    for v in versions {
        let released_at = v
            .metadata
            .get("time")
            .and_then(Value::as_str)
            .and_then(parse_iso8601)
            .unwrap_or_else(|| mm.clock.now());

        let upsert = PackageVersionForUpsert {
            repo_id: repo.id.clone(),
            name: v.name.clone(),
            version: v.version.clone(),
            proxy_dist_url: format!("/dist/m/{}/{}.zip", v.name, v.version),
            source_dist_url: v.source_dist_url,
            dist_reference: Some(v.dist_reference.unwrap_or_else(|| format!("{}-{}", v.name, v.version))),
            metadata_json: v.metadata.to_string(),
            description: v.metadata.get("description").and_then(Value::as_str).map(str::to_string),
            license_json: v.metadata.get("license").map(|l| l.to_string()),
            r#type: v.metadata.get("type").and_then(Value::as_str).map(str::to_string),
            homepage: v.metadata.get("homepage").and_then(Value::as_str).map(str::to_string),
            released_at: Some(released_at),
        };

        match PackageVersionBmc::upsert(ctx, mm, upsert).await {
            Ok(_) => count += 1,
            Err(e) => tracing::warn!(name = %v.name, version = %v.version, error = %e, "failed to persist discovered version"),
        }
    }
    count
}

fn parse_iso8601(s: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.timestamp())
}

/// Decrypts a repository's stored credentials and builds the
/// protocol-appropriate `Authorization` header value, if any.
pub(crate) fn auth_header(repo: &Repository, encryption_key: &str) -> Option<String> {
    let kind = CredentialKind::parse(&repo.credential_kind).unwrap_or(CredentialKind::None);
    let ciphertext = repo.credentials_ciphertext.as_ref()?;
    let plaintext = crypto::decrypt(ciphertext, encryption_key).ok()?;

    match kind {
        CredentialKind::None => None,
        CredentialKind::HttpBasic => {
            use base64::Engine;
            let encoded = base64::engine::general_purpose::STANDARD.encode(plaintext.as_bytes());
            Some(format!("Basic {encoded}"))
        }
        CredentialKind::GitToken => Some(format!("token {plaintext}")),
    }
}

pub(crate) fn apply_auth(builder: reqwest::RequestBuilder, repo: &Repository, encryption_key: &str) -> reqwest::RequestBuilder {
    match auth_header(repo, encryption_key) {
        Some(h) => builder.header(reqwest::header::AUTHORIZATION, h),
        None => builder,
    }
}

/// Resolves a possibly-relative artifact URL against a repository's base:
/// absolute URLs and protocol-relative (`//host/…`) URLs pass through (the
/// latter inheriting the base scheme); host-relative (`/…`) and plain
/// relative URLs are resolved against the base's origin/path respectively.
pub fn resolve_url(base: &str, candidate: &str) -> String {
    if candidate.starts_with("http://") || candidate.starts_with("https://") {
        return candidate.to_string();
    }
    if let Some(rest) = candidate.strip_prefix("//") {
        let scheme = if base.starts_with("https://") { "https" } else { "http" };
        return format!("{scheme}://{rest}");
    }
    if let Ok(base_url) = reqwest::Url::parse(base) {
        if let Ok(resolved) = base_url.join(candidate) {
            return resolved.to_string();
        }
    }
    candidate.to_string()
}

#[derive(Debug, Deserialize)]
struct PackagesJson {
    #[serde(rename = "providers-url")]
    providers_url: Option<String>,
    #[serde(rename = "provider-includes")]
    provider_includes: Option<std::collections::HashMap<String, ProviderInclude>>,
    packages: Option<std::collections::HashMap<String, std::collections::HashMap<String, Value>>>,
}

#[derive(Debug, Deserialize)]
struct ProviderInclude {
    sha256: String,
}

#[derive(Debug, Deserialize)]
struct ProviderFile {
    providers: std::collections::HashMap<String, ProviderEntry>,
}

#[derive(Debug, Deserialize)]
struct ProviderEntry {
    sha256: String,
}

/// GET `<url>/packages.json`; either a flat index or one with
/// `providers-url`/`provider-includes` to enumerate.
async fn composer_direct(repo: &Repository, encryption_key: &str) -> anyhow::Result<Vec<DiscoveredVersion>> {
    let client = http_client();
    let base = repo.url.trim_end_matches('/');
    let index_url = format!("{base}/packages.json");

    let body: PackagesJson = with_backoff(TOP_LEVEL_ATTEMPTS, "packages.json", || async {
        let resp = apply_auth(client.get(&index_url), repo, encryption_key)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        resp.error_for_status()
            .map_err(|e| e.to_string())?
            .json::<PackagesJson>()
            .await
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(anyhow::Error::msg)?;

    let filter = repo.filter_list();

    if let (Some(providers_url), Some(includes)) = (body.providers_url.clone(), body.provider_includes) {
        let mut names = Vec::new();
        for (path_template, include) in includes {
            let path = path_template.replace("%hash%", &include.sha256);
            let url = resolve_url(base, &path);
            let file: ProviderFile = with_backoff(PER_FILE_ATTEMPTS, "provider-include", || async {
                client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| e.to_string())?
                    .json::<ProviderFile>()
                    .await
                    .map_err(|e| e.to_string())
            })
            .await
            .map_err(anyhow::Error::msg)?;

            for (name, entry) in file.providers {
                if filter.as_ref().is_none_or(|f| f.iter().any(|n| n == &name)) {
                    names.push((name, entry.sha256));
                }
            }
        }

        let mut out = Vec::new();
        for (name, hash) in names {
            let path = providers_url.replace("%package%", &name).replace("%hash%", &hash);
            let url = resolve_url(base, &path);
            let fetched: anyhow::Result<std::collections::HashMap<String, Vec<Value>>> =
                with_backoff(PER_FILE_ATTEMPTS, "provider", || async {
                    client
                        .get(&url)
                        .send()
                        .await
                        .map_err(|e| e.to_string())?
                        .json()
                        .await
                        .map_err(|e| e.to_string())
                })
                .await
                .map_err(anyhow::Error::msg);

            if let Ok(map) = fetched {
                if let Some(versions) = map.get(&name) {
                    out.extend(versions.iter().filter_map(|v| version_from_entry(&name, v)));
                }
            }
        }
        return Ok(out);
    }

    let mut out = Vec::new();
    if let Some(packages) = body.packages {
        for (name, versions) in packages {
            if filter.as_ref().is_some_and(|f| !f.iter().any(|n| n == &name)) {
                continue;
            }
            for (version, entry) in versions {
                if let Some(d) = version_from_entry(&name, &entry).map(|mut d| {
                    d.version = version.clone();
                    d
                }) {
                    out.push(d);
                }
            }
        }
    }
    Ok(out)
}

/// Cheap tag filter for the git-tree strategy: at least a `major.minor`
/// pair of numeric components, optionally followed by a `-suffix`. Full
/// leniency is left to `registry_core::utils::version` at sort time.
fn looks_like_semver(tag: &str) -> bool {
    let core = tag.split('-').next().unwrap_or(tag);
    let parts: Vec<&str> = core.split('.').collect();
    parts.len() >= 2 && parts.len() <= 3 && parts.iter().all(|p| p.parse::<u64>().is_ok())
}

fn version_from_entry(name: &str, entry: &Value) -> Option<DiscoveredVersion> {
    let version = entry.get("version").and_then(Value::as_str)?.to_string();
    let dist = entry.get("dist");
    let dist_reference = dist.and_then(|d| d.get("reference")).and_then(Value::as_str).map(str::to_string);
    let source_dist_url = dist.and_then(|d| d.get("url")).and_then(Value::as_str).map(str::to_string);
    Some(DiscoveredVersion {
        name: name.to_string(),
        version,
        dist_reference,
        source_dist_url,
        metadata: entry.clone(),
    })
}

/// Sub-strategy (a): the vendor's own Composer-registry endpoint, reached
/// the same way as a standalone Composer repository.
async fn github_native(repo: &Repository, encryption_key: &str) -> anyhow::Result<Vec<DiscoveredVersion>> {
    composer_direct(repo, encryption_key).await
}

#[derive(Debug, Deserialize)]
struct GitTree {
    tree: Vec<GitTreeEntry>,
}

#[derive(Debug, Deserialize)]
struct GitTreeEntry {
    path: String,
    #[serde(rename = "type")]
    entry_type: String,
}

/// Sub-strategy (b): fetch the repository's recursive tree, find every
/// `composer.json`, and synthesize one version per tag parseable as
/// semver. Tag discovery is delegated to the GitHub tags API.
async fn github_tree(repo: &Repository) -> anyhow::Result<Vec<DiscoveredVersion>> {
    let client = http_client();
    let tree_url = format!("{}/git/trees/HEAD?recursive=1", repo.url.trim_end_matches('/'));

    let tree: GitTree = with_backoff(TOP_LEVEL_ATTEMPTS, "git-tree", || async {
        client
            .get(&tree_url)
            .header(reqwest::header::USER_AGENT, "registry-mirror")
            .send()
            .await
            .map_err(|e| e.to_string())?
            .json::<GitTree>()
            .await
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(anyhow::Error::msg)?;

    let manifest_paths: Vec<&str> = tree
        .tree
        .iter()
        .filter(|e| e.entry_type == "blob" && e.path.ends_with("composer.json"))
        .map(|e| e.path.as_str())
        .collect();

    if manifest_paths.is_empty() {
        anyhow::bail!("no composer.json found in repository tree");
    }

    let tags_url = format!("{}/tags", repo.url.trim_end_matches('/'));
    let tags: Vec<Value> = with_backoff(PER_FILE_ATTEMPTS, "git-tags", || async {
        client
            .get(&tags_url)
            .header(reqwest::header::USER_AGENT, "registry-mirror")
            .send()
            .await
            .map_err(|e| e.to_string())?
            .json()
            .await
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(anyhow::Error::msg)?;

    let manifest_path = manifest_paths[0];
    let mut out = Vec::new();
    for tag in tags {
        let name = match tag.get("name").and_then(Value::as_str) {
            Some(n) => n,
            None => continue,
        };
        let version = name.strip_prefix('v').unwrap_or(name);
        if !looks_like_semver(version) {
            continue;
        }
        let sha = tag.get("commit").and_then(|c| c.get("sha")).and_then(Value::as_str);

        let raw_url = format!(
            "{}/raw/{}/{manifest_path}",
            repo.url.trim_end_matches('/'),
            sha.unwrap_or(name)
        );
        let manifest: Value = match client
            .get(&raw_url)
            .header(reqwest::header::USER_AGENT, "registry-mirror")
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
        {
            Ok(resp) => match resp.json().await {
                Ok(v) => v,
                Err(_) => continue,
            },
            Err(_) => continue,
        };

        let package_name = manifest
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if package_name.is_empty() {
            continue;
        }

        out.push(DiscoveredVersion {
            name: package_name,
            version: version.to_string(),
            dist_reference: sha.map(str::to_string),
            source_dist_url: Some(format!("{}/archive/{}.zip", repo.url.trim_end_matches('/'), name)),
            metadata: manifest,
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_semver_like_tags() {
        assert!(looks_like_semver("1.2.3"));
        assert!(looks_like_semver("1.2"));
        assert!(looks_like_semver("1.2.3-beta1"));
        assert!(!looks_like_semver("latest"));
        assert!(!looks_like_semver("1"));
    }

    #[test]
    fn resolves_absolute_url_unchanged() {
        assert_eq!(
            resolve_url("https://repo.test", "https://cdn.test/a.zip"),
            "https://cdn.test/a.zip"
        );
    }

    #[test]
    fn resolves_protocol_relative_url() {
        assert_eq!(
            resolve_url("https://repo.test", "//cdn.test/a.zip"),
            "https://cdn.test/a.zip"
        );
    }

    #[test]
    fn resolves_host_relative_url() {
        assert_eq!(
            resolve_url("https://repo.test/base/", "/p2/a/b.json"),
            "https://repo.test/p2/a/b.json"
        );
    }

    #[test]
    fn resolves_plain_relative_url() {
        assert_eq!(
            resolve_url("https://repo.test/base/", "p2/a/b.json"),
            "https://repo.test/base/p2/a/b.json"
        );
    }

    #[test]
    fn version_from_entry_requires_version_field() {
        let v = serde_json::json!({"name": "a/b"});
        assert!(version_from_entry("a/b", &v).is_none());
    }

    #[test]
    fn version_from_entry_extracts_dist() {
        let v = serde_json::json!({
            "version": "1.0.0",
            "dist": {"type": "zip", "url": "https://x/a.zip", "reference": "deadbeef"}
        });
        let d = version_from_entry("a/b", &v).unwrap();
        assert_eq!(d.version, "1.0.0");
        assert_eq!(d.dist_reference.as_deref(), Some("deadbeef"));
        assert_eq!(d.source_dist_url.as_deref(), Some("https://x/a.zip"));
    }
}
