//! Route table for the Composer-protocol surface and the admin JSON API.
//! Every route here sits behind the auth and rate-limit middleware layers
//! installed in [`crate::run`].

use axum::extract::{Extension, Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::DateTime;

use registry_core::model::repository::Repository;
use registry_core::model::token::{Token, TokenForCreate, TokenWithSecret};
use registry_core::utils::zip_extract::SideArtifact;

use crate::AppState;
use crate::admin::{self, CreateRepositoryRequest, UpdateRepositoryRequest};
use crate::artifact;
use crate::auth::AuthPrincipal;
use crate::error::{Result, ServerError};
use crate::index;
use crate::metadata;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/packages.json", get(packages_index))
        .route("/p2/{vendor}/{package_json}", get(package_metadata))
        .route("/dist/{repo}/{vendor}/{package}/{version_zip}", get(scoped_artifact))
        .route("/dist/m/{vendor}/{package}/{version_zip}", get(unified_artifact))
        .route("/api/packages/{vendor}/{package}/{version}/readme", get(readme))
        .route("/api/packages/{vendor}/{package}/{version}/changelog", get(changelog))
        .route("/api/repositories", get(list_repositories).post(create_repository))
        .route(
            "/api/repositories/{id}",
            axum::routing::put(update_repository).delete(delete_repository),
        )
        .route("/api/repositories/{id}/sync", post(sync_repository))
        .route("/api/tokens", get(list_tokens).post(create_token))
        .route("/api/tokens/{id}", delete(delete_token))
}

fn strip_suffix<'a>(segment: &'a str, suffix: &str) -> &'a str {
    segment.strip_suffix(suffix).unwrap_or(segment)
}

fn parse_if_modified_since(headers: &HeaderMap) -> Option<i64> {
    let raw = headers.get(header::IF_MODIFIED_SINCE)?.to_str().ok()?;
    DateTime::parse_from_rfc2822(raw).ok().map(|dt| dt.timestamp_millis())
}

/// Formats a millisecond timestamp as an HTTP-date (RFC 7231 IMF-fixdate).
fn http_date(ms: i64) -> String {
    let dt = DateTime::from_timestamp_millis(ms).unwrap_or_else(|| DateTime::from_timestamp(0, 0).unwrap());
    dt.to_rfc2822().replace("+0000", "GMT")
}

fn header_value(s: &str) -> HeaderValue {
    HeaderValue::from_str(s).unwrap_or_else(|_| HeaderValue::from_static(""))
}

async fn packages_index(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    let result = index::get_index(&state.mm, &state.jobs, parse_if_modified_since(&headers)).await?;
    if result.not_modified {
        return Err(ServerError::NotModified);
    }
    let mut response = result.body.into_response();
    let h = response.headers_mut();
    h.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    h.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=300, stale-while-revalidate=60"),
    );
    h.insert(header::LAST_MODIFIED, header_value(&http_date(result.last_modified_ms)));
    Ok(response)
}

async fn package_metadata(
    State(state): State<AppState>,
    Path((vendor, package_json)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response> {
    let name = format!("{vendor}/{}", strip_suffix(&package_json, ".json"));
    let result = metadata::get_package_metadata(&state.mm, &name, parse_if_modified_since(&headers)).await?;
    if result.not_modified {
        return Err(ServerError::NotModified);
    }
    let mut response = result.body.into_response();
    let h = response.headers_mut();
    h.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    h.insert(header::LAST_MODIFIED, header_value(&http_date(result.last_modified_ms)));
    Ok(response)
}

async fn scoped_artifact(
    State(state): State<AppState>,
    Path((repo, vendor, package, version_zip)): Path<(String, String, String, String)>,
    headers: HeaderMap,
) -> Result<Response> {
    serve_artifact(&state, Some(&repo), &format!("{vendor}/{package}"), strip_suffix(&version_zip, ".zip"), &headers).await
}

async fn unified_artifact(
    State(state): State<AppState>,
    Path((vendor, package, version_zip)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<Response> {
    serve_artifact(&state, None, &format!("{vendor}/{package}"), strip_suffix(&version_zip, ".zip"), &headers).await
}

async fn serve_artifact(
    state: &AppState,
    repo_id: Option<&str>,
    name: &str,
    version: &str,
    headers: &HeaderMap,
) -> Result<Response> {
    let result = artifact::get_artifact(&state.mm, &state.jobs, repo_id, name, version, parse_if_modified_since(headers)).await?;
    if result.not_modified {
        return Err(ServerError::NotModified);
    }
    let mut response = result.bytes.into_response();
    let h = response.headers_mut();
    h.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/zip"));
    h.insert(
        header::CONTENT_DISPOSITION,
        header_value(&format!("attachment; filename=\"{}\"", result.filename)),
    );
    let cache_control = if result.persisted {
        "public, max-age=31536000, immutable"
    } else {
        "public, max-age=3600"
    };
    h.insert(header::CACHE_CONTROL, HeaderValue::from_static(cache_control));
    h.insert("x-cache", HeaderValue::from_static(result.x_cache));
    if let Some(lm) = result.last_modified_ms {
        h.insert(header::LAST_MODIFIED, header_value(&http_date(lm)));
    }
    Ok(response)
}

async fn readme(
    State(state): State<AppState>,
    Path((vendor, package, version)): Path<(String, String, String)>,
) -> Result<Response> {
    serve_side_artifact(&state, &format!("{vendor}/{package}"), &version, SideArtifact::Readme).await
}

async fn changelog(
    State(state): State<AppState>,
    Path((vendor, package, version)): Path<(String, String, String)>,
) -> Result<Response> {
    serve_side_artifact(&state, &format!("{vendor}/{package}"), &version, SideArtifact::Changelog).await
}

async fn serve_side_artifact(state: &AppState, name: &str, version: &str, which: SideArtifact) -> Result<Response> {
    let bytes = artifact::get_side_artifact(&state.mm, &state.jobs, None, name, version, which).await?;
    let mut response = bytes.into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/markdown; charset=utf-8"));
    Ok(response)
}

async fn list_repositories(State(state): State<AppState>) -> Result<Json<Vec<Repository>>> {
    Ok(Json(admin::list_repositories(&state.mm).await?))
}

async fn create_repository(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthPrincipal>,
    Json(req): Json<CreateRepositoryRequest>,
) -> Result<Json<Repository>> {
    principal.require_write()?;
    Ok(Json(admin::create_repository(&state.mm, req).await?))
}

async fn update_repository(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthPrincipal>,
    Path(id): Path<String>,
    Json(req): Json<UpdateRepositoryRequest>,
) -> Result<Json<Repository>> {
    principal.require_write()?;
    Ok(Json(admin::update_repository(&state.mm, &id, req).await?))
}

async fn delete_repository(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthPrincipal>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    principal.require_write()?;
    admin::delete_repository(&state.mm, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn sync_repository(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthPrincipal>,
    Path(id): Path<String>,
) -> Result<Json<Repository>> {
    principal.require_write()?;
    Ok(Json(admin::validate_and_activate_repository(&state.mm, &id).await?))
}

async fn list_tokens(State(state): State<AppState>) -> Result<Json<Vec<Token>>> {
    Ok(Json(admin::list_tokens(&state.mm).await?))
}

async fn create_token(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthPrincipal>,
    Json(req): Json<TokenForCreate>,
) -> Result<Json<TokenWithSecret>> {
    principal.require_write()?;
    Ok(Json(admin::create_token(&state.mm, req).await?))
}

async fn delete_token(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthPrincipal>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    principal.require_write()?;
    admin::delete_token(&state.mm, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
