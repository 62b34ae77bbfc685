//! The admin JSON API (`/api/*`): repository and token CRUD, sharing the
//! same auth middleware as the Composer-protocol routes. Write operations
//! require a write-permitted principal via `require_write`.

use serde::Deserialize;

use registry_core::Ctx;
use registry_core::ModelManager;
use registry_core::model::repository::{Repository, RepositoryBmc, RepositoryForCreate, RepositoryForUpdate};
use registry_core::model::token::{Token, TokenBmc, TokenForCreate, TokenWithSecret};
use registry_core::types::{CredentialKind, PACKAGIST_REPO_ID, RepositoryStatus, SourceKind};
use registry_core::utils::crypto;
use registry_core::utils::validation::{validate_repository_id, validate_repository_url};

use crate::error::{Result, ServerError};

#[derive(Debug, Deserialize)]
pub struct CreateRepositoryRequest {
    pub id: String,
    pub url: String,
    pub source_kind: SourceKind,
    #[serde(default)]
    pub credential_kind: CredentialKind,
    /// Plaintext credentials, if any — encrypted before ever reaching the
    /// database. Shape depends on `credential_kind`: the `user:pass`
    /// pair for `http_basic`, the bare token for `git_token`.
    #[serde(default)]
    pub credentials: Option<String>,
    #[serde(default)]
    pub filter: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateRepositoryRequest {
    pub url: Option<String>,
    pub credential_kind: Option<CredentialKind>,
    pub credentials: Option<String>,
    pub filter: Option<String>,
}

pub async fn create_repository(mm: &ModelManager, req: CreateRepositoryRequest) -> Result<Repository> {
    validate_repository_id(&req.id).map_err(registry_core::Error::Validation)?;
    validate_repository_url(&req.url).map_err(registry_core::Error::Validation)?;
    if req.id == PACKAGIST_REPO_ID {
        return Err(ServerError::Forbidden("the packagist repository is managed automatically".to_string()));
    }

    let key = &mm.app_config.storage.encryption_key;
    let credentials_ciphertext = req
        .credentials
        .as_deref()
        .map(|c| crypto::encrypt(c, key))
        .transpose()
        .map_err(ServerError::Core)?;

    let ctx = Ctx::system();
    RepositoryBmc::create(
        &ctx,
        mm,
        RepositoryForCreate {
            id: req.id,
            url: req.url,
            source_kind: req.source_kind,
            credential_kind: req.credential_kind,
            credentials_ciphertext,
            filter: req.filter,
        },
    )
    .await
    .map_err(ServerError::Core)
}

pub async fn update_repository(mm: &ModelManager, id: &str, req: UpdateRepositoryRequest) -> Result<Repository> {
    let key = &mm.app_config.storage.encryption_key;
    let credentials_ciphertext = req
        .credentials
        .as_deref()
        .map(|c| crypto::encrypt(c, key))
        .transpose()
        .map_err(ServerError::Core)?;

    let ctx = Ctx::system();
    RepositoryBmc::update(
        &ctx,
        mm,
        id,
        RepositoryForUpdate {
            url: req.url,
            credential_kind: req.credential_kind,
            credentials_ciphertext,
            filter: req.filter,
        },
    )
    .await
    .map_err(ServerError::Core)
}

pub async fn delete_repository(mm: &ModelManager, id: &str) -> Result<()> {
    let ctx = Ctx::system();
    RepositoryBmc::delete(&ctx, mm, id).await.map_err(ServerError::Core)
}

pub async fn list_repositories(mm: &ModelManager) -> Result<Vec<Repository>> {
    let ctx = Ctx::system();
    RepositoryBmc::list_all(&ctx, mm).await.map_err(ServerError::Core)
}

/// Validates stored credentials decrypt cleanly and marks the repository
/// `active` without blocking on a full upstream crawl — actual package
/// discovery happens lazily via the index sweep and metadata resolver, or
/// explicitly via the background `RepositorySync` job.
pub async fn validate_and_activate_repository(mm: &ModelManager, id: &str) -> Result<Repository> {
    let ctx = Ctx::system();
    let repo = RepositoryBmc::get(&ctx, mm, id).await.map_err(ServerError::Core)?;

    if let Some(ciphertext) = &repo.credentials_ciphertext {
        let key = &mm.app_config.storage.encryption_key;
        crypto::decrypt(ciphertext, key).map_err(|_| {
            ServerError::BadRequest("stored credentials failed to decrypt".to_string())
        })?;
    }

    RepositoryBmc::set_status(&ctx, mm, id, RepositoryStatus::Active, None)
        .await
        .map_err(ServerError::Core)?;
    RepositoryBmc::get(&ctx, mm, id).await.map_err(ServerError::Core)
}

pub async fn create_token(mm: &ModelManager, req: TokenForCreate) -> Result<TokenWithSecret> {
    let ctx = Ctx::system();
    TokenBmc::create(&ctx, mm, req).await.map_err(ServerError::Core)
}

pub async fn list_tokens(mm: &ModelManager) -> Result<Vec<Token>> {
    let ctx = Ctx::system();
    TokenBmc::list_all(&ctx, mm).await.map_err(ServerError::Core)
}

pub async fn delete_token(mm: &ModelManager, id: &str) -> Result<()> {
    let ctx = Ctx::system();
    TokenBmc::delete(&ctx, mm, id).await.map_err(ServerError::Core)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn packagist_id_is_rejected_on_create() {
        let mm = ModelManager::new_for_test().await.unwrap();
        let req = CreateRepositoryRequest {
            id: PACKAGIST_REPO_ID.to_string(),
            url: "https://example.test".to_string(),
            source_kind: SourceKind::Composer,
            credential_kind: CredentialKind::None,
            credentials: None,
            filter: None,
        };
        let err = create_repository(&mm, req).await.unwrap_err();
        assert!(matches!(err, ServerError::Forbidden(_)));
    }

    #[tokio::test]
    async fn create_encrypts_plaintext_credentials() {
        let mm = ModelManager::new_for_test().await.unwrap();
        let req = CreateRepositoryRequest {
            id: "acme".to_string(),
            url: "https://example.test".to_string(),
            source_kind: SourceKind::Composer,
            credential_kind: CredentialKind::HttpBasic,
            credentials: Some("user:pass".to_string()),
            filter: None,
        };
        let repo = create_repository(&mm, req).await.unwrap();
        let ciphertext = repo.credentials_ciphertext.unwrap();
        assert_ne!(ciphertext, "user:pass");
        let decrypted = crypto::decrypt(&ciphertext, &mm.app_config.storage.encryption_key).unwrap();
        assert_eq!(decrypted, "user:pass");
    }

    #[tokio::test]
    async fn validate_and_activate_marks_repo_active() {
        let mm = ModelManager::new_for_test().await.unwrap();
        create_repository(
            &mm,
            CreateRepositoryRequest {
                id: "acme".to_string(),
                url: "https://example.test".to_string(),
                source_kind: SourceKind::Composer,
                credential_kind: CredentialKind::None,
                credentials: None,
                filter: None,
            },
        )
        .await
        .unwrap();

        let repo = validate_and_activate_repository(&mm, "acme").await.unwrap();
        assert_eq!(repo.status, RepositoryStatus::Active.as_str());
    }
}
