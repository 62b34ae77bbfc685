//! Authentication and authorization.
//!
//! Three forms of `Authorization` header are recognized: missing,
//! `Bearer <session-token>` (UI sessions, KVCache-only), and
//! `Basic base64("token":secret)` (long-lived client credentials, hashed
//! at rest). A successful authentication attaches an [`AuthPrincipal`] to
//! the request extensions for downstream handlers and enqueues a
//! `TokenTouched` job without blocking the response.

use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{Request, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use registry_core::Ctx;
use registry_core::model::token::{Token, TokenBmc, hash_secret};
use registry_core::types::Permissions;

use crate::AppState;
use crate::error::ServerError;
use crate::job::Job;

const TOKEN_CACHE_TTL: Duration = Duration::from_secs(5);

/// Who issued the current request, once authenticated.
#[derive(Debug, Clone)]
pub enum AuthPrincipal {
    /// A UI session, looked up in KVCache only.
    Session { user_id: String, email: String },
    /// A long-lived client token.
    TokenPrincipal {
        token_id: String,
        permissions: Permissions,
        rate_limit_max: Option<i64>,
    },
}

impl AuthPrincipal {
    pub fn ctx(&self) -> Ctx {
        match self {
            AuthPrincipal::Session { user_id, .. } => Ctx::for_session(user_id.clone()),
            AuthPrincipal::TokenPrincipal { token_id, .. } => Ctx::for_token(token_id.clone()),
        }
    }

    /// Tokens marked `readonly` may not perform a write operation; session
    /// users (UI) are assumed to carry full access.
    pub fn require_write(&self) -> Result<(), ServerError> {
        match self {
            AuthPrincipal::Session { .. } => Ok(()),
            AuthPrincipal::TokenPrincipal { permissions, .. } => {
                if *permissions == Permissions::Write {
                    Ok(())
                } else {
                    Err(ServerError::Forbidden("token is read-only".to_string()))
                }
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionEntry {
    user_id: String,
    email: String,
}

enum AuthScheme<'a> {
    Bearer(&'a str),
    Basic { username: String, password: String },
}

fn parse_authorization(header: &str) -> Option<AuthScheme<'_>> {
    if let Some(token) = header.strip_prefix("Bearer ") {
        return Some(AuthScheme::Bearer(token.trim()));
    }
    if let Some(encoded) = header.strip_prefix("Basic ") {
        let decoded = BASE64.decode(encoded.trim().as_bytes()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (username, password) = decoded.split_once(':')?;
        return Some(AuthScheme::Basic {
            username: username.to_string(),
            password: password.to_string(),
        });
    }
    None
}

/// Resolves an `Authorization` header to a principal. Enqueuing
/// `TokenTouched` is the caller's responsibility since it needs access to
/// the job processor.
pub async fn authenticate(state: &AppState, header: Option<&str>) -> Result<AuthPrincipal, ServerError> {
    let header = match header {
        Some(h) => h,
        None => return Err(ServerError::Unauthorized("missing credentials".to_string())),
    };

    match parse_authorization(header) {
        Some(AuthScheme::Bearer(token)) => {
            let key = format!("session:{token}");
            let cached = state
                .mm
                .kv_cache
                .get(&key)
                .await
                .map_err(ServerError::Core)?;
            let entry: SessionEntry = match cached {
                Some(json) => serde_json::from_str(&json)
                    .map_err(|_| ServerError::Unauthorized("invalid session".to_string()))?,
                None => return Err(ServerError::Unauthorized("unknown or expired session".to_string())),
            };
            Ok(AuthPrincipal::Session {
                user_id: entry.user_id,
                email: entry.email,
            })
        }
        Some(AuthScheme::Basic { username, password }) => {
            if username != "token" {
                return Err(ServerError::Unauthorized("Invalid token".to_string()));
            }
            let hash = hash_secret(&password);
            let token = lookup_token(state, &hash).await?;
            let token = match token {
                Some(t) => t,
                None => return Err(ServerError::Unauthorized("Invalid token".to_string())),
            };
            let now = state.mm.clock.now();
            if token.is_expired(now) {
                return Err(ServerError::Unauthorized("token expired".to_string()));
            }
            let permissions = Permissions::parse(&token.permissions).unwrap_or(Permissions::Readonly);
            Ok(AuthPrincipal::TokenPrincipal {
                token_id: token.id,
                permissions,
                rate_limit_max: token.rate_limit_max,
            })
        }
        None => Err(ServerError::Unauthorized("unrecognized Authorization header".to_string())),
    }
}

/// Token lookup with the 5-second burst cache: KV hit first, DB on miss,
/// write-through to KV on a DB hit.
async fn lookup_token(state: &AppState, hash: &str) -> Result<Option<Token>, ServerError> {
    let key = format!("token:{hash}");
    if let Some(cached) = state.mm.kv_cache.get(&key).await.map_err(ServerError::Core)? {
        if let Ok(token) = serde_json::from_str::<Token>(&cached) {
            return Ok(Some(token));
        }
    }

    let ctx = Ctx::system();
    let found = TokenBmc::find_by_hash(&ctx, &state.mm, hash)
        .await
        .map_err(ServerError::Core)?;
    if let Some(ref token) = found {
        if let Ok(json) = serde_json::to_string(token) {
            let _ = state.mm.kv_cache.put(&key, json, Some(TOKEN_CACHE_TTL)).await;
        }
    }
    Ok(found)
}

/// Axum middleware: authenticates the request, attaches the principal to
/// request extensions, and enqueues `TokenTouched` on success.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, ServerError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let principal = authenticate(&state, header.as_deref()).await?;

    if let AuthPrincipal::TokenPrincipal { ref token_id, .. } = principal {
        let now = state.mm.clock.now();
        state
            .jobs
            .enqueue(Job::TokenTouched {
                token_id: token_id.clone(),
                ts: now,
            })
            .await;
    }

    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use registry_core::model::token::TokenForCreate;

    async fn test_state() -> AppState {
        let mm = registry_core::ModelManager::new_for_test().await.unwrap();
        AppState::new_for_test(mm)
    }

    #[tokio::test]
    async fn missing_header_is_unauthorized() {
        let state = test_state().await;
        let err = authenticate(&state, None).await.unwrap_err();
        assert!(matches!(err, ServerError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn basic_auth_wrong_username_is_rejected() {
        let state = test_state().await;
        let header = format!("Basic {}", BASE64.encode(b"nottoken:whatever"));
        let err = authenticate(&state, Some(&header)).await.unwrap_err();
        assert!(matches!(err, ServerError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn basic_auth_unknown_secret_is_rejected() {
        let state = test_state().await;
        let header = format!("Basic {}", BASE64.encode(b"token:doesnotexist"));
        let err = authenticate(&state, Some(&header)).await.unwrap_err();
        assert!(matches!(err, ServerError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn basic_auth_valid_secret_resolves_token_principal() {
        let state = test_state().await;
        let ctx = Ctx::system();
        let created = TokenBmc::create(&ctx, &state.mm, TokenForCreate::default())
            .await
            .unwrap();

        let header = format!("Basic {}", BASE64.encode(format!("token:{}", created.secret).as_bytes()));
        let principal = authenticate(&state, Some(&header)).await.unwrap();
        match principal {
            AuthPrincipal::TokenPrincipal { token_id, permissions, rate_limit_max } => {
                assert_eq!(token_id, created.token.id);
                assert_eq!(permissions, Permissions::Readonly);
                assert_eq!(rate_limit_max, None);
            }
            _ => panic!("expected a token principal"),
        }
    }

    #[tokio::test]
    async fn bearer_with_no_session_is_rejected() {
        let state = test_state().await;
        let err = authenticate(&state, Some("Bearer nosuchsession")).await.unwrap_err();
        assert!(matches!(err, ServerError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn bearer_with_cached_session_resolves() {
        let state = test_state().await;
        let entry = SessionEntry {
            user_id: "u1".to_string(),
            email: "u1@example.test".to_string(),
        };
        state
            .mm
            .kv_cache
            .put("session:abc", serde_json::to_string(&entry).unwrap(), None)
            .await
            .unwrap();

        let principal = authenticate(&state, Some("Bearer abc")).await.unwrap();
        match principal {
            AuthPrincipal::Session { user_id, email } => {
                assert_eq!(user_id, "u1");
                assert_eq!(email, "u1@example.test");
            }
            _ => panic!("expected a session principal"),
        }
    }

    #[test]
    fn readonly_token_rejects_write() {
        let principal = AuthPrincipal::TokenPrincipal {
            token_id: "t".to_string(),
            permissions: Permissions::Readonly,
            rate_limit_max: None,
        };
        assert!(principal.require_write().is_err());
    }

    #[test]
    fn write_token_permits_write() {
        let principal = AuthPrincipal::TokenPrincipal {
            token_id: "t".to_string(),
            permissions: Permissions::Write,
            rate_limit_max: None,
        };
        assert!(principal.require_write().is_ok());
    }
}
