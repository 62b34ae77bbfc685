//! Per-token hourly rate limiting.
//!
//! The counter is an approximate, non-atomic KVCache read-compare-write —
//! overshoot by up to the number of concurrent requests is accepted, not
//! guarded against. Any KVCache error is logged and treated as "allowed":
//! rate limiting is advisory, never a correctness gate.

use std::time::Duration;

use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};

use crate::AppState;
use crate::auth::AuthPrincipal;
use crate::error::ServerError;

const WINDOW_MS: i64 = 3_600_000;
const COUNTER_TTL: Duration = Duration::from_secs(3600);

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ServerError> {
    if let Some(AuthPrincipal::TokenPrincipal {
        token_id,
        rate_limit_max,
        ..
    }) = req.extensions().get::<AuthPrincipal>()
    {
        if !check_and_increment(&state, token_id, *rate_limit_max).await {
            return Err(ServerError::RateLimited);
        }
    }
    Ok(next.run(req).await)
}

/// Returns `false` only when a limit is configured and already met. Any
/// ambiguity (no limit, KV miss, KV error) resolves to "allowed".
async fn check_and_increment(state: &AppState, token_id: &str, max: Option<i64>) -> bool {
    let max = match max {
        Some(m) if m > 0 => m,
        _ => return true,
    };

    let hour = state.mm.clock.now_ms() / WINDOW_MS;
    let key = format!("rate_limit:{token_id}:{hour}");

    let current = match state.mm.kv_cache.get(&key).await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "rate limit KV read failed, failing open");
            return true;
        }
    };
    let count: i64 = current.and_then(|s| s.parse().ok()).unwrap_or(0);
    if count >= max {
        return false;
    }

    if let Err(e) = state
        .mm
        .kv_cache
        .put(&key, (count + 1).to_string(), Some(COUNTER_TTL))
        .await
    {
        tracing::warn!(error = %e, "rate limit KV write failed, failing open");
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use registry_core::ModelManager;
    use registry_core::types::Permissions;

    async fn state_with(max: Option<i64>) -> (AppState, AuthPrincipal) {
        let mm = ModelManager::new_for_test().await.unwrap();
        let state = AppState::new_for_test(mm);
        let principal = AuthPrincipal::TokenPrincipal {
            token_id: "t1".to_string(),
            permissions: Permissions::Readonly,
            rate_limit_max: max,
        };
        (state, principal)
    }

    #[tokio::test]
    async fn unlimited_when_max_is_none() {
        let (state, _) = state_with(None).await;
        for _ in 0..10 {
            assert!(check_and_increment(&state, "t1", None).await);
        }
    }

    #[tokio::test]
    async fn unlimited_when_max_is_zero() {
        let (state, _) = state_with(Some(0)).await;
        for _ in 0..10 {
            assert!(check_and_increment(&state, "t1", Some(0)).await);
        }
    }

    #[tokio::test]
    async fn denies_after_limit_reached() {
        let (state, _) = state_with(Some(2)).await;
        assert!(check_and_increment(&state, "t1", Some(2)).await);
        assert!(check_and_increment(&state, "t1", Some(2)).await);
        assert!(!check_and_increment(&state, "t1", Some(2)).await);
    }

    #[tokio::test]
    async fn separate_tokens_have_independent_counters() {
        let (state, _) = state_with(Some(1)).await;
        assert!(check_and_increment(&state, "a", Some(1)).await);
        assert!(check_and_increment(&state, "b", Some(1)).await);
        assert!(!check_and_increment(&state, "a", Some(1)).await);
    }
}
