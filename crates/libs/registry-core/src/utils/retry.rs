//! Bounded exponential backoff for upstream network calls.
//!
//! Used by the sync engine: top-level calls get 3 attempts, per-file
//! calls get 2. Individual failures are logged by the caller; this helper
//! only owns the backoff schedule.

use std::time::Duration;

use tracing::warn;

/// Base delay before the first retry. Doubles on each subsequent attempt.
const BASE_DELAY: Duration = Duration::from_millis(200);

/// Runs `op` up to `attempts` times, sleeping with doubling backoff between
/// failures. Returns the last error if every attempt fails.
pub async fn with_backoff<T, E, F, Fut>(attempts: u32, label: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut last_err = None;
    for attempt in 0..attempts.max(1) {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                warn!(label, attempt, error = %e, "retryable call failed");
                last_err = Some(e);
                if attempt + 1 < attempts {
                    let delay = BASE_DELAY * 2u32.pow(attempt);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    Err(last_err.expect("attempts >= 1 guarantees at least one error recorded"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = with_backoff(3, "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("transient".to_string())
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_attempts_and_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = with_backoff(2, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err::<u32, _>("always fails".to_string()) }
        })
        .await;
        assert_eq!(result, Err("always fails".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
