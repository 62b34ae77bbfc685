//! The `Analytics` port: non-blocking, best-effort event tracking.
//! Absence is the common case — every call site must treat tracking
//! failure as a no-op, never a request failure.

use async_trait::async_trait;
use serde_json::Value;

/// Fire-and-forget event tracking.
#[async_trait]
pub trait Analytics: Send + Sync {
    /// Records `event` with structured `fields`. Implementations must not
    /// propagate errors back to the caller; log and swallow instead.
    async fn track(&self, event: &str, fields: Value);
}

/// The default adapter when no analytics backend is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAnalytics;

#[async_trait]
impl Analytics for NoopAnalytics {
    async fn track(&self, _event: &str, _fields: Value) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn noop_never_panics() {
        let analytics = NoopAnalytics;
        analytics.track("artifact_downloaded", json!({"name": "vendor/pkg"})).await;
    }
}
