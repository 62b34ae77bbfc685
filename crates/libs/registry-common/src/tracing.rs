//! Structured logging setup.
//!
//! `RUST_LOG` wins when set; otherwise the filter is built from
//! `AppConfig::server.log_level` plus the fixed per-dependency directives
//! this service always wants turned up (`tower_http`, `axum`).

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::AppConfig;

/// Initializes the global tracing subscriber. `json_format` selects the
/// machine-readable layer used in production; set it from `RUN_MODE` or
/// an explicit env var at the binary entrypoint.
pub fn setup_tracing(config: &AppConfig, json_format: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(config)));

    if json_format {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}

fn default_filter(config: &AppConfig) -> String {
    format!(
        "{level},tower_http=debug,axum=debug,registry_server=debug",
        level = config.server.log_level
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_carries_configured_level() {
        let mut config = AppConfig::default();
        config.server.log_level = "warn".to_string();
        assert_eq!(default_filter(&config), "warn,tower_http=debug,axum=debug,registry_server=debug");
    }
}
