//! Application configuration, loaded with 12-factor app conventions.

use config::{Config, File};
use serde::Deserialize;
use std::env;

/// Top-level configuration for the registry server.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory served for the web-facing static assets (admin UI),
    /// outside the Composer-protocol core.
    pub public_dir: String,
    /// Default `tracing` filter directive, overridden by `RUST_LOG` if set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Which driver backs each port, plus the per-driver connection details.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_db_driver")]
    pub db_driver: String,
    pub db_url: String,

    #[serde(default = "default_storage_driver")]
    pub storage_driver: String,
    pub storage_path: String,

    #[serde(default = "default_cache_driver")]
    pub cache_driver: String,
    pub cache_url: Option<String>,

    /// Name of the job-queue driver, or absent to select the synchronous
    /// Job Processor strategy.
    pub queue_driver: Option<String>,

    /// Master key credentials are encrypted under. Required once any
    /// repository stores non-`none` credentials.
    pub encryption_key: String,

    /// When set, the artifact server serves bytes without persisting them
    /// to BlobStore — useful for ephemeral/CI environments.
    #[serde(default)]
    pub skip_package_storage: bool,
}

fn default_db_driver() -> String {
    "sqlite".to_string()
}

fn default_storage_driver() -> String {
    "fs".to_string()
}

fn default_cache_driver() -> String {
    "memory".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8765,
                public_dir: "public".to_string(),
                log_level: default_log_level(),
            },
            storage: StorageConfig {
                db_driver: default_db_driver(),
                db_url: "data/registry.db".to_string(),
                storage_driver: default_storage_driver(),
                storage_path: "data/blobs".to_string(),
                cache_driver: default_cache_driver(),
                cache_url: None,
                queue_driver: None,
                encryption_key: "change-me".to_string(),
                skip_package_storage: false,
            },
        }
    }
}

/// Parses a boolean environment variable with truthy-string detection.
pub fn parse_bool_env(key: &str) -> bool {
    env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "t" | "y"))
        .unwrap_or(false)
}

impl AppConfig {
    /// Loads configuration with 12-factor app compliant env var support.
    ///
    /// Priority order (highest to lowest):
    /// 1. `PORT` / `HOST` and the enumerated `DB_*`/`STORAGE_*`/`CACHE_*`/
    ///    `QUEUE_DRIVER`/`PUBLIC_DIR`/`LOG_LEVEL`/`ENCRYPTION_KEY`/
    ///    `SKIP_PACKAGE_STORAGE` env vars
    /// 2. Config files (`config/default.toml`, `config/{run_mode}.toml`)
    /// 3. Hardcoded defaults
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let mut builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8765)?
            .set_default("server.public_dir", "public")?
            .set_default("server.log_level", "info")?
            .set_default("storage.db_driver", "sqlite")?
            .set_default("storage.db_url", "data/registry.db")?
            .set_default("storage.storage_driver", "fs")?
            .set_default("storage.storage_path", "data/blobs")?
            .set_default("storage.cache_driver", "memory")?
            .set_default("storage.encryption_key", "change-me")?
            .set_default("storage.skip_package_storage", false)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false));

        if let Ok(port) = env::var("PORT") {
            if let Ok(p) = port.parse::<i64>() {
                builder = builder.set_override("server.port", p)?;
            }
        }
        if let Ok(host) = env::var("HOST") {
            builder = builder.set_override("server.host", host)?;
        }
        if let Ok(dir) = env::var("PUBLIC_DIR") {
            builder = builder.set_override("server.public_dir", dir)?;
        }
        if let Ok(v) = env::var("LOG_LEVEL") {
            builder = builder.set_override("server.log_level", v)?;
        }
        if let Ok(v) = env::var("DB_DRIVER") {
            builder = builder.set_override("storage.db_driver", v)?;
        }
        if let Ok(v) = env::var("DB_URL") {
            builder = builder.set_override("storage.db_url", v)?;
        }
        if let Ok(v) = env::var("STORAGE_DRIVER") {
            builder = builder.set_override("storage.storage_driver", v)?;
        }
        if let Ok(v) = env::var("STORAGE_PATH") {
            builder = builder.set_override("storage.storage_path", v)?;
        }
        if let Ok(v) = env::var("CACHE_DRIVER") {
            builder = builder.set_override("storage.cache_driver", v)?;
        }
        if let Ok(v) = env::var("CACHE_URL") {
            builder = builder.set_override("storage.cache_url", v)?;
        }
        if let Ok(v) = env::var("QUEUE_DRIVER") {
            builder = builder.set_override("storage.queue_driver", v)?;
        }
        if let Ok(v) = env::var("ENCRYPTION_KEY") {
            builder = builder.set_override("storage.encryption_key", v)?;
        }
        if env::var("SKIP_PACKAGE_STORAGE").is_ok() {
            builder = builder.set_override(
                "storage.skip_package_storage",
                parse_bool_env("SKIP_PACKAGE_STORAGE"),
            )?;
        }

        builder.build()?.try_deserialize()
    }
}
