//! Binary entrypoint: loads configuration, sets up tracing, and runs the
//! registry HTTP server until a shutdown signal arrives.

use registry_common::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());
    let config = AppConfig::load()?;
    registry_common::tracing::setup_tracing(&config, run_mode == "production");

    tracing::info!(host = %config.server.host, port = config.server.port, "starting registry-http");

    registry_server::run(config).await?;
    Ok(())
}
