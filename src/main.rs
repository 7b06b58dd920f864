use tracing_subscriber::{EnvFilter, fmt};
use tracing::info;

use drivegate::config::DriveConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let cfg = DriveConfig::load()?;

    // Startup banner at info level so something always prints at default verbosity
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "drivegate",
        "Drivegate starting: RUST_LOG='{}', http_port={}, allow_anonymous={}, mounts={}, users={}, permission_cache_ttl_ms={}",
        rust_log, cfg.http_port, cfg.allow_anonymous, cfg.mounts.len(), cfg.users.len(), cfg.permission_cache_ttl_ms
    );

    drivegate::server::run_with_config(cfg).await
}
