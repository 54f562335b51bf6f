//! FinBot Engine - periodic company reports from market data and SEC filings.

use anyhow::Result;
use finbot_common::config::Config;
use finbot_common::logging::init_from_config;
use finbot_engine::FinBotService;

#[tokio::main]
async fn main() -> Result<()> {
    // Start timing immediately for cold-start measurement
    let startup_start = std::time::Instant::now();

    // Load configuration (file + environment overrides)
    let config = Config::load_with_env()?;

    init_from_config(&config.observability);

    tracing::info!("FinBot Engine v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Invalid configuration");
        anyhow::bail!("Invalid configuration: {}", e);
    }

    let service = FinBotService::new(config);

    let startup_duration = startup_start.elapsed();
    tracing::info!(
        duration_ms = startup_duration.as_millis() as u64,
        "Service initialized in {:?}",
        startup_duration
    );

    service.start().await
}
