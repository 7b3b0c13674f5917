//! COC Relay - Main entry point.

use anyhow::Result;
use coc_common::config::Config;
use coc_common::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load_with_env()?;

    // Initialize logging
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    tracing::info!("COC Relay v{}", env!("CARGO_PKG_VERSION"));
    config.log_startup();

    if let Err(e) = coc_relay::run(&config).await {
        tracing::error!(error = %format!("{e:#}"), "Fatal error in main");
        return Err(e);
    }

    Ok(())
}
