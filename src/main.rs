//! webpilot - HTTP server entry point.

use std::sync::Arc;

use webpilot::driver::DisconnectedRuntime;
use webpilot::{api, logging, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let _log_guard = logging::init(&config);

    tracing::info!(
        "Loaded configuration: listening on {}:{}, downloads at {}",
        config.host,
        config.port,
        config.downloads_dir.display()
    );

    // Deployments link a concrete browser backend here; without one the
    // service still serves health/providers/cancel and rejects executions.
    let runtime = Arc::new(DisconnectedRuntime);

    api::serve(config, runtime).await?;

    Ok(())
}
