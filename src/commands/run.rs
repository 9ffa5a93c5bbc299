use crate::config::Config;
use crate::error::Result;
use crate::state::HostState;
use tokio::signal;
use tracing::{error, info};

/// Register and start the configured plugins, then serve until Ctrl-C.
pub async fn run_host(config: Config) -> Result<()> {
    info!("Starting plugin host");
    info!("Loaded {} plugin configurations", config.plugins.len());

    let state = HostState::new(config);
    let started = state.register_plugins().await?;
    info!(
        "{} of {} plugins running",
        started,
        state.registry.len()
    );

    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Received shutdown signal");

    state.shutdown().await;
    info!("Plugin host stopped");
    Ok(())
}
