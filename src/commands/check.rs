use crate::config::Config;
use crate::error::{ConfigError, PluginError, Result};
use crate::plugin::Plugin;
use crate::state::HostState;
use crate::types::{CheckHealthRequest, HealthStatus, PluginContext};
use tracing::{error, info, warn};

/// Start each configured plugin, ask it for its health and stop it again.
pub async fn run_plugin_check(config: Config) -> Result<()> {
    info!("Running plugin check...");
    crate::config::validate(&config)?;
    info!("✓ Configuration is valid");
    info!("Found {} plugins in configuration", config.plugins.len());

    let state = HostState::new(config);
    let mut ids: Vec<String> = state.config.plugins.keys().cloned().collect();
    ids.sort();

    let mut all_passed = true;
    for id in &ids {
        let plugin_config = &state.config.plugins[id];
        info!("\n--- Checking plugin: {} ---", id);
        info!("Executable: {}", plugin_config.executable.display());
        info!("Protocol versions: {:?}", plugin_config.protocol_versions);

        let Some(factory) = state.factory_for(id) else {
            continue;
        };
        let plugin = state.registry.register(id, &factory)?;

        match check_plugin(plugin.as_ref()).await {
            Ok(true) => {}
            Ok(false) => all_passed = false,
            Err(e) => {
                error!("✗ {}", e);
                all_passed = false;
            }
        }
        if let Err(e) = plugin.stop().await {
            warn!("Failed to stop plugin {}: {}", id, e);
        }
    }

    info!("\n--- Summary ---");
    if all_passed {
        info!("✓ All plugins passed");
        Ok(())
    } else {
        Err(PluginError::Config(ConfigError::Validation(
            "One or more plugins failed checks".to_string(),
        )))
    }
}

async fn check_plugin(plugin: &dyn Plugin) -> Result<bool> {
    plugin.start().await?;
    info!("✓ Started");

    let request = CheckHealthRequest {
        plugin_context: PluginContext {
            plugin_id: plugin.plugin_id().to_string(),
            ..Default::default()
        },
    };
    match plugin.check_health(request).await {
        Ok(result) if result.status == HealthStatus::Ok => {
            info!("✓ Health check: OK {}", result.message);
            Ok(true)
        }
        Ok(result) => {
            error!("✗ Health check: {:?} {}", result.status, result.message);
            Ok(false)
        }
        Err(e) if e.is_not_implemented() => {
            warn!("! Health check not implemented by plugin");
            Ok(true)
        }
        Err(e) => Err(e),
    }
}
