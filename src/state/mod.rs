use crate::config::Config;
use crate::error::Result;
use crate::plugin::{ExternalPluginFactory, PluginDescriptor, PluginRegistry};
use std::sync::Arc;
use tracing::{error, info};

pub mod metrics;

pub use metrics::PluginMetrics;

/// Everything a running host owns
pub struct HostState {
    pub config: Config,
    pub registry: Arc<PluginRegistry>,
    pub metrics: Arc<PluginMetrics>,
}

impl HostState {
    pub fn new(config: Config) -> Arc<Self> {
        let registry = Arc::new(PluginRegistry::new(config.host_env.clone()));
        Arc::new(Self {
            config,
            registry,
            metrics: Arc::new(PluginMetrics::new()),
        })
    }

    pub fn factory_for(&self, plugin_id: &str) -> Option<ExternalPluginFactory> {
        let plugin = self.config.plugins.get(plugin_id)?;
        let descriptor = PluginDescriptor::from_config(plugin_id, plugin);
        Some(
            ExternalPluginFactory::new(descriptor)
                .with_handshake(self.config.handshake.clone())
                .with_metrics(self.metrics.clone()),
        )
    }

    /// Register every configured plugin, starting the auto-start ones.
    /// Start failures are logged; the plugin stays registered.
    pub async fn register_plugins(&self) -> Result<usize> {
        let mut ids: Vec<&String> = self.config.plugins.keys().collect();
        ids.sort();

        let mut started = 0;
        for id in ids {
            let Some(factory) = self.factory_for(id) else {
                continue;
            };
            let plugin = self.registry.register(id, &factory)?;

            if !self.config.plugins[id].auto_start {
                info!(plugin_id = %id, "Plugin registered, auto start disabled");
                continue;
            }
            match plugin.start().await {
                Ok(()) => started += 1,
                Err(e) => error!(plugin_id = %id, error = %e, "Plugin failed to start"),
            }
        }
        Ok(started)
    }

    pub async fn shutdown(&self) {
        info!("Initiating plugin host shutdown");
        self.registry.stop_all().await;
    }
}
