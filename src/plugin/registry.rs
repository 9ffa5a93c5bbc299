use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{Plugin, PluginFactory};
use crate::error::{PluginError, Result};
use crate::types::{
    CallResourceRequest, CallResourceResponseSender, CheckHealthRequest, CheckHealthResult,
    CollectMetricsResult,
};

/// Plugin ID to plugin instance. Registration is first-wins.
pub struct PluginRegistry {
    plugins: DashMap<String, Arc<dyn Plugin>>,
    host_env: HashMap<String, String>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new(HashMap::new())
    }
}

impl PluginRegistry {
    /// `host_env` is handed to every factory.
    pub fn new(host_env: HashMap<String, String>) -> Self {
        Self {
            plugins: DashMap::new(),
            host_env,
        }
    }

    /// The factory runs without any map lock held, so it may look at the
    /// registry. If two registrations race, the loser's plugin is dropped.
    pub fn register(&self, plugin_id: &str, factory: &dyn PluginFactory) -> Result<Arc<dyn Plugin>> {
        if self.plugins.contains_key(plugin_id) {
            return Err(PluginError::AlreadyRegistered(plugin_id.to_string()));
        }
        let plugin = factory.create(plugin_id, &self.host_env)?;

        match self.plugins.entry(plugin_id.to_string()) {
            Entry::Occupied(_) => Err(PluginError::AlreadyRegistered(plugin_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(plugin.clone());
                debug!(plugin_id = %plugin_id, managed = plugin.is_managed(), "Plugin registered");
                Ok(plugin)
            }
        }
    }

    /// Register, then start. A start failure is returned but the plugin
    /// stays registered.
    pub async fn register_and_start(
        &self,
        plugin_id: &str,
        factory: &dyn PluginFactory,
    ) -> Result<Arc<dyn Plugin>> {
        let plugin = self.register(plugin_id, factory)?;
        plugin.start().await?;
        Ok(plugin)
    }

    pub fn get(&self, plugin_id: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(plugin_id).map(|entry| entry.value().clone())
    }

    fn require(&self, plugin_id: &str) -> Result<Arc<dyn Plugin>> {
        self.get(plugin_id)
            .ok_or_else(|| PluginError::NotRegistered(plugin_id.to_string()))
    }

    pub async fn start_plugin(&self, plugin_id: &str) -> Result<()> {
        self.require(plugin_id)?.start().await
    }

    /// Stop every managed plugin. Failures are logged and skipped.
    pub async fn stop_all(&self) {
        // Collect first so no map guard is held across an await.
        let plugins: Vec<Arc<dyn Plugin>> = self
            .plugins
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        for plugin in plugins.into_iter().filter(|p| p.is_managed()) {
            match plugin.stop().await {
                Ok(()) => debug!(plugin_id = %plugin.plugin_id(), "Plugin stopped"),
                Err(e) => warn!(plugin_id = %plugin.plugin_id(), error = %e, "Failed to stop plugin"),
            }
        }
        info!("Stopped all managed plugins");
    }

    pub async fn check_health(
        &self,
        plugin_id: &str,
        request: CheckHealthRequest,
    ) -> Result<CheckHealthResult> {
        self.require(plugin_id)?.check_health(request).await
    }

    pub async fn call_resource(
        &self,
        plugin_id: &str,
        request: CallResourceRequest,
        sender: &dyn CallResourceResponseSender,
    ) -> Result<()> {
        self.require(plugin_id)?.call_resource(request, sender).await
    }

    pub async fn collect_metrics(&self, plugin_id: &str) -> Result<CollectMetricsResult> {
        self.require(plugin_id)?.collect_metrics().await
    }

    pub fn plugin_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.plugins.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Handlers;
    use crate::plugin::{CorePlugin, ExternalPluginFactory, PluginDescriptor};
    use crate::test_utils::{FakePluginSpec, MockTransport};
    use crate::types::CallResourceResponse;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn external(transport: &MockTransport) -> ExternalPluginFactory {
        ExternalPluginFactory::new(PluginDescriptor::new("test-ds", "gpx_test"))
            .with_transport(Arc::new(transport.clone()))
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_rejected() {
        let registry = PluginRegistry::default();
        let created = AtomicUsize::new(0);
        let factory = |id: &str, _env: &HashMap<String, String>| -> Result<Arc<dyn Plugin>> {
            created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(CorePlugin::new(id, Handlers::default())))
        };

        let first = registry.register("core", &factory).unwrap();
        let err = registry.register("core", &factory).err().unwrap();

        assert!(matches!(err, PluginError::AlreadyRegistered(ref id) if id == "core"));
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &registry.get("core").unwrap()));
    }

    #[tokio::test]
    async fn test_factory_may_consult_the_registry() {
        let registry = PluginRegistry::default();
        registry
            .register("first", &|id: &str, _env: &HashMap<String, String>| -> Result<Arc<dyn Plugin>> {
                Ok(Arc::new(CorePlugin::new(id, Handlers::default())))
            })
            .unwrap();

        let seen = std::sync::Mutex::new(Vec::new());
        let factory = |id: &str, _env: &HashMap<String, String>| -> Result<Arc<dyn Plugin>> {
            assert!(registry.get(id).is_none());
            assert!(registry.get("first").is_some());
            *seen.lock().unwrap() = registry.plugin_ids();
            Ok(Arc::new(CorePlugin::new(id, Handlers::default())))
        };

        registry.register("second", &factory).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["first"]);
        assert_eq!(registry.plugin_ids(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_factory_receives_host_env() {
        let registry = PluginRegistry::new(HashMap::from([(
            "GF_VERSION".to_string(),
            "10.0.0".to_string(),
        )]));
        let seen = std::sync::Mutex::new(None);
        let factory = |id: &str, env: &HashMap<String, String>| -> Result<Arc<dyn Plugin>> {
            *seen.lock().unwrap() = env.get("GF_VERSION").cloned();
            Ok(Arc::new(CorePlugin::new(id, Handlers::default())))
        };

        registry.register("core", &factory).unwrap();
        assert_eq!(seen.lock().unwrap().as_deref(), Some("10.0.0"));
    }

    #[tokio::test]
    async fn test_failed_start_stays_registered() {
        let registry = PluginRegistry::default();
        let transport = MockTransport::failing();

        let err = registry
            .register_and_start("A", &external(&transport))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, PluginError::StartFailed { .. }));

        let plugin = registry.get("A").unwrap();
        let err = plugin
            .check_health(CheckHealthRequest::default())
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_routed_calls() {
        let registry = PluginRegistry::default();
        let transport = MockTransport::new(FakePluginSpec::v2());
        registry.register("test-ds", &external(&transport)).unwrap();
        registry.start_plugin("test-ds").await.unwrap();

        assert!(registry
            .check_health("test-ds", CheckHealthRequest::default())
            .await
            .is_ok());
        assert!(registry.collect_metrics("test-ds").await.is_ok());

        let (tx, mut rx) = mpsc::unbounded_channel::<CallResourceResponse>();
        registry
            .call_resource("test-ds", CallResourceRequest::default(), &tx)
            .await
            .unwrap();
        assert!(rx.recv().await.is_some());

        let err = registry.collect_metrics("missing").await.unwrap_err();
        assert!(matches!(err, PluginError::NotRegistered(_)));
        assert!(registry.start_plugin("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_stop_all_only_stops_managed_plugins() {
        let registry = PluginRegistry::default();
        let managed = MockTransport::new(FakePluginSpec::v2());
        let unmanaged = MockTransport::new(FakePluginSpec::v2());

        registry
            .register_and_start("managed", &external(&managed))
            .await
            .unwrap();
        let factory = ExternalPluginFactory::new(
            PluginDescriptor::new("unmanaged", "gpx_test").unmanaged(),
        )
        .with_transport(Arc::new(unmanaged.clone()));
        registry
            .register_and_start("unmanaged", &factory)
            .await
            .unwrap();

        registry.stop_all().await;

        assert!(registry.get("managed").unwrap().exited().await);
        assert!(!registry.get("unmanaged").unwrap().exited().await);
        assert_eq!(registry.plugin_ids(), vec!["managed", "unmanaged"]);
    }
}
