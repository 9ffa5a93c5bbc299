use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use super::descriptor::PluginDescriptor;
use super::process::ManagedProcess;
use super::{unavailable, Plugin, PluginFactory};
use crate::client::PluginClient;
use crate::config::HandshakeConfig;
use crate::error::Result;
use crate::state::PluginMetrics;
use crate::transport::{self, Transport};
use crate::types::{
    CallResourceRequest, CallResourceResponseSender, CheckHealthRequest, CheckHealthResult,
    CollectMetricsResult, DataSource, PublishStreamRequest, PublishStreamResponse, Query,
    Response, RunStreamRequest, StreamPacketSender, SubscribeStreamRequest,
    SubscribeStreamResponse,
};

/// Environment variable listing the protocol versions the host accepts.
pub const PROTOCOL_VERSIONS_ENV: &str = "PLUGIN_PROTOCOL_VERSIONS";

/// A subprocess plugin seen through the version-independent capability API
pub struct ExternalPlugin {
    process: ManagedProcess,
    metrics: Option<Arc<PluginMetrics>>,
}

impl ExternalPlugin {
    pub fn new(process: ManagedProcess) -> Self {
        Self {
            process,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PluginMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn process(&self) -> &ManagedProcess {
        &self.process
    }

    async fn client(&self) -> Result<PluginClient> {
        self.process
            .client()
            .await
            .ok_or_else(|| unavailable(self.plugin_id()))
    }

    async fn instrument<T, F>(&self, endpoint: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        match self.metrics {
            Some(ref metrics) => metrics.instrument(self.plugin_id(), endpoint, fut).await,
            None => fut.await,
        }
    }
}

#[async_trait]
impl Plugin for ExternalPlugin {
    fn plugin_id(&self) -> &str {
        self.process.plugin_id()
    }

    fn is_managed(&self) -> bool {
        self.process.descriptor().managed
    }

    async fn start(&self) -> Result<()> {
        let result = self.process.start().await;
        if let Some(ref metrics) = self.metrics {
            metrics.record_start(self.plugin_id(), result.is_ok());
        }
        result
    }

    async fn stop(&self) -> Result<()> {
        self.process.stop().await
    }

    async fn exited(&self) -> bool {
        self.process.exited().await
    }

    async fn decommission(&self) -> Result<()> {
        self.process.decommission().await;
        Ok(())
    }

    async fn is_decommissioned(&self) -> bool {
        self.process.is_decommissioned().await
    }

    async fn query(&self, datasource: &DataSource, query: Query) -> Result<Response> {
        self.instrument("query", async {
            let client = self.client().await?;
            client.handlers().query()?.query_data(datasource, query).await
        })
        .await
    }

    async fn check_health(&self, request: CheckHealthRequest) -> Result<CheckHealthResult> {
        self.instrument("checkHealth", async {
            let client = self.client().await?;
            client.handlers().health()?.check_health(request).await
        })
        .await
    }

    async fn collect_metrics(&self) -> Result<CollectMetricsResult> {
        self.instrument("collectMetrics", async {
            let client = self.client().await?;
            client.handlers().metrics()?.collect_metrics().await
        })
        .await
    }

    async fn call_resource(
        &self,
        request: CallResourceRequest,
        sender: &dyn CallResourceResponseSender,
    ) -> Result<()> {
        self.instrument("callResource", async {
            let client = self.client().await?;
            client
                .handlers()
                .resource()?
                .call_resource(request, sender)
                .await
        })
        .await
    }

    async fn subscribe_stream(
        &self,
        request: SubscribeStreamRequest,
    ) -> Result<SubscribeStreamResponse> {
        self.instrument("subscribeStream", async {
            let client = self.client().await?;
            client.handlers().stream()?.subscribe_stream(request).await
        })
        .await
    }

    async fn publish_stream(
        &self,
        request: PublishStreamRequest,
    ) -> Result<PublishStreamResponse> {
        self.instrument("publishStream", async {
            let client = self.client().await?;
            client.handlers().stream()?.publish_stream(request).await
        })
        .await
    }

    async fn run_stream(
        &self,
        request: RunStreamRequest,
        sender: &dyn StreamPacketSender,
    ) -> Result<()> {
        self.instrument("runStream", async {
            let client = self.client().await?;
            client.handlers().stream()?.run_stream(request, sender).await
        })
        .await
    }
}

/// Builds [`ExternalPlugin`]s from a descriptor at registration time
pub struct ExternalPluginFactory {
    descriptor: Arc<PluginDescriptor>,
    handshake: HandshakeConfig,
    metrics: Option<Arc<PluginMetrics>>,
    transport: Option<Arc<dyn Transport>>,
}

impl ExternalPluginFactory {
    pub fn new(descriptor: PluginDescriptor) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            handshake: HandshakeConfig::default(),
            metrics: None,
            transport: None,
        }
    }

    pub fn with_handshake(mut self, handshake: HandshakeConfig) -> Self {
        self.handshake = handshake;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<PluginMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Launch through `transport` instead of spawning the executable.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Host env, then the plugin's own env, then the handshake variables.
    pub fn plugin_env(&self, host_env: &HashMap<String, String>) -> HashMap<String, String> {
        let mut env = host_env.clone();
        env.extend(
            self.descriptor
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        env.insert(
            self.handshake.magic_cookie_key.clone(),
            self.handshake.magic_cookie_value.clone(),
        );
        let versions = self
            .descriptor
            .protocol_versions
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",");
        env.insert(PROTOCOL_VERSIONS_ENV.to_string(), versions);
        env
    }
}

impl PluginFactory for ExternalPluginFactory {
    fn create(&self, plugin_id: &str, env: &HashMap<String, String>) -> Result<Arc<dyn Plugin>> {
        let descriptor = if self.descriptor.plugin_id == plugin_id {
            self.descriptor.clone()
        } else {
            let mut renamed = (*self.descriptor).clone();
            renamed.plugin_id = plugin_id.to_string();
            Arc::new(renamed)
        };

        let transport = match self.transport {
            Some(ref transport) => transport.clone(),
            None => transport::create_transport(&descriptor, self.plugin_env(env)),
        };

        let process = ManagedProcess::new(descriptor, transport, self.handshake.timeout());
        let mut plugin = ExternalPlugin::new(process);
        if let Some(ref metrics) = self.metrics {
            plugin = plugin.with_metrics(metrics.clone());
        }
        Ok(Arc::new(plugin))
    }
}
