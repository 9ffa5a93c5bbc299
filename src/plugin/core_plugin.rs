use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use super::{Plugin, PluginFactory};
use crate::client::Handlers;
use crate::error::Result;
use crate::types::{
    CallResourceRequest, CallResourceResponseSender, CheckHealthRequest, CheckHealthResult,
    CollectMetricsResult, DataSource, PublishStreamRequest, PublishStreamResponse, Query,
    Response, RunStreamRequest, StreamPacketSender, SubscribeStreamRequest,
    SubscribeStreamResponse,
};

/// A plugin served in-process by its handlers. There is no process to
/// start, stop or lose.
pub struct CorePlugin {
    plugin_id: String,
    handlers: Handlers,
}

impl CorePlugin {
    pub fn new(plugin_id: impl Into<String>, handlers: Handlers) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            handlers,
        }
    }

    /// A factory that hands every registration the same handlers.
    pub fn factory(handlers: Handlers) -> impl PluginFactory {
        move |plugin_id: &str, _env: &HashMap<String, String>| -> Result<Arc<dyn Plugin>> {
            Ok(Arc::new(CorePlugin::new(plugin_id, handlers.clone())))
        }
    }
}

#[async_trait]
impl Plugin for CorePlugin {
    fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    fn is_managed(&self) -> bool {
        false
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    async fn exited(&self) -> bool {
        false
    }

    async fn decommission(&self) -> Result<()> {
        Ok(())
    }

    async fn is_decommissioned(&self) -> bool {
        false
    }

    async fn query(&self, datasource: &DataSource, query: Query) -> Result<Response> {
        self.handlers.query()?.query_data(datasource, query).await
    }

    async fn check_health(&self, request: CheckHealthRequest) -> Result<CheckHealthResult> {
        self.handlers.health()?.check_health(request).await
    }

    async fn collect_metrics(&self) -> Result<CollectMetricsResult> {
        self.handlers.metrics()?.collect_metrics().await
    }

    async fn call_resource(
        &self,
        request: CallResourceRequest,
        sender: &dyn CallResourceResponseSender,
    ) -> Result<()> {
        self.handlers
            .resource()?
            .call_resource(request, sender)
            .await
    }

    async fn subscribe_stream(
        &self,
        request: SubscribeStreamRequest,
    ) -> Result<SubscribeStreamResponse> {
        self.handlers.stream()?.subscribe_stream(request).await
    }

    async fn publish_stream(
        &self,
        request: PublishStreamRequest,
    ) -> Result<PublishStreamResponse> {
        self.handlers.stream()?.publish_stream(request).await
    }

    async fn run_stream(
        &self,
        request: RunStreamRequest,
        sender: &dyn StreamPacketSender,
    ) -> Result<()> {
        self.handlers.stream()?.run_stream(request, sender).await
    }
}
