//! Versioned plugin clients
//!
//! A [`PluginClient`] is a record of optional handlers, one per operation
//! family. The legacy client fills only the query slot; the v2 client fills
//! whatever services the plugin advertised. Callers check the slot and get
//! [`PluginError::MethodNotImplemented`] for an empty one.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::{PluginError, Result};
use crate::protocol::ProtocolVersion;
use crate::types::{
    CallResourceRequest, CallResourceResponseSender, CheckHealthRequest, CheckHealthResult,
    CollectMetricsResult, DataSource, PublishStreamRequest, PublishStreamResponse, Query,
    Response, RunStreamRequest, StreamPacketSender, SubscribeStreamRequest,
    SubscribeStreamResponse,
};

pub mod negotiate;
pub mod v1;
pub mod v2;

pub use negotiate::{handshake, new_plugin_client};
pub use v1::LegacyClient;
pub use v2::ClientV2;

#[async_trait]
pub trait QueryDataHandler: Send + Sync {
    async fn query_data(&self, datasource: &DataSource, query: Query) -> Result<Response>;
}

#[async_trait]
pub trait CheckHealthHandler: Send + Sync {
    async fn check_health(&self, request: CheckHealthRequest) -> Result<CheckHealthResult>;
}

#[async_trait]
pub trait CollectMetricsHandler: Send + Sync {
    async fn collect_metrics(&self) -> Result<CollectMetricsResult>;
}

#[async_trait]
pub trait CallResourceHandler: Send + Sync {
    async fn call_resource(
        &self,
        request: CallResourceRequest,
        sender: &dyn CallResourceResponseSender,
    ) -> Result<()>;
}

#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn subscribe_stream(
        &self,
        request: SubscribeStreamRequest,
    ) -> Result<SubscribeStreamResponse>;

    async fn publish_stream(&self, request: PublishStreamRequest)
        -> Result<PublishStreamResponse>;

    /// Runs until the plugin ends the stream or the returned future is dropped.
    async fn run_stream(
        &self,
        request: RunStreamRequest,
        sender: &dyn StreamPacketSender,
    ) -> Result<()>;
}

/// One optional handler per operation family
#[derive(Clone, Default)]
pub struct Handlers {
    pub query: Option<Arc<dyn QueryDataHandler>>,
    pub health: Option<Arc<dyn CheckHealthHandler>>,
    pub metrics: Option<Arc<dyn CollectMetricsHandler>>,
    pub resource: Option<Arc<dyn CallResourceHandler>>,
    pub stream: Option<Arc<dyn StreamHandler>>,
}

impl Handlers {
    pub fn is_empty(&self) -> bool {
        self.query.is_none()
            && self.health.is_none()
            && self.metrics.is_none()
            && self.resource.is_none()
            && self.stream.is_none()
    }

    pub fn with_query(mut self, handler: Arc<dyn QueryDataHandler>) -> Self {
        self.query = Some(handler);
        self
    }

    pub fn with_health(mut self, handler: Arc<dyn CheckHealthHandler>) -> Self {
        self.health = Some(handler);
        self
    }

    pub fn with_metrics(mut self, handler: Arc<dyn CollectMetricsHandler>) -> Self {
        self.metrics = Some(handler);
        self
    }

    pub fn with_resource(mut self, handler: Arc<dyn CallResourceHandler>) -> Self {
        self.resource = Some(handler);
        self
    }

    pub fn with_stream(mut self, handler: Arc<dyn StreamHandler>) -> Self {
        self.stream = Some(handler);
        self
    }

    pub fn query(&self) -> Result<&Arc<dyn QueryDataHandler>> {
        self.query.as_ref().ok_or(PluginError::MethodNotImplemented)
    }

    pub fn health(&self) -> Result<&Arc<dyn CheckHealthHandler>> {
        self.health.as_ref().ok_or(PluginError::MethodNotImplemented)
    }

    pub fn metrics(&self) -> Result<&Arc<dyn CollectMetricsHandler>> {
        self.metrics.as_ref().ok_or(PluginError::MethodNotImplemented)
    }

    pub fn resource(&self) -> Result<&Arc<dyn CallResourceHandler>> {
        self.resource.as_ref().ok_or(PluginError::MethodNotImplemented)
    }

    pub fn stream(&self) -> Result<&Arc<dyn StreamHandler>> {
        self.stream.as_ref().ok_or(PluginError::MethodNotImplemented)
    }
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers")
            .field("query", &self.query.is_some())
            .field("health", &self.health.is_some())
            .field("metrics", &self.metrics.is_some())
            .field("resource", &self.resource.is_some())
            .field("stream", &self.stream.is_some())
            .finish()
    }
}

/// A negotiated client: the protocol version plus the handlers it serves
#[derive(Clone, Debug)]
pub struct PluginClient {
    version: ProtocolVersion,
    handlers: Handlers,
}

impl PluginClient {
    pub fn new(version: ProtocolVersion, handlers: Handlers) -> Self {
        Self { version, handlers }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn handlers(&self) -> &Handlers {
        &self.handlers
    }
}
