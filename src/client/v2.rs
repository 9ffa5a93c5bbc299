//! v2 plugin client
//!
//! Serves every operation family. Which slots are filled depends on the
//! services the plugin advertised during the handshake.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::{
    CallResourceHandler, CheckHealthHandler, CollectMetricsHandler, Handlers, PluginClient,
    QueryDataHandler, StreamHandler,
};
use crate::error::Result;
use crate::protocol::handshake::services;
use crate::protocol::{methods, CallEvent, InitializeResult, ProtocolVersion, RpcClient};
use crate::types::{
    CallResourceRequest, CallResourceResponse, CallResourceResponseSender, CheckHealthRequest,
    CheckHealthResult, CollectMetricsResult, DataSource, PluginContext, PublishStreamRequest,
    PublishStreamResponse, Query, QueryResult, Response, RunStreamRequest, StreamPacket,
    StreamPacketSender, SubscribeStreamRequest, SubscribeStreamResponse, TimeRange,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryDataRequest {
    plugin_context: PluginContext,
    headers: HashMap<String, String>,
    queries: Vec<DataQuery>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DataQuery {
    ref_id: String,
    max_data_points: i64,
    interval_ms: i64,
    time_range: TimeRange,
    json: Value,
}

#[derive(Debug, Deserialize, Default)]
struct QueryDataResponse {
    #[serde(default)]
    responses: HashMap<String, DataResponse>,
}

#[derive(Debug, Deserialize, Default)]
struct DataResponse {
    #[serde(default)]
    frames: Vec<Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    meta: Option<Value>,
}

pub struct ClientV2 {
    rpc: Arc<RpcClient>,
}

impl ClientV2 {
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self { rpc }
    }
}

#[async_trait]
impl QueryDataHandler for ClientV2 {
    async fn query_data(&self, datasource: &DataSource, query: Query) -> Result<Response> {
        let time_range = query.time_range;
        let request = QueryDataRequest {
            plugin_context: PluginContext {
                plugin_id: self.rpc.plugin_id().to_string(),
                datasource: Some(datasource.clone()),
                ..Default::default()
            },
            headers: query.headers,
            queries: query
                .queries
                .into_iter()
                .map(|q| DataQuery {
                    ref_id: q.ref_id,
                    max_data_points: q.max_data_points,
                    interval_ms: q.interval_ms,
                    time_range,
                    json: q.model,
                })
                .collect(),
        };

        let response: QueryDataResponse =
            self.rpc.call_typed(methods::QUERY_DATA, &request).await?;

        Ok(Response {
            results: response
                .responses
                .into_iter()
                .map(|(ref_id, data)| {
                    let result = QueryResult {
                        ref_id: ref_id.clone(),
                        frames: data.frames,
                        error: data.error.filter(|e| !e.is_empty()),
                        meta: data.meta,
                    };
                    (ref_id, result)
                })
                .collect(),
        })
    }
}

#[async_trait]
impl CheckHealthHandler for ClientV2 {
    async fn check_health(&self, request: CheckHealthRequest) -> Result<CheckHealthResult> {
        self.rpc.call_typed(methods::CHECK_HEALTH, &request).await
    }
}

#[async_trait]
impl CollectMetricsHandler for ClientV2 {
    async fn collect_metrics(&self) -> Result<CollectMetricsResult> {
        self.rpc.call_typed(methods::COLLECT_METRICS, &json!({})).await
    }
}

#[async_trait]
impl CallResourceHandler for ClientV2 {
    async fn call_resource(
        &self,
        request: CallResourceRequest,
        sender: &dyn CallResourceResponseSender,
    ) -> Result<()> {
        let mut call = self
            .rpc
            .start_call(methods::CALL_RESOURCE, serde_json::to_value(&request)?)
            .await?;

        loop {
            match call.next().await? {
                CallEvent::Item(chunk) => {
                    let response: CallResourceResponse = serde_json::from_value(chunk)?;
                    sender.send(response).await?;
                }
                CallEvent::Done(_) => return Ok(()),
            }
        }
    }
}

#[async_trait]
impl StreamHandler for ClientV2 {
    async fn subscribe_stream(
        &self,
        request: SubscribeStreamRequest,
    ) -> Result<SubscribeStreamResponse> {
        self.rpc.call_typed(methods::SUBSCRIBE_STREAM, &request).await
    }

    async fn publish_stream(
        &self,
        request: PublishStreamRequest,
    ) -> Result<PublishStreamResponse> {
        self.rpc.call_typed(methods::PUBLISH_STREAM, &request).await
    }

    async fn run_stream(
        &self,
        request: RunStreamRequest,
        sender: &dyn StreamPacketSender,
    ) -> Result<()> {
        let mut call = self
            .rpc
            .start_call(methods::RUN_STREAM, serde_json::to_value(&request)?)
            .await?;

        loop {
            match call.next().await? {
                CallEvent::Item(item) => {
                    let packet: StreamPacket = serde_json::from_value(item)?;
                    sender.send(packet).await?;
                }
                CallEvent::Done(_) => return Ok(()),
            }
        }
    }
}

/// Build the v2 client from the advertised services. Returns `None` when the
/// plugin serves nothing this host understands.
pub fn new_client_v2(result: &InitializeResult, rpc: Arc<RpcClient>) -> Option<PluginClient> {
    let client = Arc::new(ClientV2::new(rpc));
    let mut handlers = Handlers::default();

    if result.advertises(services::DATA) {
        handlers = handlers.with_query(client.clone());
    }
    if result.advertises(services::DIAGNOSTICS) {
        handlers = handlers
            .with_health(client.clone())
            .with_metrics(client.clone());
    }
    if result.advertises(services::RESOURCE) {
        handlers = handlers.with_resource(client.clone());
    }
    if result.advertises(services::STREAM) {
        handlers = handlers.with_stream(client);
    }

    if handlers.is_empty() {
        return None;
    }
    Some(PluginClient::new(ProtocolVersion::V2, handlers))
}
