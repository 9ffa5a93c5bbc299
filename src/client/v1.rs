//! Legacy (v1) datasource client
//!
//! Legacy plugins implement a single call taking the datasource, the time
//! range and the raw sub-queries, and answer with per-refId series/tables.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::{Handlers, PluginClient, QueryDataHandler};
use crate::error::Result;
use crate::protocol::handshake::services;
use crate::protocol::{methods, InitializeResult, ProtocolVersion, RpcClient};
use crate::types::{DataSource, Query, QueryResult, Response, TimeRange};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LegacyQueryRequest<'a> {
    datasource: &'a DataSource,
    time_range: LegacyTimeRange,
    queries: Vec<LegacyQuery>,
}

/// Legacy plugins take epoch milliseconds as strings.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LegacyTimeRange {
    from_raw: String,
    to_raw: String,
    from_epoch_ms: i64,
    to_epoch_ms: i64,
}

impl From<TimeRange> for LegacyTimeRange {
    fn from(range: TimeRange) -> Self {
        let from = range.from.timestamp_millis();
        let to = range.to.timestamp_millis();
        Self {
            from_raw: from.to_string(),
            to_raw: to.to_string(),
            from_epoch_ms: from,
            to_epoch_ms: to,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LegacyQuery {
    ref_id: String,
    max_data_points: i64,
    interval_ms: i64,
    model_json: String,
}

#[derive(Debug, Deserialize, Default)]
struct LegacyQueryResponse {
    #[serde(default)]
    results: HashMap<String, LegacyQueryResult>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct LegacyQueryResult {
    #[serde(default)]
    ref_id: String,
    #[serde(default)]
    series: Vec<Value>,
    #[serde(default)]
    tables: Vec<Value>,
    #[serde(default)]
    error: String,
    #[serde(default)]
    meta_json: String,
}

impl LegacyQueryResult {
    fn into_query_result(self, ref_id: String) -> QueryResult {
        let meta = if self.meta_json.is_empty() {
            None
        } else {
            serde_json::from_str(&self.meta_json).ok()
        };
        QueryResult {
            ref_id: if self.ref_id.is_empty() { ref_id } else { self.ref_id },
            frames: self.series.into_iter().chain(self.tables).collect(),
            error: if self.error.is_empty() { None } else { Some(self.error) },
            meta,
        }
    }
}

pub struct LegacyClient {
    rpc: Arc<RpcClient>,
}

impl LegacyClient {
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self { rpc }
    }
}

#[async_trait]
impl QueryDataHandler for LegacyClient {
    async fn query_data(&self, datasource: &DataSource, query: Query) -> Result<Response> {
        let request = LegacyQueryRequest {
            datasource,
            time_range: query.time_range.into(),
            queries: query
                .queries
                .into_iter()
                .map(|q| LegacyQuery {
                    ref_id: q.ref_id,
                    max_data_points: q.max_data_points,
                    interval_ms: q.interval_ms,
                    model_json: q.model.to_string(),
                })
                .collect(),
        };

        let response: LegacyQueryResponse =
            self.rpc.call_typed(methods::LEGACY_QUERY, &request).await?;

        Ok(Response {
            results: response
                .results
                .into_iter()
                .map(|(ref_id, result)| (ref_id.clone(), result.into_query_result(ref_id)))
                .collect(),
        })
    }
}

/// Build the legacy client. Plugins that advertise services must list the
/// datasource service; plugins that advertise nothing are assumed to serve it.
pub fn new_client_v1(result: &InitializeResult, rpc: Arc<RpcClient>) -> Option<PluginClient> {
    if result.services.is_some() && !result.advertises(services::DATASOURCE) {
        return None;
    }

    let handlers = Handlers::default().with_query(Arc::new(LegacyClient::new(rpc)));
    Some(PluginClient::new(ProtocolVersion::V1, handlers))
}
