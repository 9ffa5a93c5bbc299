use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::PluginContext;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CheckHealthRequest {
    pub plugin_context: PluginContext,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CheckHealthResult {
    pub status: HealthStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub json_details: Value,
}

/// Metrics a plugin reports about itself, in prometheus text format
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CollectMetricsResult {
    pub prometheus_metrics: Bytes,
}
