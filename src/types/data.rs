use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Datasource descriptor handed to a plugin with every query
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataSource {
    pub id: i64,
    pub uid: String,
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub url: String,
    #[serde(default)]
    pub basic_auth_enabled: bool,
    #[serde(default)]
    pub basic_auth_user: String,
    #[serde(default)]
    pub json_data: Value,
    #[serde(default)]
    pub decrypted_secure_json_data: HashMap<String, String>,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// One sub-query of a [`Query`]; `model` is the datasource-specific body
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubQuery {
    pub ref_id: String,
    #[serde(default)]
    pub max_data_points: i64,
    #[serde(default)]
    pub interval_ms: i64,
    #[serde(default)]
    pub model: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub time_range: TimeRange,
    pub queries: Vec<SubQuery>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// Result for a single sub-query, keyed by its `ref_id` in [`Response`]
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub ref_id: String,
    #[serde(default)]
    pub frames: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Response {
    pub results: BTreeMap<String, QueryResult>,
}

impl Response {
    pub fn result(&self, ref_id: &str) -> Option<&QueryResult> {
        self.results.get(ref_id)
    }
}
