/// Envelope types exchanged between the host and backend plugins
///
/// These are value objects the runtime routes without interpreting. Payloads
/// that belong to a datasource (query models, frames, stream data) stay as
/// opaque JSON.
pub mod data;
pub mod diagnostics;
pub mod resource;
pub mod stream;

pub use data::*;
pub use diagnostics::*;
pub use resource::*;
pub use stream::*;

use serde::{Deserialize, Serialize};

/// Identity of the caller and target datasource for a plugin request
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PluginContext {
    pub org_id: i64,
    pub plugin_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datasource: Option<DataSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub login: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: String,
}
