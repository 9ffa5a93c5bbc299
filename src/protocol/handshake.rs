use serde::{Deserialize, Serialize};

/// Service names a plugin may advertise in its initialize result
pub mod services {
    /// Legacy datasource query service (v1)
    pub const DATASOURCE: &str = "datasource";
    pub const DATA: &str = "data";
    pub const DIAGNOSTICS: &str = "diagnostics";
    pub const RESOURCE: &str = "resource";
    pub const STREAM: &str = "stream";
}

/// Parameters of the initialize request sent right after spawn
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol versions the host accepts for this plugin
    pub protocol_versions: Vec<u32>,
    pub host_info: HostInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostInfo {
    pub name: String,
    pub version: String,
}

impl Default for HostInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Result of initialize response
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Negotiated version; absent or 0 means the plugin did not say
    #[serde(default)]
    pub protocol_version: u32,
    /// Services the plugin implements. Legacy plugins usually omit this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_info: Option<PluginInfo>,
}

impl InitializeResult {
    pub fn advertises(&self, service: &str) -> bool {
        self.services
            .as_ref()
            .map(|s| s.iter().any(|name| name == service))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_initialize_params_serialization() {
        let params = InitializeParams {
            protocol_versions: vec![1, 2],
            host_info: HostInfo::default(),
        };
        let json = serde_json::to_value(&params).unwrap();

        assert_eq!(json["protocolVersions"], json!([1, 2]));
        assert_eq!(json["hostInfo"]["name"], "backend-plugin-host");
    }

    #[test]
    fn test_initialize_result_deserialization() {
        let result: InitializeResult = serde_json::from_value(json!({
            "protocolVersion": 2,
            "services": ["data", "diagnostics"],
            "pluginInfo": { "name": "testdata", "version": "1.0.0" }
        }))
        .unwrap();

        assert_eq!(result.protocol_version, 2);
        assert!(result.advertises(services::DATA));
        assert!(!result.advertises(services::STREAM));
        assert_eq!(result.plugin_info.unwrap().name, "testdata");
    }

    #[test]
    fn test_legacy_result_without_version() {
        let result: InitializeResult = serde_json::from_value(json!({})).unwrap();
        assert_eq!(result.protocol_version, 0);
        assert!(result.services.is_none());
        assert!(!result.advertises(services::DATASOURCE));
    }
}
