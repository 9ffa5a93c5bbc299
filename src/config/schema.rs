use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub plugins: HashMap<String, PluginConfig>,
    #[serde(default)]
    pub handshake: HandshakeConfig,
    /// Passed to every plugin process
    #[serde(default)]
    pub host_env: HashMap<String, String>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginConfig {
    pub executable: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    #[serde(default = "default_managed")]
    pub managed: bool,
    #[serde(default = "default_protocol_versions")]
    pub protocol_versions: Vec<u32>,
    #[serde(default = "default_auto_start")]
    pub auto_start: bool,
    /// Append `_<os>_<arch>` to the executable name
    #[serde(default)]
    pub platform_suffix: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeConfig {
    #[serde(default = "default_magic_cookie_key")]
    pub magic_cookie_key: String,
    #[serde(default = "default_magic_cookie_value")]
    pub magic_cookie_value: String,
    #[serde(default = "default_handshake_timeout")]
    pub timeout_ms: u64,
}

impl HandshakeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            magic_cookie_key: default_magic_cookie_key(),
            magic_cookie_value: default_magic_cookie_value(),
            timeout_ms: default_handshake_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_managed() -> bool {
    true
}

fn default_protocol_versions() -> Vec<u32> {
    vec![1, 2]
}

fn default_auto_start() -> bool {
    true
}

fn default_magic_cookie_key() -> String {
    "PLUGIN_HOST_MAGIC_COOKIE".to_string()
}

fn default_magic_cookie_value() -> String {
    "backend-plugin".to_string()
}

fn default_handshake_timeout() -> u64 {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}
