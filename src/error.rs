use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Failed to start plugin {plugin_id}: {reason}")]
    StartFailed { plugin_id: String, reason: String },

    #[error("Plugin unavailable: {0}")]
    Unavailable(String),

    #[error("Method not implemented")]
    MethodNotImplemented,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Plugin returned error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Plugin already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Plugin not registered: {0}")]
    NotRegistered(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PluginError {
    pub fn start_failed(plugin_id: impl Into<String>, reason: impl ToString) -> Self {
        Self::StartFailed {
            plugin_id: plugin_id.into(),
            reason: reason.to_string(),
        }
    }

    /// The plugin is transiently down; a fresh start may fix it.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// The negotiated client will never support the call.
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, Self::MethodNotImplemented)
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Environment variable error: {0}")]
    EnvVar(String),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Transport closed")]
    Closed,

    #[error("Invalid message format")]
    InvalidFormat,

    #[error("Handshake timed out after {0}ms")]
    HandshakeTimeout(u64),

    #[error("Call {0} dropped: stream consumer fell behind")]
    StreamOverflow(i64),
}

pub type Result<T> = std::result::Result<T, PluginError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(PluginError::Unavailable("a".into()).is_unavailable());
        assert!(!PluginError::Unavailable("a".into()).is_not_implemented());
        assert!(PluginError::MethodNotImplemented.is_not_implemented());
        assert!(!PluginError::from(TransportError::Closed).is_unavailable());
    }

    #[test]
    fn test_start_failed_message() {
        let err = PluginError::start_failed("test-ds", "no compatible plugin implementation found");
        assert_eq!(
            err.to_string(),
            "Failed to start plugin test-ds: no compatible plugin implementation found"
        );
    }
}
