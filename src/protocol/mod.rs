use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "jsonrpc")]
pub enum JsonRpcMessage {
    #[serde(rename = "2.0")]
    V2(JsonRpcV2Message),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcV2Message {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub id: JsonRpcId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub id: JsonRpcId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum JsonRpcId {
    Number(i64),
    String(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcMessage {
    pub fn request(id: i64, method: &str, params: Value) -> Self {
        Self::V2(JsonRpcV2Message::Request(JsonRpcRequest {
            id: JsonRpcId::Number(id),
            method: method.to_string(),
            params: Some(params),
        }))
    }

    pub fn notification(method: &str, params: Option<Value>) -> Self {
        Self::V2(JsonRpcV2Message::Notification(JsonRpcNotification {
            method: method.to_string(),
            params,
        }))
    }
}

/// Method names of the plugin wire protocol
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "initialized";
    pub const CANCEL_REQUEST: &str = "$/cancelRequest";
    pub const STREAM_ITEM: &str = "$/stream";

    /// The only call a legacy (v1) plugin serves.
    pub const LEGACY_QUERY: &str = "datasource.query";

    pub const QUERY_DATA: &str = "data.query";
    pub const CHECK_HEALTH: &str = "health.check";
    pub const COLLECT_METRICS: &str = "diagnostics.metrics";
    pub const CALL_RESOURCE: &str = "resource.call";
    pub const SUBSCRIBE_STREAM: &str = "stream.subscribe";
    pub const PUBLISH_STREAM: &str = "stream.publish";
    pub const RUN_STREAM: &str = "stream.run";
}

/// JSON-RPC error codes with meaning to the host
pub mod codes {
    pub const METHOD_NOT_FOUND: i64 = -32601;
}

pub mod handshake;
pub mod rpc;
pub mod version;

pub use handshake::{InitializeParams, InitializeResult, PluginInfo};
pub use rpc::{CallEvent, PendingCall, RpcClient};
pub use version::ProtocolVersion;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let msg = JsonRpcMessage::request(7, methods::CHECK_HEALTH, json!({}));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["id"], 7);
        assert_eq!(value["method"], "health.check");
    }

    #[test]
    fn test_message_kinds_are_distinguished() {
        let response: JsonRpcMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":3,"result":{"status":"ok"}}"#).unwrap();
        assert!(matches!(
            response,
            JsonRpcMessage::V2(JsonRpcV2Message::Response(JsonRpcResponse {
                id: JsonRpcId::Number(3),
                ..
            }))
        ));

        let notification: JsonRpcMessage = serde_json::from_str(
            r#"{"jsonrpc":"2.0","method":"$/stream","params":{"id":3,"payload":{}}}"#,
        )
        .unwrap();
        assert!(matches!(
            notification,
            JsonRpcMessage::V2(JsonRpcV2Message::Notification(_))
        ));

        let error: JsonRpcMessage = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":4,"error":{"code":-32601,"message":"Method not found"}}"#,
        )
        .unwrap();
        match error {
            JsonRpcMessage::V2(JsonRpcV2Message::Response(resp)) => {
                assert_eq!(resp.error.unwrap().code, codes::METHOD_NOT_FOUND);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
