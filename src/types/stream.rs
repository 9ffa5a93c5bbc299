use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use super::PluginContext;
use crate::error::{Result, TransportError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum StreamStatus {
    #[default]
    Ok,
    NotFound,
    PermissionDenied,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeStreamRequest {
    pub plugin_context: PluginContext,
    pub path: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeStreamResponse {
    pub status: StreamStatus,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub initial_data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublishStreamRequest {
    pub plugin_context: PluginContext,
    pub path: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublishStreamResponse {
    pub status: StreamStatus,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunStreamRequest {
    pub plugin_context: PluginContext,
    pub path: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StreamPacket {
    pub data: Value,
}

/// Sink for packets produced by a running stream
///
/// A sink that stalls long enough for the plugin to get 256 packets ahead
/// loses the stream with `TransportError::StreamOverflow`.
#[async_trait]
pub trait StreamPacketSender: Send + Sync {
    async fn send(&self, packet: StreamPacket) -> Result<()>;
}

#[async_trait]
impl StreamPacketSender for mpsc::UnboundedSender<StreamPacket> {
    async fn send(&self, packet: StreamPacket) -> Result<()> {
        mpsc::UnboundedSender::send(self, packet).map_err(|_| TransportError::Closed)?;
        Ok(())
    }
}
