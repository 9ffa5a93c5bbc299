use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc;

use super::PluginContext;
use crate::error::{Result, TransportError};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallResourceRequest {
    pub plugin_context: PluginContext,
    pub path: String,
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub body: Bytes,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallResourceResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub body: Bytes,
}

/// Sink for the chunks of a resource response
///
/// A sink that stalls long enough for the plugin to get 256 chunks ahead
/// loses the call with `TransportError::StreamOverflow`.
#[async_trait]
pub trait CallResourceResponseSender: Send + Sync {
    async fn send(&self, response: CallResourceResponse) -> Result<()>;
}

#[async_trait]
impl CallResourceResponseSender for mpsc::UnboundedSender<CallResourceResponse> {
    async fn send(&self, response: CallResourceResponse) -> Result<()> {
        mpsc::UnboundedSender::send(self, response).map_err(|_| TransportError::Closed)?;
        Ok(())
    }
}
