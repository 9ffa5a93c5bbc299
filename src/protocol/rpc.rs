//! Request multiplexing over a single plugin connection
//!
//! Any number of calls may be in flight at once. Each request gets a numeric
//! id and a channel; the reader task routes responses and `$/stream` items to
//! the channel registered under that id. Dropping an unfinished
//! [`PendingCall`] sends `$/cancelRequest` so the plugin can abandon the work.
//!
//! Per-call channels are bounded. A caller that stops draining stream items
//! while the plugin keeps producing them loses the call: it is cancelled on
//! the plugin side and the caller sees [`TransportError::StreamOverflow`].

use bytes::Bytes;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{codes, methods, JsonRpcError, JsonRpcId, JsonRpcMessage, JsonRpcV2Message};
use crate::error::{PluginError, Result, TransportError};
use crate::transport::Connection;

/// Events buffered per call, one slot of which is kept for the terminal event.
pub const CALL_BUFFER: usize = 256;

type PendingMap = DashMap<i64, mpsc::Sender<RpcEvent>>;

enum RpcEvent {
    Item(Value),
    Done(std::result::Result<Value, JsonRpcError>),
    Overflow,
    Closed,
}

/// What a streaming call yields: zero or more items, then the final result.
#[derive(Debug)]
pub enum CallEvent {
    Item(Value),
    Done(Value),
}

#[derive(Debug, Serialize, Deserialize)]
struct StreamItem {
    id: i64,
    #[serde(default)]
    payload: Value,
}

pub struct RpcClient {
    plugin_id: String,
    connection: Arc<dyn Connection>,
    pending: Arc<PendingMap>,
    closed: Arc<AtomicBool>,
    next_id: AtomicI64,
    reader: JoinHandle<()>,
}

impl RpcClient {
    pub fn new(plugin_id: impl Into<String>, connection: Arc<dyn Connection>) -> Self {
        let plugin_id = plugin_id.into();
        let pending = Arc::new(PendingMap::new());
        let closed = Arc::new(AtomicBool::new(false));

        let reader = tokio::spawn(read_loop(
            plugin_id.clone(),
            connection.clone(),
            pending.clone(),
            closed.clone(),
        ));

        Self {
            plugin_id,
            connection,
            pending,
            closed,
            next_id: AtomicI64::new(1),
            reader,
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.connection.is_closed()
    }

    /// Send a request and wait for its final result, discarding stream items.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let mut call = self.start_call(method, params).await?;
        loop {
            match call.next().await? {
                CallEvent::Item(_) => {
                    tracing::trace!(plugin_id = %self.plugin_id, method, "Dropping unexpected stream item");
                }
                CallEvent::Done(result) => return Ok(result),
            }
        }
    }

    pub async fn call_typed<P, R>(&self, method: &str, params: &P) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let result = self.call(method, serde_json::to_value(params)?).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Send a request whose results arrive incrementally.
    pub async fn start_call(&self, method: &str, params: Value) -> Result<PendingCall> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(CALL_BUFFER);

        // Register before sending so a fast reply cannot be missed.
        self.pending.insert(id, tx);
        let mut call = PendingCall {
            id,
            rx,
            pending: self.pending.clone(),
            connection: self.connection.clone(),
            finished: false,
        };

        if self.closed.load(Ordering::SeqCst) {
            call.abandon();
            return Err(TransportError::Closed.into());
        }

        let data = encode(&JsonRpcMessage::request(id, method, params))?;
        if let Err(e) = self.connection.send(data).await {
            call.abandon();
            return Err(e);
        }

        tracing::trace!(plugin_id = %self.plugin_id, id, method, "Sent plugin request");
        Ok(call)
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let data = encode(&JsonRpcMessage::notification(method, params))?;
        self.connection.send(data).await
    }

    /// Number of requests still waiting on the plugin.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// An outstanding request. Dropping it before completion cancels it.
pub struct PendingCall {
    id: i64,
    rx: mpsc::Receiver<RpcEvent>,
    pending: Arc<PendingMap>,
    connection: Arc<dyn Connection>,
    finished: bool,
}

impl PendingCall {
    pub fn id(&self) -> i64 {
        self.id
    }

    pub async fn next(&mut self) -> Result<CallEvent> {
        match self.rx.recv().await {
            Some(RpcEvent::Item(item)) => Ok(CallEvent::Item(item)),
            Some(RpcEvent::Done(outcome)) => {
                self.finished = true;
                outcome.map(CallEvent::Done).map_err(rpc_error)
            }
            Some(RpcEvent::Overflow) => {
                self.finished = true;
                Err(TransportError::StreamOverflow(self.id).into())
            }
            Some(RpcEvent::Closed) | None => {
                self.finished = true;
                Err(TransportError::Closed.into())
            }
        }
    }

    fn abandon(&mut self) {
        self.finished = true;
        self.pending.remove(&self.id);
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.pending.remove(&self.id);

        if self.connection.is_closed() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let connection = self.connection.clone();
        let id = self.id;
        handle.spawn(async move { send_cancel(connection.as_ref(), id).await });
    }
}

fn encode(message: &JsonRpcMessage) -> Result<Bytes> {
    let mut data = serde_json::to_vec(message)?;
    data.push(b'\n');
    Ok(Bytes::from(data))
}

/// Plugins answer unknown methods with METHOD_NOT_FOUND; the host treats
/// that as a capability the plugin does not implement.
fn rpc_error(error: JsonRpcError) -> PluginError {
    if error.code == codes::METHOD_NOT_FOUND {
        PluginError::MethodNotImplemented
    } else {
        PluginError::Rpc {
            code: error.code,
            message: error.message,
        }
    }
}

async fn read_loop(
    plugin_id: String,
    connection: Arc<dyn Connection>,
    pending: Arc<PendingMap>,
    closed: Arc<AtomicBool>,
) {
    loop {
        let line = match connection.recv().await {
            Ok(line) => line,
            Err(PluginError::Transport(TransportError::InvalidFormat)) => {
                tracing::warn!(plugin_id = %plugin_id, "Discarding oversized plugin line");
                continue;
            }
            Err(e) => {
                tracing::debug!(plugin_id = %plugin_id, "Plugin connection ended: {}", e);
                break;
            }
        };

        let message: JsonRpcMessage = match serde_json::from_slice(&line) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(plugin_id = %plugin_id, "Discarding malformed plugin message: {}", e);
                continue;
            }
        };

        match message {
            JsonRpcMessage::V2(JsonRpcV2Message::Response(resp)) => {
                let JsonRpcId::Number(id) = resp.id else {
                    tracing::warn!(plugin_id = %plugin_id, "Response with non-numeric id");
                    continue;
                };
                match pending.remove(&id) {
                    Some((_, tx)) => {
                        let outcome = match resp.error {
                            Some(error) => Err(error),
                            None => Ok(resp.result.unwrap_or(Value::Null)),
                        };
                        let _ = tx.try_send(RpcEvent::Done(outcome));
                    }
                    None => {
                        tracing::trace!(plugin_id = %plugin_id, id, "Response for cancelled request");
                    }
                }
            }
            JsonRpcMessage::V2(JsonRpcV2Message::Notification(notification))
                if notification.method == methods::STREAM_ITEM =>
            {
                let item = notification
                    .params
                    .map(serde_json::from_value::<StreamItem>);
                match item {
                    Some(Ok(item)) => {
                        let tx = pending.get(&item.id).map(|entry| entry.value().clone());
                        match tx {
                            Some(tx) if tx.capacity() > 1 => {
                                let _ = tx.try_send(RpcEvent::Item(item.payload));
                            }
                            Some(tx) => {
                                tracing::warn!(
                                    plugin_id = %plugin_id,
                                    id = item.id,
                                    "Stream consumer fell behind; dropping call"
                                );
                                pending.remove(&item.id);
                                let _ = tx.try_send(RpcEvent::Overflow);
                                send_cancel(connection.as_ref(), item.id).await;
                            }
                            None => {}
                        }
                    }
                    _ => tracing::warn!(plugin_id = %plugin_id, "Malformed stream item"),
                }
            }
            JsonRpcMessage::V2(JsonRpcV2Message::Notification(notification)) => {
                tracing::debug!(
                    plugin_id = %plugin_id,
                    method = %notification.method,
                    "Ignoring plugin notification"
                );
            }
            JsonRpcMessage::V2(JsonRpcV2Message::Request(request)) => {
                tracing::warn!(
                    plugin_id = %plugin_id,
                    method = %request.method,
                    "Plugin sent a request; host does not serve any methods"
                );
                let reply = JsonRpcMessage::V2(JsonRpcV2Message::Response(super::JsonRpcResponse {
                    id: request.id,
                    result: None,
                    error: Some(JsonRpcError {
                        code: codes::METHOD_NOT_FOUND,
                        message: "Method not found".to_string(),
                        data: None,
                    }),
                }));
                if let Ok(data) = encode(&reply) {
                    let _ = connection.send(data).await;
                }
            }
        }
    }

    closed.store(true, Ordering::SeqCst);
    // A process whose stdout is gone is of no further use.
    if let Err(e) = connection.close().await {
        tracing::debug!(plugin_id = %plugin_id, "Failed to close plugin connection: {}", e);
    }

    let ids: Vec<i64> = pending.iter().map(|entry| *entry.key()).collect();
    for id in ids {
        if let Some((_, tx)) = pending.remove(&id) {
            let _ = tx.try_send(RpcEvent::Closed);
        }
    }
}

async fn send_cancel(connection: &dyn Connection, id: i64) {
    let message = JsonRpcMessage::notification(methods::CANCEL_REQUEST, Some(json!({ "id": id })));
    let result = match encode(&message) {
        Ok(data) => connection.send(data).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        tracing::debug!(id, "Failed to deliver cancellation: {}", e);
    }
}
