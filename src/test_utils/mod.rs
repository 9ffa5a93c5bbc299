//! In-memory plugin processes for tests
//!
//! [`MockTransport`] hands out [`MockConnection`]s wired to a scripted fake
//! plugin task that speaks the same newline-delimited JSON-RPC as a real
//! plugin binary.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

use crate::error::{PluginError, Result, TransportError};
use crate::protocol::handshake::services;
use crate::protocol::{codes, methods};
use crate::transport::{Connection, Transport};
use crate::types::{CallResourceResponse, CollectMetricsResult};

static NEXT_PID: AtomicU32 = AtomicU32::new(40_000);

/// How the fake plugin behaves
#[derive(Debug, Clone)]
pub struct FakePluginSpec {
    protocol_version: u32,
    services: Option<Vec<String>>,
    stream_packets: usize,
    hold_streams: bool,
    silent: bool,
}

impl FakePluginSpec {
    /// A legacy plugin: no version, no service list, query only.
    pub fn v1() -> Self {
        Self {
            protocol_version: 0,
            services: None,
            stream_packets: 1,
            hold_streams: false,
            silent: false,
        }
    }

    /// A v2 plugin serving every service.
    pub fn v2() -> Self {
        Self {
            protocol_version: 2,
            services: Some(
                [services::DATA, services::DIAGNOSTICS, services::RESOURCE, services::STREAM]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ),
            ..Self::v1()
        }
    }

    pub fn with_protocol_version(mut self, version: u32) -> Self {
        self.protocol_version = version;
        self
    }

    pub fn with_services(mut self, services: &[&str]) -> Self {
        self.services = Some(services.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_stream_packets(mut self, count: usize) -> Self {
        self.stream_packets = count;
        self
    }

    /// `stream.run` and `resource.call` never complete on their own.
    pub fn holding_streams(mut self) -> Self {
        self.hold_streams = true;
        self
    }

    /// Never answers anything.
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }
}

struct ProcessShared {
    pid: u32,
    exit: watch::Sender<bool>,
    cancelled: Mutex<Vec<i64>>,
    methods: Mutex<Vec<String>>,
}

/// Handle on one spawned fake plugin
#[derive(Clone)]
pub struct MockProcess {
    shared: Arc<ProcessShared>,
}

impl MockProcess {
    pub fn pid(&self) -> u32 {
        self.shared.pid
    }

    /// Kill the process behind the host's back.
    pub fn crash(&self) {
        self.shared.exit.send_replace(true);
    }

    pub fn is_exited(&self) -> bool {
        *self.shared.exit.borrow()
    }

    /// Request ids the host cancelled.
    pub fn cancelled_requests(&self) -> Vec<i64> {
        self.shared.cancelled.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Every method received, requests and notifications, in order.
    pub fn received_methods(&self) -> Vec<String> {
        self.shared.methods.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

/// Spawns a fresh fake plugin on every connect
#[derive(Clone)]
pub struct MockTransport {
    spec: Option<FakePluginSpec>,
    processes: Arc<Mutex<Vec<MockProcess>>>,
}

impl MockTransport {
    pub fn new(spec: FakePluginSpec) -> Self {
        Self {
            spec: Some(spec),
            processes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A transport whose executable cannot be spawned.
    pub fn failing() -> Self {
        Self {
            spec: None,
            processes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn spawn_count(&self) -> usize {
        self.processes.lock().map(|p| p.len()).unwrap_or_default()
    }

    /// The most recently spawned process.
    pub fn latest(&self) -> Option<MockProcess> {
        self.processes.lock().ok().and_then(|p| p.last().cloned())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<Arc<dyn Connection>> {
        let Some(ref spec) = self.spec else {
            return Err(TransportError::ConnectionFailed(
                "executable file not found".to_string(),
            )
            .into());
        };

        let (to_plugin, plugin_inbox) = mpsc::unbounded_channel();
        let (to_host, host_inbox) = mpsc::unbounded_channel();
        let (exit, _) = watch::channel(false);
        let shared = Arc::new(ProcessShared {
            pid: NEXT_PID.fetch_add(1, Ordering::SeqCst),
            exit,
            cancelled: Mutex::new(Vec::new()),
            methods: Mutex::new(Vec::new()),
        });

        tokio::spawn(run_fake_plugin(
            spec.clone(),
            plugin_inbox,
            to_host,
            shared.clone(),
        ));

        if let Ok(mut processes) = self.processes.lock() {
            processes.push(MockProcess {
                shared: shared.clone(),
            });
        }

        Ok(Arc::new(MockConnection {
            outgoing: to_plugin,
            incoming: tokio::sync::Mutex::new(host_inbox),
            shared,
        }))
    }
}

/// Host side of a fake plugin's stdio
pub struct MockConnection {
    outgoing: mpsc::UnboundedSender<Bytes>,
    incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>,
    shared: Arc<ProcessShared>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn send(&self, data: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(TransportError::Closed.into());
        }
        self.outgoing
            .send(data)
            .map_err(|_| PluginError::from(TransportError::Closed))
    }

    async fn recv(&self) -> Result<Bytes> {
        let mut incoming = self.incoming.lock().await;
        tokio::select! {
            _ = wait_for_exit(self.shared.exit.subscribe()) => {
                Err(PluginError::from(TransportError::Closed))
            }
            line = incoming.recv() => line.ok_or(PluginError::from(TransportError::Closed)),
        }
    }

    async fn close(&self) -> Result<()> {
        self.shared.exit.send_replace(true);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        *self.shared.exit.borrow()
    }

    fn pid(&self) -> Option<u32> {
        Some(self.shared.pid)
    }
}

async fn wait_for_exit(mut exit: watch::Receiver<bool>) {
    loop {
        let exited = *exit.borrow_and_update();
        if exited || exit.changed().await.is_err() {
            return;
        }
    }
}

async fn run_fake_plugin(
    spec: FakePluginSpec,
    mut inbox: mpsc::UnboundedReceiver<Bytes>,
    outbox: mpsc::UnboundedSender<Bytes>,
    shared: Arc<ProcessShared>,
) {
    loop {
        let line = tokio::select! {
            _ = wait_for_exit(shared.exit.subscribe()) => break,
            line = inbox.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };
        let Ok(message) = serde_json::from_slice::<Value>(&line) else {
            continue;
        };

        let method = message["method"].as_str().unwrap_or_default().to_string();
        if let Ok(mut methods) = shared.methods.lock() {
            methods.push(method.clone());
        }
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        let Some(id) = message.get("id").and_then(Value::as_i64) else {
            if method == methods::CANCEL_REQUEST {
                if let (Some(id), Ok(mut cancelled)) =
                    (params["id"].as_i64(), shared.cancelled.lock())
                {
                    cancelled.push(id);
                }
            }
            continue;
        };

        if spec.silent {
            continue;
        }
        for reply in replies(&spec, id, &method, &params) {
            let mut data = reply.to_string().into_bytes();
            data.push(b'\n');
            if outbox.send(Bytes::from(data)).is_err() {
                return;
            }
        }
    }
}

fn result(id: i64, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn stream_item(id: i64, payload: Value) -> Value {
    json!({ "jsonrpc": "2.0", "method": methods::STREAM_ITEM, "params": { "id": id, "payload": payload } })
}

fn ref_ids(params: &Value) -> Vec<String> {
    params["queries"]
        .as_array()
        .map(|queries| {
            queries
                .iter()
                .filter_map(|q| q["refId"].as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

fn replies(spec: &FakePluginSpec, id: i64, method: &str, params: &Value) -> Vec<Value> {
    match method {
        methods::INITIALIZE => vec![result(
            id,
            json!({
                "protocolVersion": spec.protocol_version,
                "services": spec.services,
                "pluginInfo": { "name": "fake-plugin", "version": "1.0.0" },
            }),
        )],
        methods::LEGACY_QUERY => {
            let results: serde_json::Map<String, Value> = ref_ids(params)
                .into_iter()
                .map(|ref_id| {
                    let series = json!({ "name": format!("{}-series", ref_id), "points": [[1.0, 1000]] });
                    (ref_id.clone(), json!({ "refId": ref_id, "series": [series] }))
                })
                .collect();
            vec![result(id, json!({ "results": results }))]
        }
        methods::QUERY_DATA => {
            let responses: serde_json::Map<String, Value> = ref_ids(params)
                .into_iter()
                .map(|ref_id| (ref_id.clone(), json!({ "frames": [{ "name": ref_id }] })))
                .collect();
            vec![result(id, json!({ "responses": responses }))]
        }
        methods::CHECK_HEALTH => vec![result(
            id,
            json!({ "status": "ok", "message": "plugin is running" }),
        )],
        methods::COLLECT_METRICS => {
            let metrics = CollectMetricsResult {
                prometheus_metrics: Bytes::from_static(b"plugin_up 1\n"),
            };
            vec![result(id, serde_json::to_value(metrics).unwrap_or_default())]
        }
        methods::CALL_RESOURCE => {
            let mut replies: Vec<Value> = ["chunk-1", "chunk-2"]
                .iter()
                .map(|chunk| {
                    let response = CallResourceResponse {
                        status: 200,
                        body: Bytes::from(chunk.as_bytes().to_vec()),
                        ..Default::default()
                    };
                    stream_item(id, serde_json::to_value(response).unwrap_or_default())
                })
                .collect();
            if !spec.hold_streams {
                replies.push(result(id, Value::Null));
            }
            replies
        }
        methods::SUBSCRIBE_STREAM => vec![result(id, json!({ "status": "ok" }))],
        methods::PUBLISH_STREAM => vec![result(id, json!({ "status": "ok", "data": params["data"] }))],
        methods::RUN_STREAM => {
            let mut replies: Vec<Value> = (0..spec.stream_packets)
                .map(|seq| stream_item(id, json!({ "data": { "seq": seq } })))
                .collect();
            if !spec.hold_streams {
                replies.push(result(id, Value::Null));
            }
            replies
        }
        _ => vec![json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": codes::METHOD_NOT_FOUND, "message": format!("method not found: {}", method) },
        })],
    }
}
