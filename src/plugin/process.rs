use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::descriptor::PluginDescriptor;
use crate::client::{self, PluginClient};
use crate::error::{PluginError, Result};
use crate::protocol::RpcClient;
use crate::transport::{Connection, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessPhase {
    NotStarted,
    Starting,
    Running,
    Stopped,
    /// The process died without a stop
    Exited,
    Decommissioned,
}

#[derive(Default)]
struct ProcessState {
    phase: Option<ProcessPhase>,
    connection: Option<Arc<dyn Connection>>,
    rpc: Option<Arc<RpcClient>>,
    client: Option<PluginClient>,
    decommissioned: bool,
    started_at: Option<DateTime<Utc>>,
}

impl ProcessState {
    /// A reader that gave up counts as dead even if the process lingers.
    fn is_live(&self) -> bool {
        self.client.is_some()
            && self
                .rpc
                .as_ref()
                .map(|rpc| !rpc.is_closed())
                .unwrap_or(false)
    }
}

/// One plugin subprocess and the client negotiated with it
///
/// Starting and stopping take the write lock; handing out the client takes
/// the read lock. A crash is noticed the next time the connection is looked
/// at, there is no background reaper.
pub struct ManagedProcess {
    descriptor: Arc<PluginDescriptor>,
    transport: Arc<dyn Transport>,
    handshake_timeout: Duration,
    state: RwLock<ProcessState>,
}

impl ManagedProcess {
    pub fn new(
        descriptor: Arc<PluginDescriptor>,
        transport: Arc<dyn Transport>,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            descriptor,
            transport,
            handshake_timeout,
            state: RwLock::new(ProcessState::default()),
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.descriptor.plugin_id
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    /// Launch the process and negotiate a client. Calling this while the
    /// plugin is already running does nothing.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.write().await;

        if state.decommissioned {
            return Err(PluginError::start_failed(
                self.plugin_id(),
                "plugin is decommissioned",
            ));
        }
        if state.is_live() {
            debug!(plugin_id = %self.plugin_id(), "Plugin already running");
            return Ok(());
        }

        // Reap whatever is left of a previous process.
        if let Some(stale) = state.connection.take() {
            let _ = stale.close().await;
        }
        state.rpc = None;
        state.client = None;
        state.phase = Some(ProcessPhase::Starting);

        match self.launch().await {
            Ok((connection, rpc, client)) => {
                info!(
                    plugin_id = %self.plugin_id(),
                    pid = ?connection.pid(),
                    protocol_version = %client.version(),
                    "Plugin started"
                );
                state.connection = Some(connection);
                state.rpc = Some(rpc);
                state.client = Some(client);
                state.started_at = Some(Utc::now());
                state.phase = Some(ProcessPhase::Running);
                Ok(())
            }
            Err(e) => {
                error!(plugin_id = %self.plugin_id(), error = %e, "Failed to start plugin");
                state.phase = None;
                Err(e)
            }
        }
    }

    async fn launch(&self) -> Result<(Arc<dyn Connection>, Arc<RpcClient>, PluginClient)> {
        let connection = self
            .transport
            .connect()
            .await
            .map_err(|e| PluginError::start_failed(self.plugin_id(), e))?;

        match self.negotiate(connection.clone()).await {
            Ok((rpc, client)) => Ok((connection, rpc, client)),
            Err(e) => {
                if let Err(close_err) = connection.close().await {
                    warn!(plugin_id = %self.plugin_id(), error = %close_err, "Failed to kill plugin after failed start");
                }
                Err(match e {
                    PluginError::StartFailed { .. } => e,
                    other => PluginError::start_failed(self.plugin_id(), other),
                })
            }
        }
    }

    async fn negotiate(
        &self,
        connection: Arc<dyn Connection>,
    ) -> Result<(Arc<RpcClient>, PluginClient)> {
        let rpc = Arc::new(RpcClient::new(self.plugin_id(), connection));
        let result = client::handshake(
            &rpc,
            &self.descriptor.protocol_versions,
            self.handshake_timeout,
        )
        .await?;
        let client = client::new_plugin_client(&result, rpc.clone())?;
        self.descriptor.run_start_hook(&client)?;
        Ok((rpc, client))
    }

    /// Kill the process. The plugin reports unavailable until started again.
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.client = None;
        state.rpc = None;

        if let Some(connection) = state.connection.take() {
            if let Err(e) = connection.close().await {
                warn!(plugin_id = %self.plugin_id(), error = %e, "Error while killing plugin");
            }
            info!(plugin_id = %self.plugin_id(), "Plugin stopped");
        }
        if state.phase.is_some() {
            state.phase = Some(ProcessPhase::Stopped);
        }
        Ok(())
    }

    /// True if the process is not running, including never started.
    pub async fn exited(&self) -> bool {
        let state = self.state.read().await;
        match (&state.connection, &state.rpc) {
            (Some(connection), Some(rpc)) => connection.is_closed() || rpc.is_closed(),
            (Some(connection), None) => connection.is_closed(),
            (None, _) => true,
        }
    }

    pub async fn decommission(&self) {
        let mut state = self.state.write().await;
        if !state.decommissioned {
            state.decommissioned = true;
            info!(plugin_id = %self.plugin_id(), "Plugin decommissioned");
        }
    }

    pub async fn is_decommissioned(&self) -> bool {
        self.state.read().await.decommissioned
    }

    /// The negotiated client, if the plugin is live and not decommissioned.
    pub async fn client(&self) -> Option<PluginClient> {
        let state = self.state.read().await;
        if state.decommissioned || !state.is_live() {
            return None;
        }
        state.client.clone()
    }

    pub async fn phase(&self) -> ProcessPhase {
        let state = self.state.read().await;
        if state.decommissioned {
            return ProcessPhase::Decommissioned;
        }
        match state.phase {
            None => ProcessPhase::NotStarted,
            Some(ProcessPhase::Running) if !state.is_live() => ProcessPhase::Exited,
            Some(phase) => phase,
        }
    }

    pub async fn pid(&self) -> Option<u32> {
        let state = self.state.read().await;
        state.connection.as_ref().and_then(|conn| conn.pid())
    }

    pub async fn started_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakePluginSpec, MockTransport};

    fn process_for(spec: FakePluginSpec) -> (MockTransport, ManagedProcess) {
        let transport = MockTransport::new(spec);
        let descriptor = Arc::new(PluginDescriptor::new("test-ds", "gpx_test"));
        let process = ManagedProcess::new(
            descriptor,
            Arc::new(transport.clone()),
            Duration::from_secs(5),
        );
        (transport, process)
    }

    #[tokio::test]
    async fn test_start_then_stop() {
        let (_transport, process) = process_for(FakePluginSpec::v2());
        assert_eq!(process.phase().await, ProcessPhase::NotStarted);
        assert!(process.exited().await);

        process.start().await.unwrap();
        assert_eq!(process.phase().await, ProcessPhase::Running);
        assert!(!process.exited().await);
        assert!(process.client().await.is_some());
        assert!(process.started_at().await.is_some());

        process.stop().await.unwrap();
        assert_eq!(process.phase().await, ProcessPhase::Stopped);
        assert!(process.exited().await);
        assert!(process.client().await.is_none());
    }

    #[tokio::test]
    async fn test_second_start_is_noop() {
        let (transport, process) = process_for(FakePluginSpec::v2());
        process.start().await.unwrap();
        process.start().await.unwrap();
        assert_eq!(transport.spawn_count(), 1);
    }

    #[tokio::test]
    async fn test_crash_is_detected_lazily() {
        let (transport, process) = process_for(FakePluginSpec::v2());
        process.start().await.unwrap();

        transport.latest().unwrap().crash();
        assert!(process.exited().await);
        assert!(process.client().await.is_none());
        assert_eq!(process.phase().await, ProcessPhase::Exited);

        process.start().await.unwrap();
        assert_eq!(transport.spawn_count(), 2);
        assert!(process.client().await.is_some());
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let transport = MockTransport::failing();
        let descriptor = Arc::new(PluginDescriptor::new("broken", "gpx_broken"));
        let process = ManagedProcess::new(descriptor, Arc::new(transport), Duration::from_secs(5));

        let err = process.start().await.unwrap_err();
        assert!(matches!(err, PluginError::StartFailed { .. }));
        assert!(process.exited().await);
        assert_eq!(process.phase().await, ProcessPhase::NotStarted);
    }

    #[tokio::test]
    async fn test_failed_negotiation_kills_process() {
        let (transport, process) = process_for(FakePluginSpec::v2().with_services(&[]));

        let err = process.start().await.unwrap_err();
        assert!(err.to_string().contains("no compatible plugin implementation found"));
        assert!(transport.latest().unwrap().is_exited());
        assert!(process.client().await.is_none());
    }

    #[tokio::test]
    async fn test_decommissioned_process_hands_out_no_client() {
        let (_transport, process) = process_for(FakePluginSpec::v2());
        process.start().await.unwrap();

        process.decommission().await;
        assert!(process.is_decommissioned().await);
        assert!(process.client().await.is_none());
        assert_eq!(process.phase().await, ProcessPhase::Decommissioned);
        assert!(process.start().await.is_err());
    }
}
