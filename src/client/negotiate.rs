use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use super::v1::new_client_v1;
use super::v2::new_client_v2;
use super::PluginClient;
use crate::error::{PluginError, Result, TransportError};
use crate::protocol::handshake::HostInfo;
use crate::protocol::{methods, InitializeParams, InitializeResult, ProtocolVersion, RpcClient};

/// Run the initialize exchange and check the reported version against the
/// versions the host accepts for this plugin.
pub async fn handshake(
    rpc: &RpcClient,
    accepted_versions: &[u32],
    limit: Duration,
) -> Result<InitializeResult> {
    let started = Instant::now();
    let params = InitializeParams {
        protocol_versions: accepted_versions.to_vec(),
        host_info: HostInfo::default(),
    };

    let result: InitializeResult = match timeout(
        limit,
        rpc.call_typed::<_, InitializeResult>(methods::INITIALIZE, &params),
    )
    .await
    {
        Ok(result) => result?,
        Err(_) => {
            return Err(TransportError::HandshakeTimeout(limit.as_millis() as u64).into());
        }
    };

    // An unspecified version is the legacy protocol.
    let negotiated = result.protocol_version.max(1);
    if !accepted_versions.contains(&negotiated) {
        return Err(PluginError::start_failed(
            rpc.plugin_id(),
            format!(
                "plugin reported protocol version {}, host accepts {:?}",
                negotiated, accepted_versions
            ),
        ));
    }

    rpc.notify(methods::INITIALIZED, None).await?;

    tracing::debug!(
        plugin_id = %rpc.plugin_id(),
        protocol_version = negotiated,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Plugin handshake completed"
    );
    Ok(result)
}

/// Pick the client implementation for the negotiated version.
pub fn new_plugin_client(result: &InitializeResult, rpc: Arc<RpcClient>) -> Result<PluginClient> {
    let plugin_id = rpc.plugin_id().to_string();
    let client = match ProtocolVersion::from_negotiated(result.protocol_version) {
        ProtocolVersion::V2 => new_client_v2(result, rpc),
        ProtocolVersion::V1 => new_client_v1(result, rpc),
    };

    client.ok_or_else(|| {
        PluginError::start_failed(plugin_id, "no compatible plugin implementation found")
    })
}
