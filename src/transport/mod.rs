use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use crate::error::Result;
use crate::plugin::PluginDescriptor;

pub mod stdio;

/// Launches a plugin and hands back the connection to it
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self) -> Result<Arc<dyn Connection>>;
}

/// A live, line-oriented duplex channel to one plugin process
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    async fn send(&self, data: Bytes) -> Result<()>;
    async fn recv(&self) -> Result<Bytes>;
    /// Forcibly terminates the process behind the connection.
    async fn close(&self) -> Result<()>;
    /// True once the process has terminated or the connection was closed.
    fn is_closed(&self) -> bool;
    fn pid(&self) -> Option<u32> {
        None
    }
}

pub fn create_transport(
    descriptor: &PluginDescriptor,
    env: HashMap<String, String>,
) -> Arc<dyn Transport> {
    let mut transport = stdio::StdioTransport::new(descriptor.plugin_id.clone())
        .with_command(descriptor.executable_path.clone(), descriptor.args.clone())
        .with_env(env);
    if let Some(ref working_dir) = descriptor.working_directory {
        transport = transport.with_working_dir(working_dir.clone());
    }
    Arc::new(transport)
}
