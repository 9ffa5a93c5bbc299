//! Backend plugins
//!
//! Every plugin, whether it runs as a subprocess or in-process, is reached
//! through the [`Plugin`] trait. Callers never see protocol versions; they
//! see the capability calls and three kinds of failure:
//!
//! - [`PluginError::Unavailable`]: not running right now, may come back
//! - [`PluginError::MethodNotImplemented`]: will never be supported
//! - anything else: passed through from the call itself
//!
//! # Modules
//!
//! - `descriptor`: immutable plugin identity and start hooks
//! - `process`: subprocess lifecycle behind a read-write lock
//! - `external`: the capability adapter over a managed process
//! - `core_plugin`: in-process plugins built from handlers
//! - `registry`: plugin ID to instance mapping

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{PluginError, Result};
use crate::types::{
    CallResourceRequest, CallResourceResponseSender, CheckHealthRequest, CheckHealthResult,
    CollectMetricsResult, DataSource, PublishStreamRequest, PublishStreamResponse, Query,
    Response, RunStreamRequest, StreamPacketSender, SubscribeStreamRequest,
    SubscribeStreamResponse,
};

pub mod core_plugin;
pub mod descriptor;
pub mod external;
pub mod process;
pub mod registry;

pub use core_plugin::CorePlugin;
pub use descriptor::{compose_start_command, PluginDescriptor, StartHook};
pub use external::{ExternalPlugin, ExternalPluginFactory};
pub use process::{ManagedProcess, ProcessPhase};
pub use registry::PluginRegistry;

#[async_trait]
pub trait Plugin: Send + Sync {
    fn plugin_id(&self) -> &str;

    /// Whether the host owns this plugin's process lifecycle.
    fn is_managed(&self) -> bool;

    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
    async fn exited(&self) -> bool;
    async fn decommission(&self) -> Result<()>;
    async fn is_decommissioned(&self) -> bool;

    async fn query(&self, datasource: &DataSource, query: Query) -> Result<Response>;

    async fn check_health(&self, request: CheckHealthRequest) -> Result<CheckHealthResult>;

    async fn collect_metrics(&self) -> Result<CollectMetricsResult>;

    async fn call_resource(
        &self,
        request: CallResourceRequest,
        sender: &dyn CallResourceResponseSender,
    ) -> Result<()>;

    async fn subscribe_stream(
        &self,
        request: SubscribeStreamRequest,
    ) -> Result<SubscribeStreamResponse>;

    async fn publish_stream(&self, request: PublishStreamRequest)
        -> Result<PublishStreamResponse>;

    async fn run_stream(
        &self,
        request: RunStreamRequest,
        sender: &dyn StreamPacketSender,
    ) -> Result<()>;
}

/// Creates a plugin instance at registration time. `env` is the host-wide
/// environment every plugin receives.
pub trait PluginFactory: Send + Sync {
    fn create(&self, plugin_id: &str, env: &HashMap<String, String>) -> Result<Arc<dyn Plugin>>;
}

impl<F> PluginFactory for F
where
    F: Fn(&str, &HashMap<String, String>) -> Result<Arc<dyn Plugin>> + Send + Sync,
{
    fn create(&self, plugin_id: &str, env: &HashMap<String, String>) -> Result<Arc<dyn Plugin>> {
        self(plugin_id, env)
    }
}

pub(crate) fn unavailable(plugin_id: &str) -> PluginError {
    PluginError::Unavailable(plugin_id.to_string())
}
