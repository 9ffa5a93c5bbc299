use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::client::PluginClient;
use crate::config::PluginConfig;
use crate::error::Result;
use crate::protocol::ProtocolVersion;

/// Called after a successful negotiation with the plugin ID and the client.
/// An error fails the start.
pub type StartHook = Arc<dyn Fn(&str, &PluginClient) -> Result<()> + Send + Sync>;

/// Immutable identity of an external plugin
#[derive(Clone)]
pub struct PluginDescriptor {
    pub plugin_id: String,
    pub executable_path: PathBuf,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_directory: Option<PathBuf>,
    pub protocol_versions: Vec<u32>,
    pub managed: bool,
    on_start: Option<StartHook>,
    on_legacy_start: Option<StartHook>,
}

impl PluginDescriptor {
    pub fn new(plugin_id: impl Into<String>, executable_path: impl Into<PathBuf>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            executable_path: executable_path.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_directory: None,
            protocol_versions: vec![1, 2],
            managed: true,
            on_start: None,
            on_legacy_start: None,
        }
    }

    pub fn from_config(plugin_id: &str, config: &PluginConfig) -> Self {
        let executable = if config.platform_suffix {
            let name = config.executable.to_string_lossy();
            PathBuf::from(compose_start_command(&name))
        } else {
            config.executable.clone()
        };

        let mut descriptor = Self::new(plugin_id, executable)
            .with_args(config.args.clone())
            .with_env(config.env.clone())
            .with_protocol_versions(config.protocol_versions.clone());
        descriptor.working_directory = config.working_directory.clone();
        descriptor.managed = config.managed;
        descriptor
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_protocol_versions(mut self, versions: Vec<u32>) -> Self {
        self.protocol_versions = versions;
        self
    }

    pub fn unmanaged(mut self) -> Self {
        self.managed = false;
        self
    }

    pub fn on_start(mut self, hook: StartHook) -> Self {
        self.on_start = Some(hook);
        self
    }

    pub fn on_legacy_start(mut self, hook: StartHook) -> Self {
        self.on_legacy_start = Some(hook);
        self
    }

    /// Run the hook matching the negotiated client's version, if any.
    pub fn run_start_hook(&self, client: &PluginClient) -> Result<()> {
        let hook = match client.version() {
            ProtocolVersion::V1 => self.on_legacy_start.as_ref(),
            ProtocolVersion::V2 => self.on_start.as_ref(),
        };
        match hook {
            Some(hook) => hook(&self.plugin_id, client),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("plugin_id", &self.plugin_id)
            .field("executable_path", &self.executable_path)
            .field("args", &self.args)
            .field("protocol_versions", &self.protocol_versions)
            .field("managed", &self.managed)
            .finish_non_exhaustive()
    }
}

/// Plugin distributions ship one binary per platform named
/// `<executable>_<os>_<arch>[.exe]`.
pub fn compose_start_command(executable: &str) -> String {
    let os = std::env::consts::OS;
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        other => other,
    };
    let extension = if os == "windows" { ".exe" } else { "" };

    let stem = Path::new(executable)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| executable.to_string());
    let command = format!("{}_{}_{}{}", stem, os, arch, extension);

    match Path::new(executable).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            parent.join(command).to_string_lossy().into_owned()
        }
        _ => command,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Handlers;
    use crate::error::PluginError;

    #[test]
    fn test_compose_start_command() {
        let command = compose_start_command("gpx_testdata");
        assert!(command.starts_with("gpx_testdata_"));
        assert!(command.contains(std::env::consts::OS));
        if cfg!(windows) {
            assert!(command.ends_with(".exe"));
        }
    }

    #[test]
    fn test_compose_start_command_keeps_directory() {
        let command = compose_start_command("plugins/testdata/gpx_testdata");
        let path = Path::new(&command);
        assert_eq!(path.parent().unwrap(), Path::new("plugins/testdata"));
    }

    #[test]
    fn test_defaults() {
        let descriptor = PluginDescriptor::new("testdata", "/opt/plugins/gpx_testdata");
        assert_eq!(descriptor.protocol_versions, vec![1, 2]);
        assert!(descriptor.managed);
        assert!(!descriptor.clone().unmanaged().managed);
    }

    #[test]
    fn test_start_hook_dispatch_by_version() {
        let descriptor = PluginDescriptor::new("testdata", "gpx_testdata")
            .on_legacy_start(Arc::new(|id, _| {
                Err(PluginError::start_failed(id, "legacy rejected"))
            }));

        let v2 = PluginClient::new(ProtocolVersion::V2, Handlers::default());
        assert!(descriptor.run_start_hook(&v2).is_ok());

        let v1 = PluginClient::new(ProtocolVersion::V1, Handlers::default());
        assert!(descriptor.run_start_hook(&v1).is_err());
    }
}
