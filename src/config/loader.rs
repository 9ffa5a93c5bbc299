use super::schema::Config;
use crate::error::{ConfigError, Result};
use figment::{
    providers::{Env, Format, Json, Toml, Yaml},
    Figment,
};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

const ENV_PREFIX: &str = "PLUGIN_HOST_";

pub async fn load_from_env_or_file() -> Result<Config> {
    let config: Config = Figment::new()
        .merge(Toml::file("plugin-host.toml"))
        .merge(Json::file("plugin-host.json"))
        .merge(Yaml::file("plugin-host.yaml"))
        .merge(Yaml::file("plugin-host.yml"))
        // PLUGIN_HOST_LOGGING__LEVEL=debug
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    validate(&config)?;
    apply_env_substitutions(config)
}

pub async fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();

    let figment = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => Figment::new().merge(Toml::file(path)),
        Some("json") => Figment::new().merge(Json::file(path)),
        Some("yaml") | Some("yml") => Figment::new().merge(Yaml::file(path)),
        _ => {
            return Err(ConfigError::Parse(
                "Unsupported config file format. Use .toml, .json, .yaml, or .yml".into(),
            )
            .into());
        }
    };

    let config: Config = figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate(&config)?;
    apply_env_substitutions(config)
}

pub fn validate(config: &Config) -> Result<()> {
    for (id, plugin) in &config.plugins {
        if plugin.executable.as_os_str().is_empty() {
            return Err(
                ConfigError::Validation(format!("Plugin '{}' has empty executable", id)).into(),
            );
        }
        if plugin.protocol_versions.is_empty() {
            return Err(ConfigError::Validation(format!(
                "Plugin '{}' accepts no protocol versions",
                id
            ))
            .into());
        }
        if let Some(version) = plugin
            .protocol_versions
            .iter()
            .find(|v| !matches!(**v, 1 | 2))
        {
            return Err(ConfigError::Validation(format!(
                "Plugin '{}' has unsupported protocol version {}",
                id, version
            ))
            .into());
        }
    }

    if config.handshake.timeout_ms == 0 {
        return Err(
            ConfigError::Validation("Handshake timeout must be greater than 0".into()).into(),
        );
    }
    if config.handshake.magic_cookie_key.is_empty() || config.handshake.magic_cookie_value.is_empty()
    {
        return Err(ConfigError::Validation(
            "Handshake magic cookie key and value must be set".into(),
        )
        .into());
    }

    Ok(())
}

fn apply_env_substitutions(mut config: Config) -> Result<Config> {
    for plugin in config.plugins.values_mut() {
        for arg in &mut plugin.args {
            *arg = substitute_env_vars(arg)?;
        }
        for value in plugin.env.values_mut() {
            *value = substitute_env_vars(value)?;
        }
    }

    for value in config.host_env.values_mut() {
        *value = substitute_env_vars(value)?;
    }

    Ok(config)
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("valid env var pattern"))
}

fn substitute_env_vars(input: &str) -> Result<String> {
    let mut result = input.to_string();

    for cap in env_var_pattern().captures_iter(input) {
        let var_name = &cap[1];
        match std::env::var(var_name) {
            Ok(value) => {
                result = result.replace(&cap[0], &value);
            }
            Err(_) => {
                // ${VAR:-default}
                if let Some((name, default)) = var_name.split_once(":-") {
                    match std::env::var(name) {
                        Ok(value) => result = result.replace(&cap[0], &value),
                        Err(_) => result = result.replace(&cap[0], default),
                    }
                } else {
                    return Err(ConfigError::EnvVar(format!(
                        "Environment variable '{}' not found",
                        var_name
                    ))
                    .into());
                }
            }
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_env_substitution() {
        std::env::set_var("PLUGIN_HOST_TEST_VAR", "test_value");

        let result = substitute_env_vars("Hello ${PLUGIN_HOST_TEST_VAR}!").unwrap();
        assert_eq!(result, "Hello test_value!");

        let result = substitute_env_vars("${PLUGIN_HOST_MISSING:-default}").unwrap();
        assert_eq!(result, "default");

        assert!(substitute_env_vars("${PLUGIN_HOST_MISSING_NO_DEFAULT}").is_err());

        std::env::remove_var("PLUGIN_HOST_TEST_VAR");
    }

    fn write_config(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_load_toml_with_defaults() {
        let file = write_config(
            ".toml",
            r#"
[plugins.testdata]
executable = "/var/lib/plugins/gpx_testdata"
args = ["--level", "${PLUGIN_HOST_LOADER_LEVEL:-debug}"]

[plugins.legacy]
executable = "/var/lib/plugins/legacy"
protocolVersions = [1]
autoStart = false

[hostEnv]
GF_VERSION = "10.0.0"
"#,
        );

        let config = load_from_path(file.path()).await.unwrap();
        let testdata = &config.plugins["testdata"];
        assert_eq!(testdata.args, vec!["--level", "debug"]);
        assert_eq!(testdata.protocol_versions, vec![1, 2]);
        assert!(testdata.managed);
        assert!(testdata.auto_start);
        assert!(!testdata.platform_suffix);

        assert!(!config.plugins["legacy"].auto_start);
        assert_eq!(config.host_env["GF_VERSION"], "10.0.0");
        assert_eq!(config.handshake.timeout_ms, 10_000);
        assert_eq!(config.logging.level, "info");
    }

    #[tokio::test]
    async fn test_load_yaml() {
        let file = write_config(
            ".yaml",
            r#"
plugins:
  testdata:
    executable: /var/lib/plugins/gpx_testdata
    managed: false
handshake:
  timeoutMs: 2500
logging:
  json: true
"#,
        );

        let config = load_from_path(file.path()).await.unwrap();
        assert!(!config.plugins["testdata"].managed);
        assert_eq!(config.handshake.timeout_ms, 2500);
        assert!(config.logging.json);
    }

    #[tokio::test]
    async fn test_unsupported_extension() {
        let file = write_config(".ini", "plugins = {}");
        let err = load_from_path(file.path()).await.unwrap_err();
        assert!(err.to_string().contains("Unsupported config file format"));
    }

    #[tokio::test]
    async fn test_rejects_unknown_protocol_version() {
        let file = write_config(
            ".json",
            r#"{ "plugins": { "future": { "executable": "gpx_future", "protocolVersions": [3] } } }"#,
        );
        let err = load_from_path(file.path()).await.unwrap_err();
        assert!(err.to_string().contains("unsupported protocol version 3"));
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        assert!(validate(&config).is_ok());

        config.handshake.timeout_ms = 0;
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.handshake.magic_cookie_value.clear();
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.plugins.insert(
            "empty".to_string(),
            crate::config::PluginConfig {
                executable: Default::default(),
                args: vec![],
                env: Default::default(),
                working_directory: None,
                managed: true,
                protocol_versions: vec![1, 2],
                auto_start: true,
                platform_suffix: false,
            },
        );
        assert!(validate(&config).is_err());

        config.plugins.get_mut("empty").unwrap().executable = "gpx_empty".into();
        assert!(validate(&config).is_ok());
        config.plugins.get_mut("empty").unwrap().protocol_versions.clear();
        assert!(validate(&config).is_err());
    }
}
