use std::time::Duration;

use ffwd_config::GenericConfiguration;
use ffwd_error::{generic_error, ErrorContext as _, GenericError};
use serde::{Deserialize, Serialize};

use crate::registry::PluginConfiguration;

const fn default_async_threads() -> usize {
    4
}

const fn default_boss_threads() -> usize {
    2
}

const fn default_worker_threads() -> usize {
    4
}

const fn default_timeout_secs() -> u64 {
    10
}

const fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

/// A set of plugin declarations.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PluginSetConfiguration {
    /// Declared plugins, in order.
    pub plugins: Vec<PluginConfiguration>,
}

/// Agent configuration.
///
/// Every field has a default, so an empty configuration file yields an agent with no plugins.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentConfiguration {
    /// Number of threads driving asynchronous work.
    pub async_threads: usize,

    /// Number of threads reserved for accepting I/O work.
    ///
    /// Together with `worker_threads`, bounds the pool used for blocking plugin calls.
    pub boss_threads: usize,

    /// Number of threads for blocking plugin calls.
    pub worker_threads: usize,

    /// Default timeout for each connection attempt, in seconds.
    pub connect_timeout_secs: u64,

    /// Default timeout for batch sends, in seconds.
    pub send_timeout_secs: u64,

    /// Upper bound on the stop sequence, in seconds.
    pub shutdown_timeout_secs: u64,

    /// Log level filter, in `EnvFilter` syntax.
    pub log_level: String,

    /// Whether to log in JSON.
    pub log_format_json: bool,

    /// Source plugins.
    pub input: PluginSetConfiguration,

    /// Sink plugins.
    pub output: PluginSetConfiguration,
}

impl Default for AgentConfiguration {
    fn default() -> Self {
        Self {
            async_threads: default_async_threads(),
            boss_threads: default_boss_threads(),
            worker_threads: default_worker_threads(),
            connect_timeout_secs: default_timeout_secs(),
            send_timeout_secs: default_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            log_level: default_log_level(),
            log_format_json: false,
            input: PluginSetConfiguration::default(),
            output: PluginSetConfiguration::default(),
        }
    }
}

impl AgentConfiguration {
    /// Creates a new `AgentConfiguration` from the given configuration.
    ///
    /// # Errors
    ///
    /// If the configuration cannot be deserialized, or the thread pool sizes are invalid, an error is returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, GenericError> {
        let agent_config: Self = config
            .as_typed()
            .error_context("Failed to parse agent configuration.")?;
        agent_config.validate()?;
        Ok(agent_config)
    }

    /// Checks that the configured values can be used to build a runtime.
    ///
    /// # Errors
    ///
    /// If any thread pool would be empty, an error is returned.
    pub fn validate(&self) -> Result<(), GenericError> {
        if self.async_threads == 0 {
            return Err(generic_error!("`async_threads` must be at least 1."));
        }
        if self.boss_threads + self.worker_threads == 0 {
            return Err(generic_error!(
                "At least one of `boss_threads` and `worker_threads` must be non-zero."
            ));
        }
        Ok(())
    }

    /// Returns the size of the pool used for blocking calls.
    pub fn blocking_threads(&self) -> usize {
        self.boss_threads + self.worker_threads
    }

    /// Returns the default connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Returns the default batch send timeout.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    /// Returns the stop sequence timeout.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use ffwd_config::ConfigurationLoader;

    use super::*;

    fn load(yaml: &str) -> Result<AgentConfiguration, GenericError> {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let config = ConfigurationLoader::default().from_yaml(file.path()).unwrap().into_generic();
        AgentConfiguration::from_configuration(&config)
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = load("{}").unwrap();

        assert_eq!(config.async_threads, 4);
        assert_eq!(config.blocking_threads(), 6);
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.send_timeout(), Duration::from_secs(10));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(30));
        assert_eq!(config.log_level, "info");
        assert!(config.input.plugins.is_empty());
        assert!(config.output.plugins.is_empty());
    }

    #[test]
    fn plugins_keep_declaration_order() {
        let config = load(
            r#"
async_threads: 2
output:
  plugins:
    - type: protocol
      id: riemann
      destination: tcp://127.0.0.1:5555
    - type: broker
input:
  plugins:
    - type: heartbeat
      interval_secs: 5
"#,
        )
        .unwrap();

        assert_eq!(config.async_threads, 2);
        let types = config
            .output
            .plugins
            .iter()
            .map(|plugin| plugin.plugin_type.as_str())
            .collect::<Vec<_>>();
        assert_eq!(types, vec!["protocol", "broker"]);
        assert_eq!(config.output.plugins[0].id.as_deref(), Some("riemann"));
        assert_eq!(config.input.plugins[0].settings["interval_secs"], 5);
    }

    #[test]
    fn empty_pools_are_rejected() {
        assert!(load("async_threads: 0").is_err());
        assert!(load("boss_threads: 0\nworker_threads: 0").is_err());
        assert!(load("boss_threads: 0\nworker_threads: 1").is_ok());
    }
}
