//! Plugin registry.
//!
//! Plugins are declared in configuration by `type`. The registry maps each type to a factory that turns the plugin's
//! settings into a running instance. It is filled by [`Module`][crate::modules::Module] setup hooks before any
//! configuration is wired.
use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use ffwd_core::{
    managers::OutputManager,
    protocol::{ConnectorRegistry, ProtocolClient},
    sinks::BatchedSink,
    sources::Source,
};
use ffwd_error::{generic_error, ErrorContext as _, GenericError};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::runtime::Handle;

/// A single plugin entry in configuration.
///
/// `type` selects the factory. Every other key, apart from the optional `id`, is handed to the factory as the
/// plugin's settings.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PluginConfiguration {
    /// Plugin type.
    #[serde(rename = "type")]
    pub plugin_type: String,

    /// Plugin identifier, used in logs and errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Type-specific settings.
    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

impl PluginConfiguration {
    /// Creates a new `PluginConfiguration` of the given type with no settings.
    pub fn new<S: Into<String>>(plugin_type: S) -> Self {
        Self {
            plugin_type: plugin_type.into(),
            id: None,
            settings: Map::new(),
        }
    }

    /// Sets a single setting.
    pub fn with_setting<K: Into<String>>(mut self, key: K, value: Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }

    /// Sets the plugin identifier.
    pub fn with_id<S: Into<String>>(mut self, id: S) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Returns the plugin identifier, derived from its type and position when none is configured.
    pub fn resolved_id(&self, index: usize) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => format!("{}-{}", self.plugin_type, index),
        }
    }

    /// Deserializes the settings as `T`.
    ///
    /// # Errors
    ///
    /// If the settings do not match `T`, an error is returned.
    pub fn settings<T: DeserializeOwned>(&self) -> Result<T, GenericError> {
        serde_json::from_value(Value::Object(self.settings.clone()))
            .with_error_context(|| format!("Invalid settings for '{}' plugin.", self.plugin_type))
    }
}

/// Shared resources handed to sink factories.
#[derive(Clone, Debug)]
pub struct SinkContext {
    handle: Handle,
    connectors: ConnectorRegistry,
    connect_timeout: Duration,
    send_timeout: Duration,
}

impl SinkContext {
    /// Creates a new `SinkContext`.
    pub fn new(
        handle: Handle, connectors: ConnectorRegistry, connect_timeout: Duration, send_timeout: Duration,
    ) -> Self {
        Self {
            handle,
            connectors,
            connect_timeout,
            send_timeout,
        }
    }

    /// Returns the runtime that sinks spawn their background work on.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Returns the registered protocol connectors.
    pub fn connectors(&self) -> &ConnectorRegistry {
        &self.connectors
    }

    /// Returns the default connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns the default batch send timeout.
    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }
}

/// Shared resources handed to source factories.
#[derive(Clone, Debug)]
pub struct SourceContext {
    handle: Handle,
    output: OutputManager,
}

impl SourceContext {
    /// Creates a new `SourceContext`.
    pub fn new(handle: Handle, output: OutputManager) -> Self {
        Self { handle, output }
    }

    /// Returns the runtime that sources spawn their work on.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Returns the fan-out to every configured sink.
    pub fn output(&self) -> &OutputManager {
        &self.output
    }
}

type SinkFactory =
    Box<dyn Fn(&str, &PluginConfiguration, &SinkContext) -> Result<Arc<dyn BatchedSink>, GenericError> + Send + Sync>;

type SourceFactory =
    Box<dyn Fn(&str, &PluginConfiguration, &SourceContext) -> Result<Arc<dyn Source>, GenericError> + Send + Sync>;

/// Lookup table from plugin type to factory.
#[derive(Default)]
pub struct PluginRegistry {
    sinks: HashMap<String, SinkFactory>,
    sources: HashMap<String, SourceFactory>,
    connectors: ConnectorRegistry,
}

impl PluginRegistry {
    /// Registers a sink factory.
    ///
    /// The factory is called with the plugin identifier, its configuration, and the shared sink context.
    ///
    /// # Errors
    ///
    /// If a sink factory is already registered for the type, an error is returned.
    pub fn register_sink<S, F>(&mut self, plugin_type: S, factory: F) -> Result<(), GenericError>
    where
        S: Into<String>,
        F: Fn(&str, &PluginConfiguration, &SinkContext) -> Result<Arc<dyn BatchedSink>, GenericError>
            + Send
            + Sync
            + 'static,
    {
        let plugin_type = plugin_type.into();
        if self.sinks.contains_key(&plugin_type) {
            return Err(generic_error!("Sink type '{}' is already registered.", plugin_type));
        }
        self.sinks.insert(plugin_type, Box::new(factory));
        Ok(())
    }

    /// Registers a source factory.
    ///
    /// # Errors
    ///
    /// If a source factory is already registered for the type, an error is returned.
    pub fn register_source<S, F>(&mut self, plugin_type: S, factory: F) -> Result<(), GenericError>
    where
        S: Into<String>,
        F: Fn(&str, &PluginConfiguration, &SourceContext) -> Result<Arc<dyn Source>, GenericError>
            + Send
            + Sync
            + 'static,
    {
        let plugin_type = plugin_type.into();
        if self.sources.contains_key(&plugin_type) {
            return Err(generic_error!("Source type '{}' is already registered.", plugin_type));
        }
        self.sources.insert(plugin_type, Box::new(factory));
        Ok(())
    }

    /// Registers a protocol connector for the given scheme.
    pub fn register_connector<S, C>(&mut self, scheme: S, client: C)
    where
        S: Into<String>,
        C: ProtocolClient + 'static,
    {
        self.connectors.register(scheme, client);
    }

    /// Returns the registered protocol connectors.
    pub fn connectors(&self) -> &ConnectorRegistry {
        &self.connectors
    }

    /// Returns the registered sink types, sorted.
    pub fn sink_types(&self) -> Vec<&str> {
        sorted_keys(&self.sinks)
    }

    /// Returns the registered source types, sorted.
    pub fn source_types(&self) -> Vec<&str> {
        sorted_keys(&self.sources)
    }

    /// Builds a sink from its configuration.
    ///
    /// # Errors
    ///
    /// If the type is not registered, or the factory fails, an error is returned.
    pub fn build_sink(
        &self, id: &str, config: &PluginConfiguration, context: &SinkContext,
    ) -> Result<Arc<dyn BatchedSink>, GenericError> {
        let factory = self.sinks.get(&config.plugin_type).ok_or_else(|| {
            generic_error!(
                "Unknown sink type '{}'. Known types: {}.",
                config.plugin_type,
                self.sink_types().join(", ")
            )
        })?;
        factory(id, config, context).with_error_context(|| format!("Failed to build sink '{}'.", id))
    }

    /// Builds a source from its configuration.
    ///
    /// # Errors
    ///
    /// If the type is not registered, or the factory fails, an error is returned.
    pub fn build_source(
        &self, id: &str, config: &PluginConfiguration, context: &SourceContext,
    ) -> Result<Arc<dyn Source>, GenericError> {
        let factory = self.sources.get(&config.plugin_type).ok_or_else(|| {
            generic_error!(
                "Unknown source type '{}'. Known types: {}.",
                config.plugin_type,
                self.source_types().join(", ")
            )
        })?;
        factory(id, config, context).with_error_context(|| format!("Failed to build source '{}'.", id))
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("sinks", &self.sink_types())
            .field("sources", &self.source_types())
            .field("connectors", &self.connectors)
            .finish()
    }
}

fn sorted_keys<V>(map: &HashMap<String, V>) -> Vec<&str> {
    let mut keys = map.keys().map(String::as_str).collect::<Vec<_>>();
    keys.sort_unstable();
    keys
}
