//! Setup hooks.
//!
//! Modules register plugin types, connectors and anything else that must exist before configuration is wired.
use std::sync::Arc;

use ffwd_core::sources::Source;
use ffwd_error::GenericError;

use crate::{
    connectors::{TcpConnector, UdpConnector},
    registry::PluginRegistry,
    sinks::{BrokerSinkConfiguration, ProtocolSinkConfiguration},
    sources::HeartbeatConfiguration,
};

/// A bundle of plugins registered at startup.
pub trait Module: Send + Sync {
    /// Returns the module name.
    fn name(&self) -> &str;

    /// Registers the module's plugins.
    ///
    /// # Errors
    ///
    /// If a plugin type is already registered, an error is returned.
    fn setup(&self, registry: &mut PluginRegistry) -> Result<(), GenericError>;
}

/// The built-in plugins.
///
/// Registers the `tcp` and `udp` connectors, the `protocol` and `broker` sinks, and the `heartbeat` source.
#[derive(Clone, Copy, Debug, Default)]
pub struct CoreModule;

impl Module for CoreModule {
    fn name(&self) -> &str {
        "core"
    }

    fn setup(&self, registry: &mut PluginRegistry) -> Result<(), GenericError> {
        registry.register_connector("tcp", TcpConnector::default());
        registry.register_connector("udp", UdpConnector::default());

        registry.register_sink("protocol", |id, config, context| {
            config.settings::<ProtocolSinkConfiguration>()?.build(id, context)
        })?;
        registry.register_sink("broker", |id, config, context| {
            Ok(config.settings::<BrokerSinkConfiguration>()?.build(id, context))
        })?;

        registry.register_source("heartbeat", |id, config, context| {
            let source = config.settings::<HeartbeatConfiguration>()?.build(
                id,
                context.handle().clone(),
                context.output().clone(),
            )?;
            Ok(Arc::new(source) as Arc<dyn Source>)
        })?;

        Ok(())
    }
}
