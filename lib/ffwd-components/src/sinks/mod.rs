//! Sink plugin configurations.
use std::{sync::Arc, time::Duration};

use ffwd_core::{
    protocol::{ProtocolConnectionManager, ProtocolDescriptor},
    retry::RetryPolicyConfiguration,
    sinks::{
        broker::{BrokerPluginSink, Partitioner, Router},
        BatchedSink, ProtocolPluginSink,
    },
};
use ffwd_error::{generic_error, GenericError};
use serde::Deserialize;

use crate::{producers::ProducerConfiguration, registry::SinkContext, serializers::SerializerConfiguration};

/// Protocol sink configuration.
///
/// Writes serialized items to a single destination over the connector registered for the destination's scheme.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProtocolSinkConfiguration {
    /// Destination to connect to, such as `tcp://127.0.0.1:19091`.
    pub destination: ProtocolDescriptor,

    /// Serializer for outgoing items.
    #[serde(default)]
    pub serializer: SerializerConfiguration,

    /// Policy for retrying failed connection attempts.
    #[serde(default)]
    pub retry: RetryPolicyConfiguration,

    /// Per-attempt connect timeout, in seconds.
    ///
    /// Defaults to the agent-wide `connect_timeout_secs`.
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,

    /// Timeout for batch sends, in seconds.
    ///
    /// Defaults to the agent-wide `send_timeout_secs`.
    #[serde(default)]
    pub send_timeout_secs: Option<u64>,
}

impl ProtocolSinkConfiguration {
    /// Builds the sink.
    ///
    /// # Errors
    ///
    /// If no connector is registered for the destination's scheme, an error is returned.
    pub fn build(&self, id: &str, context: &SinkContext) -> Result<Arc<dyn BatchedSink>, GenericError> {
        let scheme = self.destination.scheme();
        if !context.connectors().supports(scheme) {
            return Err(generic_error!(
                "No connector for scheme '{}' in destination '{}'. Supported schemes: {}.",
                scheme,
                self.destination,
                context.connectors().schemes().join(", ")
            ));
        }

        let connect_timeout = self
            .connect_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(context.connect_timeout());
        let send_timeout = self
            .send_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(context.send_timeout());

        let manager = ProtocolConnectionManager::new(
            self.destination.clone(),
            Arc::new(context.connectors().clone()),
            self.retry.build(),
            connect_timeout,
        );

        Ok(Arc::new(ProtocolPluginSink::new(
            id,
            manager,
            self.serializer.build(),
            send_timeout,
        )))
    }
}

/// Broker sink configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerSinkConfiguration {
    /// Producer to hand records to.
    pub producer: ProducerConfiguration,

    /// Topic selection.
    pub router: Router,

    /// Partition key selection.
    pub partitioner: Partitioner,

    /// Serializer for record payloads.
    pub serializer: SerializerConfiguration,

    /// Timeout for batch sends, in seconds.
    ///
    /// Defaults to the agent-wide `send_timeout_secs`.
    pub send_timeout_secs: Option<u64>,
}

impl BrokerSinkConfiguration {
    /// Builds the sink.
    pub fn build(&self, id: &str, context: &SinkContext) -> Arc<dyn BatchedSink> {
        let send_timeout = self
            .send_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(context.send_timeout());

        Arc::new(BrokerPluginSink::new(
            id,
            self.producer.build(context.handle()),
            self.router.clone(),
            self.partitioner.clone(),
            self.serializer.build(),
            context.handle().clone(),
            send_timeout,
        ))
    }
}
