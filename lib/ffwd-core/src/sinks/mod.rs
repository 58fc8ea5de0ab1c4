//! Batched sinks.
//!
//! A sink is one configured destination. Every sink implements [`BatchedSink`], which offers two ways of sending:
//!
//! - single-item sends, which never block and never fail: items are dropped when the sink is not ready
//! - batch sends, which resolve once the whole batch was handed off, and fail fast when the sink is not ready
use std::{fmt, time::Duration};

use async_trait::async_trait;
use ffwd_error::GenericError;
use snafu::Snafu;

use crate::{
    model::{Event, Metric},
    protocol::{ConnectionError, ManagerError},
    serializer::SerializeError,
};

pub mod broker;

mod lifecycle;
pub use self::lifecycle::{SinkLifecycle, SinkState};

mod protocol;
pub use self::protocol::ProtocolPluginSink;

/// A sink error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum SinkError {
    /// No connection to the destination is currently available.
    #[snafu(display("Not connected to {}.", destination))]
    NotConnected {
        /// Destination of the sink.
        destination: String,
    },

    /// The sink is not ready to accept sends.
    #[snafu(display("Sink '{}' is not ready.", sink))]
    NotReady {
        /// Identifier of the sink.
        sink: String,
    },

    /// The sink was stopped and cannot be started again.
    #[snafu(display("Sink '{}' is stopped.", sink))]
    Stopped {
        /// Identifier of the sink.
        sink: String,
    },

    /// An item in the batch could not be serialized.
    #[snafu(display("Failed to serialize batch."))]
    Serialize {
        /// Error source.
        source: SerializeError,
    },

    /// Writing the batch to the connection failed.
    #[snafu(display("Failed to send batch."))]
    Connection {
        /// Error source.
        source: ConnectionError,
    },

    /// Handing the batch to the broker producer failed.
    #[snafu(display("Failed to produce batch."))]
    Producer {
        /// Error source.
        source: GenericError,
    },

    /// Starting the sink failed.
    #[snafu(display("Failed to start sink '{}'.", sink))]
    Start {
        /// Identifier of the sink.
        sink: String,

        /// Error source.
        source: ManagerError,
    },

    /// The batch was not sent before the send timeout elapsed.
    #[snafu(display("Timed out after {:?} sending batch to {}.", timeout, destination))]
    SendTimeout {
        /// Destination of the sink.
        destination: String,

        /// Timeout that elapsed.
        timeout: Duration,
    },
}

/// A destination for events and metrics.
#[async_trait]
pub trait BatchedSink: fmt::Debug + Send + Sync {
    /// Returns the sink identifier.
    fn id(&self) -> &str;

    /// Returns the lifecycle state.
    fn state(&self) -> SinkState;

    /// Sends a single event.
    ///
    /// Best-effort: never blocks and never reports failure. The event is dropped if the sink is not ready.
    fn send_event(&self, event: &Event);

    /// Sends a single metric.
    ///
    /// Best-effort: never blocks and never reports failure. The metric is dropped if the sink is not ready.
    fn send_metric(&self, metric: &Metric);

    /// Sends a batch of events.
    ///
    /// # Errors
    ///
    /// If the sink is not ready, any event fails to serialize, or the batch could not be handed off, an error is
    /// returned. Nothing is handed off when the sink is not ready or serialization fails.
    async fn send_events(&self, events: &[Event]) -> Result<(), SinkError>;

    /// Sends a batch of metrics.
    ///
    /// # Errors
    ///
    /// If the sink is not ready, any metric fails to serialize, or the batch could not be handed off, an error is
    /// returned. Nothing is handed off when the sink is not ready or serialization fails.
    async fn send_metrics(&self, metrics: &[Metric]) -> Result<(), SinkError>;

    /// Starts the sink.
    ///
    /// # Errors
    ///
    /// If the sink was stopped, or could not reach its destination, an error is returned.
    async fn start(&self) -> Result<(), SinkError>;

    /// Stops the sink.
    ///
    /// The sink ends up `Stopped` whether or not an error is returned.
    ///
    /// # Errors
    ///
    /// If releasing the underlying resources failed, an error is returned.
    async fn stop(&self) -> Result<(), SinkError>;

    /// Returns `true` if the sink can currently accept sends.
    fn is_ready(&self) -> bool;
}
