//! Payload serialization.
use std::fmt;

use bytes::Bytes;
use ffwd_error::GenericError;
use snafu::Snafu;

use crate::model::{Event, Metric};

/// A serialization error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum SerializeError {
    /// The item could not be encoded.
    #[snafu(display("Failed to serialize {} '{}'.", kind, key))]
    Encode {
        /// Kind of item, `event` or `metric`.
        kind: &'static str,

        /// Key of the item.
        key: String,

        /// Error source.
        source: GenericError,
    },
}

/// Turns events and metrics into wire payloads.
pub trait Serializer: fmt::Debug + Send + Sync {
    /// Serializes an event.
    ///
    /// # Errors
    ///
    /// If the event cannot be represented in the output format, an error is returned.
    fn serialize_event(&self, event: &Event) -> Result<Bytes, SerializeError>;

    /// Serializes a metric.
    ///
    /// # Errors
    ///
    /// If the metric cannot be represented in the output format, an error is returned.
    fn serialize_metric(&self, metric: &Metric) -> Result<Bytes, SerializeError>;
}
