use std::collections::BTreeMap;

use bytes::Bytes;
use ffwd_core::{
    model::{Event, Metric},
    serializer::{SerializeError, Serializer},
};
use serde::Serialize;

const SCHEMA_VERSION: &str = "1.0.0";

#[derive(Serialize)]
struct Spotify100<'a> {
    version: &'static str,
    key: &'a str,
    host: &'a str,
    time: i64,
    attributes: &'a BTreeMap<String, String>,
    value: f64,
}

/// Serializes items as Spotify 1.0.0 JSON objects.
///
/// Both events and metrics are written with the same shape: `version`, `key`, `host`, `time` (milliseconds since the
/// Unix epoch), `attributes` and `value`. Tags are not part of the schema and are dropped.
#[derive(Clone, Copy, Debug, Default)]
pub struct Spotify100Serializer;

impl Spotify100Serializer {
    fn encode(kind: &'static str, item: &Spotify100<'_>) -> Result<Bytes, SerializeError> {
        serde_json::to_vec(item)
            .map(Bytes::from)
            .map_err(|e| SerializeError::Encode {
                kind,
                key: item.key.to_string(),
                source: e.into(),
            })
    }
}

impl Serializer for Spotify100Serializer {
    fn serialize_event(&self, event: &Event) -> Result<Bytes, SerializeError> {
        Self::encode(
            "event",
            &Spotify100 {
                version: SCHEMA_VERSION,
                key: &event.key,
                host: &event.host,
                time: event.time.timestamp_millis(),
                attributes: &event.attributes,
                value: event.value,
            },
        )
    }

    fn serialize_metric(&self, metric: &Metric) -> Result<Bytes, SerializeError> {
        Self::encode(
            "metric",
            &Spotify100 {
                version: SCHEMA_VERSION,
                key: &metric.key,
                host: &metric.host,
                time: metric.time.timestamp_millis(),
                attributes: &metric.attributes,
                value: metric.value,
            },
        )
    }
}
