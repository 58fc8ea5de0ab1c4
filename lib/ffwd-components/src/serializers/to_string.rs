use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Write as _,
};

use bytes::Bytes;
use ffwd_core::{
    model::{Event, Metric},
    serializer::{SerializeError, Serializer},
};

/// Serializes items as a single human-readable line.
///
/// The output is meant for debugging and log-like destinations, not for machine consumption.
#[derive(Clone, Copy, Debug, Default)]
pub struct ToStringSerializer;

fn write_tags(out: &mut String, tags: &BTreeSet<String>) {
    out.push('[');
    for (i, tag) in tags.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(tag);
    }
    out.push(']');
}

fn write_attributes(out: &mut String, attributes: &BTreeMap<String, String>) {
    out.push('{');
    for (i, (key, value)) in attributes.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{}={}", key, value);
    }
    out.push('}');
}

impl Serializer for ToStringSerializer {
    fn serialize_event(&self, event: &Event) -> Result<Bytes, SerializeError> {
        let mut out = String::with_capacity(128);
        let _ = write!(
            out,
            "Event(key={}, host={}, time={}, value={}, attributes=",
            event.key,
            event.host,
            event.time.timestamp_millis(),
            event.value
        );
        write_attributes(&mut out, &event.attributes);
        out.push(')');
        Ok(Bytes::from(out))
    }

    fn serialize_metric(&self, metric: &Metric) -> Result<Bytes, SerializeError> {
        let mut out = String::with_capacity(128);
        let _ = write!(
            out,
            "Metric(key={}, host={}, time={}, value={}, proc={}, tags=",
            metric.key,
            metric.host,
            metric.time.timestamp_millis(),
            metric.value,
            metric.process
        );
        write_tags(&mut out, &metric.tags);
        out.push_str(", attributes=");
        write_attributes(&mut out, &metric.attributes);
        out.push(')');
        Ok(Bytes::from(out))
    }
}
