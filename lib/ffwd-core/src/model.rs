//! Telemetry data model.
use std::{
    collections::{BTreeMap, BTreeSet},
    hash::{Hash, Hasher},
};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A metric sample.
///
/// Two metrics are considered equal when their key, tags and attributes are equal. The value, timestamp, host and
/// process are deliberately excluded so that a metric can be used as a series identity, e.g. as a deduplication key.
#[derive(Clone, Debug, Serialize)]
pub struct Metric {
    /// Metric key.
    pub key: String,

    /// Sampled value.
    pub value: f64,

    /// Time the sample was taken.
    pub time: DateTime<Utc>,

    /// Host the sample originated from.
    pub host: String,

    /// Free-form tags.
    pub tags: BTreeSet<String>,

    /// Key/value attributes.
    pub attributes: BTreeMap<String, String>,

    /// Name of the process that produced the sample.
    pub process: String,
}

impl Metric {
    /// Creates a new `Metric` with the given key and value, stamped with the current time.
    pub fn new<K: Into<String>>(key: K, value: f64) -> Self {
        Self {
            key: key.into(),
            value,
            time: Utc::now(),
            host: String::new(),
            tags: BTreeSet::new(),
            attributes: BTreeMap::new(),
            process: String::new(),
        }
    }

    /// Sets the sample time.
    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }

    /// Sets the originating host.
    pub fn with_host<H: Into<String>>(mut self, host: H) -> Self {
        self.host = host.into();
        self
    }

    /// Adds a tag.
    pub fn with_tag<T: Into<String>>(mut self, tag: T) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Adds an attribute, replacing any existing value for the same key.
    pub fn with_attribute<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Sets the originating process name.
    pub fn with_process<P: Into<String>>(mut self, process: P) -> Self {
        self.process = process.into();
        self
    }
}

impl PartialEq for Metric {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.tags == other.tags && self.attributes == other.attributes
    }
}

impl Eq for Metric {}

impl Hash for Metric {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.tags.hash(state);
        self.attributes.hash(state);
    }
}

/// A discrete event.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Event {
    /// Event key.
    pub key: String,

    /// Host the event originated from.
    pub host: String,

    /// Time the event occurred.
    pub time: DateTime<Utc>,

    /// Key/value attributes.
    pub attributes: BTreeMap<String, String>,

    /// Value associated with the event.
    pub value: f64,
}

impl Event {
    /// Creates a new `Event` with the given key and value, stamped with the current time.
    pub fn new<K: Into<String>>(key: K, value: f64) -> Self {
        Self {
            key: key.into(),
            host: String::new(),
            time: Utc::now(),
            attributes: BTreeMap::new(),
            value,
        }
    }

    /// Sets the event time.
    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }

    /// Sets the originating host.
    pub fn with_host<H: Into<String>>(mut self, host: H) -> Self {
        self.host = host.into();
        self
    }

    /// Adds an attribute, replacing any existing value for the same key.
    pub fn with_attribute<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}
