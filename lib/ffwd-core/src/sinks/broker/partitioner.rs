use serde::Deserialize;

use crate::model::{Event, Metric};

fn default_attribute() -> String {
    "site".to_string()
}

/// Maps items to broker partition keys.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum Partitioner {
    /// Partitions on the originating host.
    #[default]
    Host,

    /// Partitions on the value of an attribute, falling back to the originating host when it is absent.
    Attribute {
        /// Attribute to partition on.
        #[serde(default = "default_attribute")]
        attribute: String,
    },
}

impl Partitioner {
    /// Returns the partition key for a metric.
    pub fn partition_metric<'a>(&self, metric: &'a Metric) -> &'a str {
        self.select(&metric.host, |attribute| metric.attributes.get(attribute))
    }

    /// Returns the partition key for an event.
    pub fn partition_event<'a>(&self, event: &'a Event) -> &'a str {
        self.select(&event.host, |attribute| event.attributes.get(attribute))
    }

    fn select<'a, F>(&self, host: &'a str, lookup: F) -> &'a str
    where
        F: FnOnce(&str) -> Option<&'a String>,
    {
        match self {
            Self::Host => host,
            Self::Attribute { attribute } => lookup(attribute).map(String::as_str).unwrap_or(host),
        }
    }
}
