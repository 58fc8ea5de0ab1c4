use serde::Deserialize;

use crate::model::{Event, Metric};

const TOPIC_PLACEHOLDER: &str = "%s";
const DEFAULT_ATTRIBUTE_VALUE: &str = "default";

fn default_attribute() -> String {
    "site".to_string()
}

fn default_metrics_template() -> String {
    "metrics-%s".to_string()
}

fn default_events_template() -> String {
    "events-%s".to_string()
}

fn default_metrics_topic() -> String {
    "metrics".to_string()
}

fn default_events_topic() -> String {
    "events".to_string()
}

/// Maps items to broker topics.
///
/// Routing is a pure function of the item: the same item always goes to the same topic.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum Router {
    /// Routes on the value of an attribute.
    ///
    /// The first `%s` in the template is replaced with the attribute value, or with `default` when the item does
    /// not carry the attribute.
    Attribute {
        /// Attribute to route on.
        #[serde(default = "default_attribute")]
        attribute: String,

        /// Topic template for metrics.
        #[serde(default = "default_metrics_template")]
        metrics: String,

        /// Topic template for events.
        #[serde(default = "default_events_template")]
        events: String,
    },

    /// Routes every item of a kind to the same topic.
    Static {
        /// Topic for metrics.
        #[serde(default = "default_metrics_topic")]
        metrics: String,

        /// Topic for events.
        #[serde(default = "default_events_topic")]
        events: String,
    },
}

impl Default for Router {
    fn default() -> Self {
        Self::Attribute {
            attribute: default_attribute(),
            metrics: default_metrics_template(),
            events: default_events_template(),
        }
    }
}

impl Router {
    /// Returns the topic for a metric.
    pub fn route_metric(&self, metric: &Metric) -> String {
        match self {
            Self::Attribute { attribute, metrics, .. } => expand(metrics, metric.attributes.get(attribute)),
            Self::Static { metrics, .. } => metrics.clone(),
        }
    }

    /// Returns the topic for an event.
    pub fn route_event(&self, event: &Event) -> String {
        match self {
            Self::Attribute { attribute, events, .. } => expand(events, event.attributes.get(attribute)),
            Self::Static { events, .. } => events.clone(),
        }
    }
}

fn expand(template: &str, value: Option<&String>) -> String {
    let value = value.map(String::as_str).unwrap_or(DEFAULT_ATTRIBUTE_VALUE);
    template.replacen(TOPIC_PLACEHOLDER, value, 1)
}
