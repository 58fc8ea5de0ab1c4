//! Serializers.
use std::sync::Arc;

use ffwd_core::serializer::Serializer;
use serde::Deserialize;

mod spotify100;
pub use self::spotify100::Spotify100Serializer;

mod to_string;
pub use self::to_string::ToStringSerializer;

/// Serializer configuration.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum SerializerConfiguration {
    /// Human-readable text, one item per line.
    #[default]
    ToString,

    /// JSON, version 1.0.0 of the Spotify schema.
    Spotify100,
}

impl SerializerConfiguration {
    /// Builds the configured serializer.
    pub fn build(&self) -> Arc<dyn Serializer> {
        match self {
            Self::ToString => Arc::new(ToStringSerializer),
            Self::Spotify100 => Arc::new(Spotify100Serializer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_selects_serializer() {
        let config: SerializerConfiguration = serde_json::from_str(r#"{"type": "spotify100"}"#).unwrap();
        assert_eq!(config, SerializerConfiguration::Spotify100);

        let config: SerializerConfiguration = serde_json::from_str(r#"{"type": "to_string"}"#).unwrap();
        assert_eq!(config, SerializerConfiguration::ToString);

        assert!(serde_json::from_str::<SerializerConfiguration>(r#"{"type": "avro"}"#).is_err());
    }
}
