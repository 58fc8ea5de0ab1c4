//! Broker producers.
use std::sync::Arc;

use ffwd_core::sinks::broker::Producer;
use serde::Deserialize;
use tokio::runtime::Handle;
use tracing::debug;

mod memory;
pub use self::memory::{memory_producer, MemoryConsumer, MemoryProducer};

const fn default_memory_capacity() -> usize {
    1024
}

/// Producer configuration.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum ProducerConfiguration {
    /// An in-process broker.
    ///
    /// Produced records are logged at debug level and then discarded. Mostly useful for testing pipelines.
    Memory {
        /// Number of records that can be buffered before producing waits.
        #[serde(default = "default_memory_capacity")]
        capacity: usize,
    },
}

impl Default for ProducerConfiguration {
    fn default() -> Self {
        Self::Memory {
            capacity: default_memory_capacity(),
        }
    }
}

impl ProducerConfiguration {
    /// Builds the configured producer, spawning any background tasks it needs on `handle`.
    pub fn build(&self, handle: &Handle) -> Arc<dyn Producer> {
        match *self {
            Self::Memory { capacity } => {
                let (producer, mut consumer) = memory_producer(capacity);
                handle.spawn(async move {
                    while let Some(record) = consumer.recv().await {
                        debug!(
                            topic = %record.topic,
                            key = ?record.key,
                            bytes = record.payload.len(),
                            "Consumed record."
                        );
                    }
                });
                Arc::new(producer)
            }
        }
    }
}
