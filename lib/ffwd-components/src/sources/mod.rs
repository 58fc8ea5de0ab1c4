//! Source implementations.

mod heartbeat;
pub use self::heartbeat::{HeartbeatConfiguration, HeartbeatSource};
