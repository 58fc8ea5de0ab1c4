//! Plugin implementations and agent orchestration.
//!
//! This crate contains the built-in connectors, serializers, sinks and sources, the registry that maps configured
//! plugin types to them, and the [`Agent`][agent::Agent] that wires everything together.

#![deny(warnings)]
#![deny(missing_docs)]

pub mod agent;
pub mod connectors;
pub mod modules;
pub mod producers;
pub mod registry;
pub mod serializers;
pub mod sinks;
pub mod sources;

#[cfg(test)]
#[allow(dead_code)]
mod test_util;
