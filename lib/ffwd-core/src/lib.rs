//! Core primitives for building the ffwd agent.
//!
//! This crate holds the parts of the agent that do not depend on any concrete transport or broker client: the
//! telemetry data model, retry policies, the protocol connection manager, the batched sink contract and the two sink
//! implementations built on it, and the managers that fan lifecycle calls out to every configured plugin.
#![deny(warnings)]
#![deny(missing_docs)]

use std::future::Future;

use tokio::task::JoinHandle;
use tracing::Instrument as _;

pub mod managers;
pub mod model;
pub mod protocol;
pub mod retry;
pub mod serializer;
pub mod sinks;
pub mod sources;

/// Spawns a new asynchronous task, returning a [`JoinHandle`] for it.
///
/// This function is a thin wrapper over [`tokio::spawn`] that attaches the spawned future to the current `tracing`
/// span.
pub fn spawn_traced<F, R>(f: F) -> JoinHandle<R>
where
    F: Future<Output = R> + Send + 'static,
    R: Send + 'static,
{
    tokio::spawn(f.in_current_span())
}
