//! Sources.
use std::fmt;

use async_trait::async_trait;
use ffwd_error::GenericError;

/// A producer of events and metrics.
///
/// Sources push what they produce into the [`OutputManager`][crate::managers::OutputManager] they were built with.
#[async_trait]
pub trait Source: fmt::Debug + Send + Sync {
    /// Returns the source identifier.
    fn id(&self) -> &str;

    /// Starts producing.
    ///
    /// Resolves once the source is running, not when it finishes.
    ///
    /// # Errors
    ///
    /// If the source could not be started, an error is returned.
    async fn start(&self) -> Result<(), GenericError>;

    /// Stops producing. Idempotent.
    ///
    /// # Errors
    ///
    /// If the source did not shut down cleanly, an error is returned.
    async fn stop(&self) -> Result<(), GenericError>;
}
