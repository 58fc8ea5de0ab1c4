use std::{
    fmt,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

use arc_swap::ArcSwapOption;
use snafu::Snafu;
use tokio::{select, time::timeout};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

use super::{ConnectionError, ProtocolClient, ProtocolConnection, ProtocolDescriptor};
use crate::retry::{RetryDecision, RetryPolicy, RetryState};

/// A connection manager error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ManagerError {
    /// The retry policy gave up before a connection could be established.
    #[snafu(display("Gave up connecting to {} after {} attempt(s).", destination, attempts))]
    GaveUp {
        /// Destination that could not be reached.
        destination: String,

        /// Number of failed attempts.
        attempts: u32,

        /// Error from the last attempt.
        source: ConnectionError,
    },

    /// The manager was stopped before a connection could be established.
    #[snafu(display("Connection manager for {} was stopped.", destination))]
    Stopped {
        /// Destination of the manager.
        destination: String,
    },
}

/// State of a [`ProtocolConnectionManager`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum ConnectionManagerState {
    /// Not started, or the last connect loop gave up.
    Idle = 0,

    /// A connect loop is running.
    Connecting = 1,

    /// A connection is published.
    Connected = 2,

    /// The manager is stopping.
    Stopping = 3,

    /// The manager is stopped. Terminal.
    Stopped = 4,
}

impl ConnectionManagerState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Stopping,
            _ => Self::Stopped,
        }
    }

    const fn is_terminating(self) -> bool {
        matches!(self, Self::Stopping | Self::Stopped)
    }
}

// `ArcSwapOption` needs a sized type, so the trait object is wrapped.
struct PublishedConnection {
    connection: Arc<dyn ProtocolConnection>,
}

struct Inner {
    descriptor: ProtocolDescriptor,
    destination: String,
    client: Arc<dyn ProtocolClient>,
    retry_policy: Arc<dyn RetryPolicy>,
    connect_timeout: Duration,
    slot: ArcSwapOption<PublishedConnection>,
    state: AtomicU8,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

/// Keeps a single connection to a protocol destination alive.
///
/// The manager runs the connect-retry loop, publishes the resulting connection in a single atomic slot, and
/// reconnects when the published connection closes. At most one connection is ever published: when two connect loops
/// race, the loser stops its own connection instead of publishing it.
///
/// Stopping is terminal. Once [`stop`][Self::stop] has been called, the manager never connects again.
#[derive(Clone)]
pub struct ProtocolConnectionManager {
    inner: Arc<Inner>,
}

impl ProtocolConnectionManager {
    /// Creates a new `ProtocolConnectionManager`.
    pub fn new(
        descriptor: ProtocolDescriptor, client: Arc<dyn ProtocolClient>, retry_policy: Arc<dyn RetryPolicy>,
        connect_timeout: Duration,
    ) -> Self {
        let destination = descriptor.to_string();
        Self {
            inner: Arc::new(Inner {
                descriptor,
                destination,
                client,
                retry_policy,
                connect_timeout,
                slot: ArcSwapOption::empty(),
                state: AtomicU8::new(ConnectionManagerState::Idle as u8),
                shutdown: CancellationToken::new(),
                tasks: TaskTracker::new(),
            }),
        }
    }

    /// Returns the destination this manager connects to.
    pub fn destination(&self) -> &str {
        &self.inner.destination
    }

    /// Returns the current state.
    pub fn state(&self) -> ConnectionManagerState {
        ConnectionManagerState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Returns the currently published connection, if any.
    ///
    /// The returned connection may be replaced concurrently, so callers should not hold on to it.
    pub fn connection(&self) -> Option<Arc<dyn ProtocolConnection>> {
        self.inner
            .slot
            .load_full()
            .map(|published| Arc::clone(&published.connection))
    }

    /// Connects to the destination.
    ///
    /// Resolves once a connection is published, either by this call or by a concurrent one. Connect failures are
    /// retried according to the retry policy. Once connected, the manager reconnects on its own whenever the
    /// connection closes.
    ///
    /// # Errors
    ///
    /// If the retry policy gives up, or the manager is stopped before a connection is published, an error is returned.
    pub async fn start(&self) -> Result<(), ManagerError> {
        if self.state().is_terminating() {
            return Stopped {
                destination: self.inner.destination.clone(),
            }
            .fail();
        }

        if self.connection().is_some() {
            return Ok(());
        }

        let inner = Arc::clone(&self.inner);
        let tracked = self.inner.tasks.track_future(async move {
            if let Some(published) = inner.establish().await? {
                inner.spawn_supervisor(published);
            }
            Ok::<_, ManagerError>(())
        });
        tracked.await
    }

    /// Stops the manager.
    ///
    /// Cancels any in-flight connect attempt or retry wait, stops the published connection, and resolves once no
    /// connection is published and no connect loop is running. Idempotent.
    pub async fn stop(&self) {
        self.inner.set_state(ConnectionManagerState::Stopping);
        self.inner.shutdown.cancel();

        let previous = self.inner.slot.swap(None);
        if let Some(published) = previous {
            published.connection.stop().await;
        }

        self.inner.tasks.close();
        self.inner.tasks.wait().await;

        self.inner.set_state(ConnectionManagerState::Stopped);
        debug!(destination = %self.inner.destination, "Connection manager stopped.");
    }
}

impl fmt::Debug for ProtocolConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolConnectionManager")
            .field("destination", &self.inner.destination)
            .field("state", &self.state())
            .finish()
    }
}

impl Inner {
    fn state(&self) -> ConnectionManagerState {
        ConnectionManagerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Moves to `next`, unless already stopping or stopped. `Stopping -> Stopped` is the only way out of `Stopping`.
    fn set_state(&self, next: ConnectionManagerState) {
        let _ = self.state.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            let current = ConnectionManagerState::from_u8(current);
            let allowed = match current {
                ConnectionManagerState::Stopped => false,
                ConnectionManagerState::Stopping => next == ConnectionManagerState::Stopped,
                _ => true,
            };
            allowed.then_some(next as u8)
        });
    }

    fn stopped_error(&self) -> ManagerError {
        ManagerError::Stopped {
            destination: self.destination.clone(),
        }
    }

    /// Runs the connect-retry loop until a connection is published.
    ///
    /// Returns the published connection if this loop published it, or `None` if a concurrent loop won the race.
    async fn establish(&self) -> Result<Option<Arc<PublishedConnection>>, ManagerError> {
        let mut retry = RetryState::default();

        loop {
            if self.shutdown.is_cancelled() {
                return Err(self.stopped_error());
            }
            self.set_state(ConnectionManagerState::Connecting);

            let result = select! {
                _ = self.shutdown.cancelled() => return Err(self.stopped_error()),
                result = timeout(self.connect_timeout, self.client.connect(&self.descriptor)) => match result {
                    Ok(result) => result,
                    Err(_) => Err(ConnectionError::ConnectTimeout {
                        peer: self.destination.clone(),
                        timeout: self.connect_timeout,
                    }),
                },
            };

            let error = match result {
                Ok(connection) => {
                    retry.reset();
                    return self.publish(connection).await;
                }
                Err(e) => e,
            };

            match retry.record_failure(self.retry_policy.as_ref()) {
                RetryDecision::GiveUp => {
                    if self.state() == ConnectionManagerState::Connecting && self.slot.load().is_none() {
                        self.set_state(ConnectionManagerState::Idle);
                    }
                    warn!(
                        destination = %self.destination,
                        attempts = retry.attempt,
                        error = %error,
                        "Giving up on connecting."
                    );
                    return Err(ManagerError::GaveUp {
                        destination: self.destination.clone(),
                        attempts: retry.attempt,
                        source: error,
                    });
                }
                RetryDecision::Delay(delay) => {
                    debug!(
                        destination = %self.destination,
                        attempt = retry.attempt,
                        error = %error,
                        "Connect attempt failed. Retrying in {:?}.",
                        delay
                    );
                    select! {
                        _ = self.shutdown.cancelled() => return Err(self.stopped_error()),
                        _ = tokio::time::sleep(delay) => {},
                    }
                }
            }
        }
    }

    async fn publish(
        &self, connection: Arc<dyn ProtocolConnection>,
    ) -> Result<Option<Arc<PublishedConnection>>, ManagerError> {
        let published = Arc::new(PublishedConnection { connection });

        let won = self
            .slot
            .compare_and_swap(&None::<Arc<PublishedConnection>>, Some(Arc::clone(&published)))
            .is_none();
        if !won {
            debug!(
                destination = %self.destination,
                "Connection already published by a concurrent attempt. Discarding."
            );
            published.connection.stop().await;
            return Ok(None);
        }

        if self.shutdown.is_cancelled() {
            // `stop` may have already taken it out of the slot, in which case it stops the connection itself.
            if self.unpublish(&published) {
                published.connection.stop().await;
            }
            return Err(self.stopped_error());
        }

        self.set_state(ConnectionManagerState::Connected);
        info!(destination = %self.destination, "Connected.");
        Ok(Some(published))
    }

    /// Clears the slot if it still holds `published`, returning `true` if it did.
    fn unpublish(&self, published: &Arc<PublishedConnection>) -> bool {
        matches!(
            &*self.slot.compare_and_swap(published, None::<Arc<PublishedConnection>>),
            Some(previous) if Arc::ptr_eq(previous, published)
        )
    }

    fn spawn_supervisor(self: Arc<Self>, published: Arc<PublishedConnection>) {
        let tasks = self.tasks.clone();
        tasks.spawn(self.supervise(published));
    }

    /// Watches the published connection, reconnecting whenever it closes.
    async fn supervise(self: Arc<Self>, mut published: Arc<PublishedConnection>) {
        loop {
            select! {
                _ = self.shutdown.cancelled() => return,
                _ = published.connection.closed() => {},
            }

            if !self.unpublish(&published) {
                return;
            }
            published.connection.stop().await;
            warn!(destination = %self.destination, "Connection closed. Reconnecting.");

            match self.establish().await {
                Ok(Some(next)) => published = next,
                Ok(None) => return,
                Err(ManagerError::Stopped { .. }) => return,
                Err(e) => {
                    error!(destination = %self.destination, error = %e, "Failed to reconnect.");
                    return;
                }
            }
        }
    }
}
