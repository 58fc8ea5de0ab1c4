//! Outbound protocol connections.
//!
//! A [`ProtocolClient`] opens a [`ProtocolConnection`] to the destination described by a [`ProtocolDescriptor`].
//! Clients for the different transports are held in a [`ConnectorRegistry`] keyed by scheme, and a
//! [`ProtocolConnectionManager`] drives the connect-retry loop that keeps a single connection alive.
use std::{collections::HashMap, fmt, io, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use snafu::Snafu;

mod connection;
pub use self::connection::{FrameTransport, FramedConnection};

mod descriptor;
pub use self::descriptor::{ProtocolDescriptor, TlsOptions};

mod manager;
pub use self::manager::{ConnectionManagerState, ManagerError, ProtocolConnectionManager};

/// A connection error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)), visibility(pub(crate)))]
pub enum ConnectionError {
    /// No connector is registered for the scheme.
    #[snafu(display("No connector registered for scheme '{}'.", scheme))]
    UnsupportedScheme {
        /// Scheme that was requested.
        scheme: String,
    },

    /// Establishing the connection failed.
    #[snafu(display("Failed to connect to {}.", peer))]
    Connect {
        /// Destination that was being connected to.
        peer: String,

        /// Error source.
        source: io::Error,
    },

    /// Establishing the connection took too long.
    #[snafu(display("Timed out after {:?} connecting to {}.", timeout, peer))]
    ConnectTimeout {
        /// Destination that was being connected to.
        peer: String,

        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// The connection was closed.
    #[snafu(display("Connection to {} is closed.", peer))]
    Closed {
        /// Destination of the closed connection.
        peer: String,
    },

    /// Writing to the connection failed.
    #[snafu(display("Failed to write to {}.", peer))]
    Write {
        /// Destination of the connection.
        peer: String,

        /// Error source.
        source: io::Error,
    },
}

/// A live outbound channel to a single destination.
///
/// Implementations own their connected/closed state. Once closed, a connection never becomes connected again.
#[async_trait]
pub trait ProtocolConnection: fmt::Debug + Send + Sync {
    /// Returns a description of the remote peer.
    fn peer(&self) -> &str;

    /// Enqueues a single frame for writing.
    ///
    /// Never blocks and never fails: the frame is silently dropped when the connection is closed or its queue is
    /// full.
    fn send(&self, frame: Bytes);

    /// Writes a batch of frames, in order.
    ///
    /// The batch has a single outcome: it resolves once every frame was written, or with the first error encountered.
    ///
    /// # Errors
    ///
    /// If the connection is closed, or writing fails, an error is returned.
    async fn send_all(&self, frames: Vec<Bytes>) -> Result<(), ConnectionError>;

    /// Stops the connection, closing the underlying channel.
    ///
    /// Idempotent.
    async fn stop(&self);

    /// Returns `true` if the connection is currently usable.
    fn is_connected(&self) -> bool;

    /// Waits until the connection is closed, whether by the remote peer, an error, or [`stop`][Self::stop].
    async fn closed(&self);
}

/// Opens protocol connections.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Opens a new connection to the given destination.
    ///
    /// # Errors
    ///
    /// If the connection cannot be established, an error is returned.
    async fn connect(&self, descriptor: &ProtocolDescriptor) -> Result<Arc<dyn ProtocolConnection>, ConnectionError>;
}

/// A set of protocol clients keyed by scheme.
///
/// The registry itself is a [`ProtocolClient`], dispatching to the client registered for the descriptor's scheme.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    connectors: HashMap<String, Arc<dyn ProtocolClient>>,
}

impl ConnectorRegistry {
    /// Registers a client for the given scheme, replacing any existing registration.
    pub fn register<S, C>(&mut self, scheme: S, client: C)
    where
        S: Into<String>,
        C: ProtocolClient + 'static,
    {
        self.connectors.insert(scheme.into(), Arc::new(client));
    }

    /// Returns `true` if a client is registered for the given scheme.
    pub fn supports(&self, scheme: &str) -> bool {
        self.connectors.contains_key(scheme)
    }

    /// Returns the registered schemes, sorted.
    pub fn schemes(&self) -> Vec<&str> {
        let mut schemes = self.connectors.keys().map(String::as_str).collect::<Vec<_>>();
        schemes.sort_unstable();
        schemes
    }
}

impl fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("schemes", &self.schemes())
            .finish()
    }
}

#[async_trait]
impl ProtocolClient for ConnectorRegistry {
    async fn connect(&self, descriptor: &ProtocolDescriptor) -> Result<Arc<dyn ProtocolConnection>, ConnectionError> {
        match self.connectors.get(descriptor.scheme()) {
            Some(client) => client.connect(descriptor).await,
            None => UnsupportedScheme {
                scheme: descriptor.scheme(),
            }
            .fail(),
        }
    }
}

#[cfg(test)]
#[allow(dead_code)]
pub(crate) mod test_util {
    use std::sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    };

    use tokio_util::sync::CancellationToken;

    use super::*;

    /// A connection that records frames in memory.
    #[derive(Debug)]
    pub struct MockConnection {
        peer: String,
        connected: AtomicBool,
        closed: CancellationToken,
        live: Arc<AtomicUsize>,
        pub frames: Mutex<Vec<Bytes>>,
        pub fail_writes: AtomicBool,
    }

    impl MockConnection {
        pub fn new(peer: &str, live: Arc<AtomicUsize>) -> Self {
            live.fetch_add(1, Ordering::SeqCst);
            Self {
                peer: peer.to_string(),
                connected: AtomicBool::new(true),
                closed: CancellationToken::new(),
                live,
                frames: Mutex::new(Vec::new()),
                fail_writes: AtomicBool::new(false),
            }
        }

        /// Simulates the remote peer closing the channel.
        pub fn close_remotely(&self) {
            if self.connected.swap(false, Ordering::SeqCst) {
                self.live.fetch_sub(1, Ordering::SeqCst);
            }
            self.closed.cancel();
        }

        pub fn frames(&self) -> Vec<Bytes> {
            self.frames.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProtocolConnection for MockConnection {
        fn peer(&self) -> &str {
            &self.peer
        }

        fn send(&self, frame: Bytes) {
            if self.is_connected() {
                self.frames.lock().unwrap().push(frame);
            }
        }

        async fn send_all(&self, frames: Vec<Bytes>) -> Result<(), ConnectionError> {
            if !self.is_connected() {
                return Closed { peer: self.peer.clone() }.fail();
            }
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(ConnectionError::Write {
                    peer: self.peer.clone(),
                    source: io::Error::from(io::ErrorKind::BrokenPipe),
                });
            }
            self.frames.lock().unwrap().extend(frames);
            Ok(())
        }

        async fn stop(&self) {
            self.close_remotely();
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn closed(&self) {
            self.closed.cancelled().await
        }
    }

    /// A client that fails a configurable number of times before handing out [`MockConnection`]s.
    #[derive(Default)]
    pub struct MockClient {
        pub attempts: AtomicUsize,
        pub failures_before_success: AtomicUsize,
        pub connect_delay: Option<Duration>,
        pub live: Arc<AtomicUsize>,
        pub connections: Mutex<Vec<Arc<MockConnection>>>,
    }

    impl MockClient {
        pub fn failing_forever() -> Self {
            let client = Self::default();
            client.failures_before_success.store(usize::MAX, Ordering::SeqCst);
            client
        }

        pub fn live_connections(&self) -> usize {
            self.live.load(Ordering::SeqCst)
        }

        pub fn last_connection(&self) -> Option<Arc<MockConnection>> {
            self.connections.lock().unwrap().last().cloned()
        }
    }

    #[async_trait]
    impl ProtocolClient for MockClient {
        async fn connect(
            &self, descriptor: &ProtocolDescriptor,
        ) -> Result<Arc<dyn ProtocolConnection>, ConnectionError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.connect_delay {
                tokio::time::sleep(delay).await;
            }
            if attempt < self.failures_before_success.load(Ordering::SeqCst) {
                return Err(ConnectionError::Connect {
                    peer: descriptor.to_string(),
                    source: io::Error::from(io::ErrorKind::ConnectionRefused),
                });
            }

            let connection = Arc::new(MockConnection::new(&descriptor.to_string(), Arc::clone(&self.live)));
            self.connections.lock().unwrap().push(Arc::clone(&connection));
            Ok(connection)
        }
    }

    #[async_trait]
    impl ProtocolClient for Arc<MockClient> {
        async fn connect(
            &self, descriptor: &ProtocolDescriptor,
        ) -> Result<Arc<dyn ProtocolConnection>, ConnectionError> {
            self.as_ref().connect(descriptor).await
        }
    }
}
