use std::{
    fmt, io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{
    select,
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{ConnectionError, ProtocolConnection};
use crate::spawn_traced;

/// The write half of a transport, operating on whole frames.
#[async_trait]
pub trait FrameTransport: Send + 'static {
    /// Writes a single frame.
    async fn write_frame(&mut self, frame: &Bytes) -> io::Result<()>;

    /// Flushes any buffered frames.
    async fn flush(&mut self) -> io::Result<()>;

    /// Shuts the transport down.
    async fn shutdown(&mut self) -> io::Result<()>;
}

enum Command {
    Send(Bytes),
    SendAll(Vec<Bytes>, oneshot::Sender<Result<(), ConnectionError>>),
}

/// A [`ProtocolConnection`] backed by a dedicated writer task.
///
/// Frames are handed to the writer task over a bounded queue, which keeps single sends non-blocking and keeps
/// batches in submission order. The connection closes when it is stopped, when a write fails, or when the close
/// handle is cancelled by whoever watches the read side of the transport.
pub struct FramedConnection {
    peer: String,
    commands: mpsc::Sender<Command>,
    connected: Arc<AtomicBool>,
    closed: CancellationToken,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl FramedConnection {
    /// Spawns the writer task for `transport` and returns the connection handle.
    ///
    /// `queue_capacity` bounds the number of pending commands. Single sends beyond it are dropped.
    ///
    /// This must be called from within a Tokio runtime.
    pub fn spawn<T: FrameTransport>(peer: String, transport: T, queue_capacity: usize) -> Self {
        let (commands, rx) = mpsc::channel(queue_capacity.max(1));
        let connected = Arc::new(AtomicBool::new(true));
        let closed = CancellationToken::new();

        let writer = spawn_traced(run_writer(
            peer.clone(),
            transport,
            rx,
            Arc::clone(&connected),
            closed.clone(),
        ));

        Self {
            peer,
            commands,
            connected,
            closed,
            writer: Mutex::new(Some(writer)),
        }
    }

    /// Returns a token that closes the connection when cancelled.
    pub fn close_handle(&self) -> CancellationToken {
        self.closed.clone()
    }
}

impl fmt::Debug for FramedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramedConnection")
            .field("peer", &self.peer)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[async_trait]
impl ProtocolConnection for FramedConnection {
    fn peer(&self) -> &str {
        &self.peer
    }

    fn send(&self, frame: Bytes) {
        if !self.is_connected() {
            return;
        }

        if self.commands.try_send(Command::Send(frame)).is_err() {
            trace!(peer = %self.peer, "Send queue full or closed. Dropping frame.");
        }
    }

    async fn send_all(&self, frames: Vec<Bytes>) -> Result<(), ConnectionError> {
        if !self.is_connected() {
            return Err(ConnectionError::Closed { peer: self.peer.clone() });
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        if self.commands.send(Command::SendAll(frames, reply_tx)).await.is_err() {
            return Err(ConnectionError::Closed { peer: self.peer.clone() });
        }

        match reply_rx.await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Closed { peer: self.peer.clone() }),
        }
    }

    async fn stop(&self) {
        self.closed.cancel();

        let writer = match self.writer.lock() {
            Ok(mut writer) => writer.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                debug!(peer = %self.peer, error = %e, "Connection writer task failed.");
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.closed.is_cancelled()
    }

    async fn closed(&self) {
        self.closed.cancelled().await
    }
}

async fn run_writer<T: FrameTransport>(
    peer: String, mut transport: T, mut commands: mpsc::Receiver<Command>, connected: Arc<AtomicBool>,
    closed: CancellationToken,
) {
    debug!(%peer, "Connection writer started.");

    loop {
        select! {
            biased;

            _ = closed.cancelled() => break,
            maybe_command = commands.recv() => match maybe_command {
                Some(command) => {
                    if let Err(e) = process_command(&peer, &mut transport, command).await {
                        debug!(%peer, error = %e, "Write failed. Closing connection.");
                        break;
                    }
                }
                None => break,
            },
        }
    }

    connected.store(false, Ordering::Release);
    closed.cancel();

    // Anything still queued is never written: single sends are dropped and batches fail as closed.
    commands.close();
    while let Ok(command) = commands.try_recv() {
        if let Command::SendAll(_, reply) = command {
            let _ = reply.send(Err(ConnectionError::Closed { peer: peer.clone() }));
        }
    }

    if let Err(e) = transport.shutdown().await {
        trace!(%peer, error = %e, "Failed to shut down transport cleanly.");
    }

    debug!(%peer, "Connection writer stopped.");
}

async fn process_command<T: FrameTransport>(peer: &str, transport: &mut T, command: Command) -> io::Result<()> {
    match command {
        Command::Send(frame) => {
            transport.write_frame(&frame).await?;
            transport.flush().await
        }
        Command::SendAll(frames, reply) => {
            let result = write_all(transport, &frames).await;
            let outcome = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(ConnectionError::Write {
                    peer: peer.to_string(),
                    source: io::Error::new(e.kind(), e.to_string()),
                }),
            };
            let _ = reply.send(outcome);
            result
        }
    }
}

async fn write_all<T: FrameTransport>(transport: &mut T, frames: &[Bytes]) -> io::Result<()> {
    for frame in frames {
        transport.write_frame(frame).await?;
    }
    transport.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct MemoryTransport {
        written: Arc<Mutex<Vec<Bytes>>>,
        fail_writes: Arc<AtomicBool>,
        shut_down: Arc<AtomicBool>,
    }

    impl MemoryTransport {
        fn written(&self) -> Vec<Bytes> {
            self.written.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FrameTransport for MemoryTransport {
        async fn write_frame(&mut self, frame: &Bytes) -> io::Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe));
            }
            self.written.lock().unwrap().push(frame.clone());
            Ok(())
        }

        async fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }

        async fn shutdown(&mut self) -> io::Result<()> {
            self.shut_down.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn frames(values: &[&'static str]) -> Vec<Bytes> {
        values.iter().map(|value| Bytes::from_static(value.as_bytes())).collect()
    }

    #[tokio::test]
    async fn batch_is_written_in_order() {
        let transport = MemoryTransport::default();
        let connection = FramedConnection::spawn("test".to_string(), transport.clone(), 16);

        connection.send_all(frames(&["a", "b", "c"])).await.unwrap();
        connection.send_all(frames(&["d"])).await.unwrap();

        assert_eq!(transport.written(), frames(&["a", "b", "c", "d"]));
    }

    #[tokio::test]
    async fn single_sends_are_written_before_later_batches() {
        let transport = MemoryTransport::default();
        let connection = FramedConnection::spawn("test".to_string(), transport.clone(), 16);

        connection.send(Bytes::from_static(b"one"));
        connection.send(Bytes::from_static(b"two"));
        connection.send_all(frames(&["three"])).await.unwrap();

        assert_eq!(transport.written(), frames(&["one", "two", "three"]));
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_closes() {
        let transport = MemoryTransport::default();
        let connection = FramedConnection::spawn("test".to_string(), transport.clone(), 16);
        assert!(connection.is_connected());

        connection.stop().await;
        connection.stop().await;

        assert!(!connection.is_connected());
        assert!(transport.shut_down.load(Ordering::SeqCst));
        connection.closed().await;
    }

    #[tokio::test]
    async fn sends_after_stop_are_rejected_or_dropped() {
        let transport = MemoryTransport::default();
        let connection = FramedConnection::spawn("test".to_string(), transport.clone(), 16);
        connection.stop().await;

        connection.send(Bytes::from_static(b"late"));
        let result = connection.send_all(frames(&["late"])).await;

        assert!(matches!(result, Err(ConnectionError::Closed { .. })));
        assert!(transport.written().is_empty());
    }

    #[tokio::test]
    async fn write_failure_closes_connection() {
        let transport = MemoryTransport::default();
        transport.fail_writes.store(true, Ordering::SeqCst);
        let connection = FramedConnection::spawn("test".to_string(), transport.clone(), 16);

        let result = connection.send_all(frames(&["a"])).await;
        assert!(matches!(result, Err(ConnectionError::Write { .. })));

        connection.closed().await;
        assert!(!connection.is_connected());
    }

    #[tokio::test]
    async fn cancelling_close_handle_closes_connection() {
        let transport = MemoryTransport::default();
        let connection = FramedConnection::spawn("test".to_string(), transport.clone(), 16);

        connection.close_handle().cancel();
        connection.closed().await;

        assert!(!connection.is_connected());
        connection.stop().await;
        assert!(transport.shut_down.load(Ordering::SeqCst));
    }
}
