use std::{io, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use ffwd_core::{
    protocol::{
        ConnectionError, FrameTransport, FramedConnection, ProtocolClient, ProtocolConnection, ProtocolDescriptor,
    },
    spawn_traced,
};
use tokio::{
    io::{AsyncReadExt as _, AsyncWriteExt as _, BufWriter},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    select,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{reject_tls, DEFAULT_QUEUE_CAPACITY};

/// Connects to newline-delimited TCP destinations.
///
/// Every frame is written on its own line. The read side is only watched for the peer closing the connection.
#[derive(Clone, Debug)]
pub struct TcpConnector {
    queue_capacity: usize,
}

impl TcpConnector {
    /// Creates a new `TcpConnector` with the given per-connection queue capacity.
    pub fn new(queue_capacity: usize) -> Self {
        Self { queue_capacity }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

#[async_trait]
impl ProtocolClient for TcpConnector {
    async fn connect(&self, descriptor: &ProtocolDescriptor) -> Result<Arc<dyn ProtocolConnection>, ConnectionError> {
        reject_tls(descriptor)?;

        let peer = descriptor.to_string();
        let stream = TcpStream::connect(descriptor.authority())
            .await
            .map_err(|source| ConnectionError::Connect {
                peer: peer.clone(),
                source,
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            trace!(%peer, error = %e, "Failed to set TCP_NODELAY.");
        }

        let (reader, writer) = stream.into_split();
        let connection = FramedConnection::spawn(peer.clone(), LineTransport::new(writer), self.queue_capacity);
        spawn_traced(watch_reader(peer, reader, connection.close_handle()));

        Ok(Arc::new(connection))
    }
}

struct LineTransport {
    writer: BufWriter<OwnedWriteHalf>,
}

impl LineTransport {
    fn new(writer: OwnedWriteHalf) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }
}

#[async_trait]
impl FrameTransport for LineTransport {
    async fn write_frame(&mut self, frame: &Bytes) -> io::Result<()> {
        self.writer.write_all(frame).await?;
        if frame.last() != Some(&b'\n') {
            self.writer.write_all(b"\n").await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.writer.flush().await
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}

// Anything the peer sends is discarded. EOF or a read error closes the connection.
async fn watch_reader(peer: String, mut reader: OwnedReadHalf, close: CancellationToken) {
    let mut buf = [0u8; 1024];

    loop {
        select! {
            _ = close.cancelled() => return,
            result = reader.read(&mut buf) => match result {
                Ok(0) => {
                    debug!(%peer, "Peer closed the connection.");
                    break;
                }
                Ok(n) => trace!(%peer, bytes = n, "Discarding data received from peer."),
                Err(e) => {
                    debug!(%peer, error = %e, "Read from peer failed.");
                    break;
                }
            },
        }
    }

    close.cancel();
}
