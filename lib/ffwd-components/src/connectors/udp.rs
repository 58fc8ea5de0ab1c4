use std::{io, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use ffwd_core::protocol::{
    ConnectionError, FrameTransport, FramedConnection, ProtocolClient, ProtocolConnection, ProtocolDescriptor,
};
use tokio::net::{lookup_host, UdpSocket};

use super::{reject_tls, DEFAULT_QUEUE_CAPACITY};

/// Sends frames to UDP destinations, one datagram per frame.
///
/// UDP has no notion of the peer going away, so connections only close when stopped or when a send fails.
#[derive(Clone, Debug)]
pub struct UdpConnector {
    queue_capacity: usize,
}

impl UdpConnector {
    /// Creates a new `UdpConnector` with the given per-connection queue capacity.
    pub fn new(queue_capacity: usize) -> Self {
        Self { queue_capacity }
    }
}

impl Default for UdpConnector {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

async fn open_socket(authority: &str) -> io::Result<UdpSocket> {
    let remote = lookup_host(authority)
        .await?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "address resolved to nothing"))?;

    let local: SocketAddr = if remote.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        ([0u16; 8], 0).into()
    };

    let socket = UdpSocket::bind(local).await?;
    socket.connect(remote).await?;
    Ok(socket)
}

#[async_trait]
impl ProtocolClient for UdpConnector {
    async fn connect(&self, descriptor: &ProtocolDescriptor) -> Result<Arc<dyn ProtocolConnection>, ConnectionError> {
        reject_tls(descriptor)?;

        let peer = descriptor.to_string();
        let socket = open_socket(&descriptor.authority())
            .await
            .map_err(|source| ConnectionError::Connect {
                peer: peer.clone(),
                source,
            })?;

        let connection = FramedConnection::spawn(peer, DatagramTransport { socket }, self.queue_capacity);
        Ok(Arc::new(connection))
    }
}

struct DatagramTransport {
    socket: UdpSocket,
}

#[async_trait]
impl FrameTransport for DatagramTransport {
    async fn write_frame(&mut self, frame: &Bytes) -> io::Result<()> {
        self.socket.send(frame).await.map(|_| ())
    }

    async fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}
