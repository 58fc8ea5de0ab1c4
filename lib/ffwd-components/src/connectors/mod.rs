//! Protocol connectors.
//!
//! Each connector implements [`ProtocolClient`][ffwd_core::protocol::ProtocolClient] for one scheme and is
//! registered under that scheme in the [`ConnectorRegistry`][ffwd_core::protocol::ConnectorRegistry].
use std::io;

use ffwd_core::protocol::{ConnectionError, ProtocolDescriptor};

mod tcp;
pub use self::tcp::TcpConnector;

mod udp;
pub use self::udp::UdpConnector;

/// Default number of queued frames per connection.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

fn reject_tls(descriptor: &ProtocolDescriptor) -> Result<(), ConnectionError> {
    if descriptor.tls().enabled {
        return Err(ConnectionError::Connect {
            peer: descriptor.to_string(),
            source: io::Error::new(io::ErrorKind::Unsupported, "TLS is not supported by this connector"),
        });
    }

    Ok(())
}
