//! # razwire-transport
//!
//! Byte-moving backends and the frame state machine that runs on top of them.
//!
//! - [`tcp`]: stream backend (blocking client, mio-driven server)
//! - [`udp`]: datagram backend, one frame per datagram
//! - [`framing`]: receive one frame at a time without losing partial data,
//!   and send a sealed packet in a single write

pub mod backend;
pub mod error;
pub mod framing;
pub mod tcp;
pub mod udp;

pub use backend::{resolve, ClientBackend, ConnectOptions, PeerId, ServerBackend, TransportKind};
pub use error::{FrameError, NetError, TransportError};
pub use framing::{receive_frame, send_frame, ClientSource, FrameSource, PeerSource, RecvState};
pub use tcp::{TcpClient, TcpServer};
pub use udp::{UdpClient, UdpServer};

use razwire_protocol::{HEAD_SIZE, MAX_PAYLOAD_SIZE, TAIL_SIZE};
use std::net::SocketAddr;
use std::time::Duration;

/// Largest frame any backend has to buffer.
pub const MAX_FRAME_SIZE: usize = HEAD_SIZE + MAX_PAYLOAD_SIZE + TAIL_SIZE;

/// Connects a client backend of the given kind.
pub fn connect(
    kind: TransportKind,
    host: &str,
    port: u16,
    options: &ConnectOptions,
) -> Result<Box<dyn ClientBackend>, TransportError> {
    Ok(match kind {
        TransportKind::Tcp => Box::new(TcpClient::connect(host, port, options)?),
        TransportKind::Udp => Box::new(UdpClient::connect(host, port, options)?),
    })
}

/// Binds a server backend of the given kind.
pub fn listen(
    kind: TransportKind,
    addr: SocketAddr,
    write_timeout: Duration,
) -> Result<Box<dyn ServerBackend>, TransportError> {
    Ok(match kind {
        TransportKind::Tcp => Box::new(TcpServer::bind(addr, write_timeout)?),
        TransportKind::Udp => Box::new(UdpServer::bind(addr, write_timeout)?),
    })
}
