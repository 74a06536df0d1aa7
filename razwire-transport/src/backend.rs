//! Backend traits.
//!
//! A backend only moves raw bytes. Frame boundaries are the framing layer's
//! business; the backend's job is to report how many bytes are waiting, to
//! let them be inspected without consuming them (`peek`), and to consume them
//! (`read`). Datagram backends buffer one datagram at a time, so the same
//! peek/read discipline works over a connectionless socket.

use crate::error::TransportError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;
use std::time::Duration;

/// Client connection settings shared by both backends.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Try IPv6 addresses before IPv4 ones when a host resolves to both.
    pub prefer_ipv6: bool,
    /// Per-address connect timeout (stream backend only).
    pub connect_timeout: Option<Duration>,
    /// Socket write timeout.
    pub write_timeout: Option<Duration>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            prefer_ipv6: false,
            connect_timeout: Some(Duration::from_secs(5)),
            write_timeout: Some(Duration::from_secs(5)),
        }
    }
}

/// Resolves `host:port`, preferred address family first.
pub fn resolve(host: &str, port: u16, prefer_ipv6: bool) -> Result<Vec<SocketAddr>, TransportError> {
    let target = format!("{}:{}", host, port);
    let mut addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| TransportError::connection(&target, e))?
        .collect();

    if addrs.is_empty() {
        return Err(TransportError::connection(
            target,
            io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses"),
        ));
    }

    addrs.sort_by_key(|addr| addr.is_ipv6() != prefer_ipv6);
    Ok(addrs)
}

/// Opaque handle for one remote endpoint on a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Which backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Connection-oriented byte stream.
    #[default]
    Tcp,
    /// Connectionless, one frame per datagram.
    Udp,
}

impl TransportKind {
    /// Returns whether each read unit is a whole message.
    pub fn preserves_boundaries(&self) -> bool {
        matches!(self, TransportKind::Udp)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Tcp => write!(f, "tcp"),
            TransportKind::Udp => write!(f, "udp"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(TransportKind::Tcp),
            "udp" => Ok(TransportKind::Udp),
            other => Err(format!("unknown transport '{}', expected tcp or udp", other)),
        }
    }
}

/// Client side of a backend: one remote endpoint.
pub trait ClientBackend: Send {
    fn kind(&self) -> TransportKind;

    /// Blocks until bytes are readable or `timeout` elapses.
    ///
    /// Returns the number of bytes currently available, 0 on timeout. A zero
    /// timeout polls without blocking.
    fn wait(&mut self, timeout: Duration) -> Result<usize, TransportError>;

    /// Copies waiting bytes into `buf` without consuming them.
    fn peek(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Consumes waiting bytes into `buf`.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Sends all of `bytes`, returning how many were written.
    fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError>;

    /// Drops the buffered datagram, if any. Stream backends do nothing.
    fn discard(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Closes the underlying socket. Idempotent.
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    fn peer_addr(&self) -> Option<SocketAddr>;
}

/// Server side of a backend: a listener plus many peers.
pub trait ServerBackend: Send {
    fn kind(&self) -> TransportKind;

    fn local_addr(&self) -> Result<SocketAddr, TransportError>;

    /// Blocks until any socket becomes ready or `timeout` elapses.
    fn wait(&mut self, timeout: Duration) -> Result<(), TransportError>;

    /// Returns the next newly arrived peer, if any. Never blocks.
    fn accept(&mut self) -> Result<Option<PeerId>, TransportError>;

    /// Bytes readable from `peer` right now. Never blocks.
    fn available(&mut self, peer: PeerId) -> Result<usize, TransportError>;

    fn peek(&mut self, peer: PeerId, buf: &mut [u8]) -> Result<usize, TransportError>;

    fn read(&mut self, peer: PeerId, buf: &mut [u8]) -> Result<usize, TransportError>;

    fn write(&mut self, peer: PeerId, bytes: &[u8]) -> Result<usize, TransportError>;

    fn discard(&mut self, _peer: PeerId) -> Result<(), TransportError> {
        Ok(())
    }

    /// Forgets `peer` and closes its socket if it has one.
    fn disconnect(&mut self, peer: PeerId);

    fn peer_addr(&self, peer: PeerId) -> Option<SocketAddr>;

    /// Disconnects every peer.
    fn shutdown(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_kind_parse() {
        assert_eq!("tcp".parse::<TransportKind>().unwrap(), TransportKind::Tcp);
        assert_eq!("UDP".parse::<TransportKind>().unwrap(), TransportKind::Udp);
        assert!("sctp".parse::<TransportKind>().is_err());
        assert_eq!(TransportKind::Udp.to_string(), "udp");
    }

    #[test]
    fn test_boundaries() {
        assert!(TransportKind::Udp.preserves_boundaries());
        assert!(!TransportKind::Tcp.preserves_boundaries());
    }

    #[test]
    fn test_resolve_orders_by_family() {
        let addrs = resolve("127.0.0.1", 4000, true).unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:4000".parse().unwrap()]);

        let v6 = resolve("::1", 4000, false).unwrap();
        assert!(v6[0].is_ipv6());
    }

    #[test]
    fn test_resolve_failure_is_setup_error() {
        let err = resolve("definitely-not-a-host.invalid", 1, false).unwrap_err();
        assert!(matches!(err, TransportError::Connection { .. }));
    }

    #[test]
    fn test_peer_display() {
        assert_eq!(PeerId(3).to_string(), "peer#3");
    }
}
