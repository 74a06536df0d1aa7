//! Transport and framing error types.

use crate::backend::PeerId;
use razwire_protocol::SerializationError;
use std::io;
use thiserror::Error;

/// Backend failures.
///
/// `Connection` is a setup-time fault (resolve, connect, bind). Everything
/// else happens on an established socket.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection to {addr} failed: {source}")]
    Connection {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("socket error: {0}")]
    Socket(#[from] io::Error),

    #[error("peer closed the connection")]
    PeerClosed,

    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),
}

impl TransportError {
    pub(crate) fn connection(addr: impl ToString, source: io::Error) -> Self {
        TransportError::Connection {
            addr: addr.to_string(),
            source,
        }
    }

    /// Returns whether a failed `accept` concerns only the incoming
    /// connection. The listener stays usable after these.
    pub fn is_accept_transient(&self) -> bool {
        match self {
            TransportError::Socket(e) => accept_transient(e),
            _ => false,
        }
    }

    pub(crate) fn not_connected() -> Self {
        TransportError::Socket(io::Error::new(
            io::ErrorKind::NotConnected,
            "backend is disconnected",
        ))
    }
}

/// A connection that died before it was accepted, or a descriptor limit.
pub(crate) fn accept_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
    ) || descriptors_exhausted(e)
}

/// EMFILE or ENFILE.
#[cfg(unix)]
pub(crate) fn descriptors_exhausted(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(23) | Some(24))
}

#[cfg(not(unix))]
pub(crate) fn descriptors_exhausted(_e: &io::Error) -> bool {
    false
}

/// Protocol violations detected while receiving a frame.
///
/// Both are fatal for the connection: the byte stream can no longer be
/// trusted to be frame-aligned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame payload of {length} bytes exceeds buffer capacity {capacity}")]
    Oversized { length: usize, capacity: usize },

    #[error("corrupted frame: tail sentinel is {sentinel:#x}")]
    Corrupted { sentinel: u32 },
}

/// Any failure of a framed send or receive.
#[derive(Debug, Error)]
pub enum NetError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),
}

impl NetError {
    /// Returns whether the connection must be torn down after this error.
    pub fn is_fatal_for_connection(&self) -> bool {
        match self {
            NetError::Transport(TransportError::UnknownPeer(_)) => false,
            NetError::Transport(_) => true,
            NetError::Frame(_) => true,
            NetError::Serialization(_) => false,
        }
    }

    /// Returns whether this is a setup-time failure.
    pub fn is_setup(&self) -> bool {
        matches!(self, NetError::Transport(TransportError::Connection { .. }))
    }
}
