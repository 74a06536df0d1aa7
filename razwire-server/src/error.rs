//! Server error types.

use crate::config::ConfigError;
use razwire_protocol::SerializationError;
use razwire_transport::{NetError, TransportError};
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Net(#[from] NetError),

    #[error("serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("server shutting down")]
    ShuttingDown,
}

impl From<TransportError> for ServerError {
    fn from(err: TransportError) -> Self {
        ServerError::Net(err.into())
    }
}

impl ServerError {
    /// Returns whether the server could not start at all.
    pub fn is_setup(&self) -> bool {
        match self {
            ServerError::Net(err) => err.is_setup(),
            ServerError::Config(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_setup_classification() {
        let bind: ServerError = TransportError::Connection {
            addr: "127.0.0.1:1".into(),
            source: io::ErrorKind::AddrInUse.into(),
        }
        .into();
        assert!(bind.is_setup());

        let config: ServerError = ConfigError::ValidationError("bad".into()).into();
        assert!(config.is_setup());
        assert!(config.to_string().contains("bad"));

        assert!(!ServerError::ShuttingDown.is_setup());
        let closed: ServerError = TransportError::PeerClosed.into();
        assert!(!closed.is_setup());
    }
}
