//! Client error types.

use razwire_protocol::SerializationError;
use razwire_transport::{NetError, TransportError};
use std::time::Duration;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Net(#[from] NetError),

    #[error("serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("not connected")]
    NotConnected,

    #[error("no reply within {0:?}")]
    Timeout(Duration),
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        ClientError::Net(err.into())
    }
}

impl ClientError {
    /// Returns whether a fresh attempt could succeed.
    ///
    /// Setup failures and lost connections need a new client, so only
    /// timeouts are retried in place.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Timeout(_))
    }

    /// Returns whether the connection was torn down by this error.
    pub fn is_fatal(&self) -> bool {
        match self {
            ClientError::Net(err) => err.is_fatal_for_connection(),
            ClientError::NotConnected => true,
            _ => false,
        }
    }
}
