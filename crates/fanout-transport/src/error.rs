//! Transport-level errors that never leak past the accept loop as
//! anything but a [`fanout_core::SupervisorError`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("accept failed: {0}")]
    AcceptFailed(String),
}

impl From<TransportError> for fanout_core::SupervisorError {
    fn from(e: TransportError) -> Self {
        fanout_core::SupervisorError::AcceptLoop(e.to_string())
    }
}
