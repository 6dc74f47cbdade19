//! Error kinds confined to the scope that can recover from them.
//!
//! Per the propagation policy: session errors never cross the session
//! boundary, the Publisher and Dispatcher are infallible at the message
//! level, and only setup/shutdown errors reach the caller of
//! [`crate::supervisor::Supervisor`].

use thiserror::Error;

/// Fatal, session-scoped failures. Produced internally by the Sender and
/// Receiver tasks and by the Dispatcher's policy checks; always results in
/// the session transitioning to `Draining`, never propagated further.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("connection closed")]
    ConnectionClosed,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("send timed out")]
    SendTimeout,

    #[error("ping timeout")]
    PingTimeout,

    #[error("drop-rate policy violated: {0} drops in window")]
    ExcessiveDrops(u32),

    #[error("queue full for {0:?}")]
    QueueFullTimeout(std::time::Duration),

    #[error("too many malformed frames")]
    MalformedInput,
}

impl SessionError {
    /// The label recorded in logs and reflected as a disconnect reason.
    pub fn reason(&self) -> &'static str {
        match self {
            SessionError::ConnectionClosed => "connection_closed",
            SessionError::SendFailed(_) => "send_failed",
            SessionError::SendTimeout => "send_timeout",
            SessionError::PingTimeout => "ping_timeout",
            SessionError::ExcessiveDrops(_) => "excessive_drops",
            SessionError::QueueFullTimeout(_) => "queue_full_timeout",
            SessionError::MalformedInput => "malformed_input",
        }
    }
}

/// Errors that can abort the Supervisor's startup or shutdown.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("accept loop failed fatally: {0}")]
    AcceptLoop(String),
}
