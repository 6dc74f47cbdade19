//! The narrow transport interface the engine depends on.
//!
//! The engine never talks to a socket directly. It is handed a split
//! sender/receiver pair implementing these traits, so `fanout-transport`'s
//! WebSocket implementation and an in-memory test double are
//! interchangeable from the Session's point of view.

use async_trait::async_trait;
use bytes::Bytes;

/// Events a [`ConnectionReceiver`] surfaces to the owning Session.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A text/binary frame was received and decoded into raw bytes.
    Data(Bytes),
    /// The peer closed the connection, or a ping/pong timeout elapsed.
    Closed { reason: Option<String> },
    /// A malformed frame was received; the caller should count it and
    /// continue rather than treat it as a connection failure.
    Malformed,
}

/// The sending half of a connection.
///
/// Mirrors a bounded-channel-backed writer: `try_send` never blocks and is
/// what the Dispatcher uses for queue-mode fan-out; `send` is used by a
/// session's own Sender task where blocking until there is room is correct.
#[async_trait]
pub trait ConnectionSender: Send + Sync {
    /// Send, waiting if necessary.
    async fn send(&self, data: Bytes) -> Result<(), crate::error::SessionError>;

    /// Send without waiting. Naive mode's per-client transmission and the
    /// in-process test double both implement this directly on the wire;
    /// queue mode never calls it because it enqueues locally instead.
    fn try_send(&self, data: Bytes) -> Result<(), crate::error::SessionError>;

    fn is_connected(&self) -> bool;

    async fn close(&self) -> Result<(), crate::error::SessionError>;
}

/// The receiving half of a connection.
#[async_trait]
pub trait ConnectionReceiver: Send {
    async fn recv(&mut self) -> Option<ConnectionEvent>;
}
