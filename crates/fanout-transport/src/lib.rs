//! WebSocket transport: the one real-world implementation of
//! `fanout-core`'s `ConnectionSender`/`ConnectionReceiver`/`ConnectionServer`
//! traits, plus the client-side connector `demos/client-sim` uses to open
//! load-test connections.

pub mod error;
pub mod websocket;

pub use error::TransportError;
pub use websocket::{connect, WebSocketReceiver, WebSocketSender, WebSocketServer, SUBPROTOCOL};
