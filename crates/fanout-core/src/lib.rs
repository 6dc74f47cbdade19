//! Fan-out engine: the hard part of a WebSocket broadcast server.
//!
//! This crate is transport-agnostic. It knows how to produce messages at a
//! steady rate, fan them out to an arbitrary set of sessions with either a
//! naive synchronous strategy or a queued, isolated one, and how to detect
//! and shed a session that can't keep up. It never touches a socket
//! directly — see `fanout-transport` for the WebSocket implementation of
//! the [`connection::ConnectionSender`]/[`connection::ConnectionReceiver`]
//! traits this crate depends on.

pub mod clock;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod metrics;
pub mod publisher;
pub mod registry;
pub mod ring;
pub mod session;
pub mod supervisor;
pub mod wire;

pub use clock::{Clock, PayloadSource, RandomPayloadSource, SystemClock};
pub use config::{DispatchMode, FanoutConfig};
pub use connection::{ConnectionEvent, ConnectionReceiver, ConnectionSender};
pub use dispatcher::Dispatcher;
pub use error::{SessionError, SupervisorError};
pub use message::{Ack, ClientId, ClientIdAllocator, Message};
pub use metrics::{DisconnectCounter, MetricsAggregator, MetricsSample};
pub use publisher::Publisher;
pub use registry::Registry;
pub use session::{EnqueueOutcome, Session, SessionState};
pub use supervisor::{ConnectionServer, Supervisor};

#[cfg(any(test, feature = "test-util"))]
pub use clock::{FixedPayloadSource, ManualClock};
