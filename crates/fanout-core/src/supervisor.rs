//! Accepts connections, spawns sessions, runs the Publisher, Dispatcher,
//! and Metrics Aggregator, and handles graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::clock::{Clock, PayloadSource, RandomPayloadSource, SystemClock};
use crate::config::{DispatchMode, FanoutConfig};
use crate::connection::{ConnectionEvent, ConnectionReceiver, ConnectionSender};
use crate::dispatcher::{run_full_timeout_sweeper, Dispatcher};
use crate::error::SupervisorError;
use crate::message::ClientIdAllocator;
use crate::metrics::{DisconnectCounter, MetricsAggregator};
use crate::publisher::Publisher;
use crate::registry::Registry;
use crate::session::{Session, SessionState};
use crate::wire;

/// How an accept loop hands a freshly-handshaken connection to the
/// Supervisor. Transport crates (e.g. `fanout-transport`'s WebSocket
/// server) implement this; an in-memory test double can too.
#[async_trait]
pub trait ConnectionServer: Send {
    type Sender: ConnectionSender + 'static;
    type Receiver: ConnectionReceiver + 'static;

    /// Accept and handshake one connection, returning its split sender and
    /// receiver plus the client-id prefix negotiated during handshake.
    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, String), SupervisorError>;
}

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(250);

pub struct Supervisor {
    config: FanoutConfig,
    registry: Arc<Registry>,
    running: Arc<RwLock<bool>>,
    disconnects: Arc<DisconnectCounter>,
    id_alloc: Arc<ClientIdAllocator>,
    clock: Arc<dyn Clock>,
    payload_source: Arc<dyn PayloadSource>,
}

impl Supervisor {
    pub fn new(config: FanoutConfig) -> Self {
        Self::with_collaborators(
            config,
            Arc::new(SystemClock::new()),
            Arc::new(RandomPayloadSource),
        )
    }

    pub fn with_collaborators(
        config: FanoutConfig,
        clock: Arc<dyn Clock>,
        payload_source: Arc<dyn PayloadSource>,
    ) -> Self {
        Self {
            config,
            registry: Arc::new(Registry::new()),
            running: Arc::new(RwLock::new(false)),
            disconnects: Arc::new(DisconnectCounter::new()),
            id_alloc: Arc::new(ClientIdAllocator::new()),
            clock,
            payload_source,
        }
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    pub fn disconnects(&self) -> Arc<DisconnectCounter> {
        Arc::clone(&self.disconnects)
    }

    /// Run the engine against `server` until `shutdown` resolves, then
    /// perform graceful shutdown. Returns once every session has reached
    /// `Closed` or the shutdown grace period elapsed.
    pub async fn run<S>(&self, mut server: S, shutdown: impl std::future::Future<Output = ()>)
    where
        S: ConnectionServer,
    {
        *self.running.write() = true;

        let (pub_tx, pub_rx) = mpsc::channel(1024);
        let publisher = Arc::new(Publisher::new(
            self.config.tick_period(),
            self.config.payload_bytes as usize,
            Arc::clone(&self.running),
        ));
        let dispatcher = Dispatcher::new(&self.config, Arc::clone(&self.registry));
        let metrics = Arc::new(MetricsAggregator::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.disconnects),
            self.config.metrics_period(),
            true,
        ));

        let publisher_task = {
            let publisher = Arc::clone(&publisher);
            let clock = Arc::clone(&self.clock);
            let payload_source = Arc::clone(&self.payload_source);
            tokio::spawn(async move { publisher.run(clock, payload_source, pub_tx).await })
        };
        let dispatcher_task = tokio::spawn(async move { dispatcher.run(pub_rx).await });
        let metrics_task = {
            let metrics = Arc::clone(&metrics);
            let publisher = Arc::clone(&publisher);
            let running = Arc::clone(&self.running);
            tokio::spawn(async move {
                metrics
                    .run(move || publisher.produced_count(), running)
                    .await
            })
        };
        let sweeper_task = tokio::spawn(run_full_timeout_sweeper(
            Arc::clone(&self.registry),
            self.config.full_timeout(),
            Arc::clone(&self.running),
            DEFAULT_SWEEP_INTERVAL,
        ));

        tokio::pin!(shutdown);
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown signal received");
            }
            result = self.accept_loop(&mut server) => {
                if let Err(e) = result {
                    warn!(error = %e, "accept loop ended fatally");
                }
            }
        }

        self.shutdown_gracefully().await;

        *self.running.write() = false;
        let _ = publisher_task.await;
        let _ = dispatcher_task.await;
        let _ = metrics_task.await;
        sweeper_task.abort();
    }

    async fn accept_loop<S>(&self, server: &mut S) -> Result<(), SupervisorError>
    where
        S: ConnectionServer,
    {
        while *self.running.read() {
            let (sender, receiver, prefix) = server.accept().await?;
            let id = self.id_alloc.next(&prefix);
            info!(session = %id, "accepted connection");
            self.spawn_session(id, sender, receiver);
        }
        Ok(())
    }

    fn spawn_session<Sender, Receiver>(&self, id: String, sender: Sender, mut receiver: Receiver)
    where
        Sender: ConnectionSender + 'static,
        Receiver: ConnectionReceiver + 'static,
    {
        let session = Arc::new(Session::new(id.clone(), Arc::new(sender), self.config.maxsize));
        self.registry.insert(Arc::clone(&session));

        let sender_handle = if self.config.mode == DispatchMode::Queue {
            let session = Arc::clone(&session);
            Some(tokio::spawn(async move { run_sender_loop(session).await }))
        } else {
            None
        };

        let receiver_handle = {
            let session = Arc::clone(&session);
            let clock = Arc::clone(&self.clock);
            tokio::spawn(async move { run_receiver_loop(session, &mut receiver, clock).await })
        };

        let registry = Arc::clone(&self.registry);
        let disconnects = Arc::clone(&self.disconnects);
        tokio::spawn(async move {
            if let Some(h) = sender_handle {
                let _ = h.await;
            }
            let _ = receiver_handle.await;

            session.close_connection().await;
            registry.remove(&session.id);
            session.mark_closed();
            disconnects.increment();
            debug!(session = %session.id, reason = ?session.close_reason(), "session closed");
        });
    }

    /// Transition every live session to Draining and wait up to
    /// `shutdown_grace` for the Registry to empty, then force-close
    /// whatever remains.
    async fn shutdown_gracefully(&self) {
        for session in self.registry.snapshot() {
            session.drain("shutdown");
        }

        let deadline = tokio::time::Instant::now() + self.config.shutdown_grace();
        while tokio::time::Instant::now() < deadline {
            if self.registry.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        for session in self.registry.snapshot() {
            warn!(session = %session.id, "force-closing after shutdown grace");
            session.close_connection().await;
            self.registry.remove(&session.id);
            session.mark_closed();
            self.disconnects.increment();
        }
    }
}

/// The Sender task (queue mode only): pop the head, transmit, sample send
/// latency, track the seq for ACK matching. Terminates on send error or
/// once the session is Draining with an empty queue.
async fn run_sender_loop(session: Arc<Session>) {
    while let Some(message) = session.dequeue().await {
        let bytes = wire::encode_message(&message);
        let start = std::time::Instant::now();
        match session.send(bytes).await {
            Ok(()) => {
                session.record_send_latency(start.elapsed());
                session.track_outbound(message.seq, message.publish_ts);
            }
            Err(e) => {
                session.drain(e.reason());
                return;
            }
        }
    }
}

/// The Receiver task: decode ACK frames and record e2e latency; malformed
/// frames are counted and ignored unless the consecutive streak crosses
/// the threshold.
async fn run_receiver_loop<R: ConnectionReceiver>(
    session: Arc<Session>,
    receiver: &mut R,
    clock: Arc<dyn Clock>,
) {
    const MALFORMED_THRESHOLD: u64 = 5;
    loop {
        match receiver.recv().await {
            Some(ConnectionEvent::Data(data)) => match wire::decode_ack(&data) {
                Ok(ack) => {
                    session.reset_malformed_streak();
                    session.record_ack(ack.ack_seq, clock.now_nanos());
                }
                Err(_) => {
                    if session.record_malformed_frame(MALFORMED_THRESHOLD) {
                        session.drain("malformed_input");
                        return;
                    }
                }
            },
            Some(ConnectionEvent::Malformed) => {
                if session.record_malformed_frame(MALFORMED_THRESHOLD) {
                    session.drain("malformed_input");
                    return;
                }
            }
            Some(ConnectionEvent::Closed { .. }) | None => {
                session.drain("connection_closed");
                return;
            }
        }
        if session.state() != SessionState::Open {
            return;
        }
    }
}
