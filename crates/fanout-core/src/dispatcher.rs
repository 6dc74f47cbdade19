//! Delivers each published message to every session in the Registry
//! snapshot taken at delivery time, in one of two fixed-for-the-process
//! modes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::{DispatchMode, FanoutConfig};
use crate::message::Message;
use crate::registry::Registry;
use crate::session::{EnqueueOutcome, Session};
use crate::wire;

/// Consumes the Publisher's output and fans each message out, never
/// blocking on a slow client in queue mode. Naive mode intentionally
/// blocks per-client.
pub struct Dispatcher {
    mode: DispatchMode,
    registry: Arc<Registry>,
    drop_limit: u32,
    drop_window: Duration,
    naive_send_timeout: Duration,
}

impl Dispatcher {
    pub fn new(config: &FanoutConfig, registry: Arc<Registry>) -> Self {
        Self {
            mode: config.mode,
            registry,
            drop_limit: config.drop_limit,
            drop_window: config.drop_window(),
            naive_send_timeout: config.naive_send_timeout(),
        }
    }

    /// Run until `inbox` closes (the Publisher stopped and dropped its
    /// sender).
    pub async fn run(&self, mut inbox: mpsc::Receiver<Arc<Message>>) {
        while let Some(message) = inbox.recv().await {
            let snapshot = self.registry.snapshot();
            match self.mode {
                DispatchMode::Naive => self.dispatch_naive(&message, &snapshot).await,
                DispatchMode::Queue => self.dispatch_queue(&message, &snapshot),
            }
        }
        debug!("dispatcher stopping (publisher channel closed)");
    }

    /// Synchronous per-client transmission. A session whose send errors or
    /// times out is Drained and fan-out continues with the next session —
    /// this is what makes the slowest session dominate every broadcast.
    async fn dispatch_naive(&self, message: &Arc<Message>, sessions: &[Arc<Session>]) {
        let bytes = wire::encode_message(message);
        for session in sessions {
            if session.state() != crate::session::SessionState::Open {
                continue;
            }
            match timeout(self.naive_send_timeout, session.send(bytes.clone())).await {
                Ok(Ok(())) => {
                    session.track_outbound(message.seq, message.publish_ts);
                }
                Ok(Err(e)) => {
                    warn!(session = %session.id, error = %e, "naive send failed");
                    session.drain(e.reason());
                }
                Err(_) => {
                    warn!(session = %session.id, "naive send timed out");
                    session.drain("send_timeout");
                }
            }
        }
    }

    /// Non-blocking enqueue into each session's bounded queue, with
    /// drop-oldest overflow and the disconnect policies evaluated after any
    /// drop. O(sessions) non-blocking work regardless of any one client's
    /// speed.
    fn dispatch_queue(&self, message: &Arc<Message>, sessions: &[Arc<Session>]) {
        let now = Instant::now();
        for session in sessions {
            if session.state() != crate::session::SessionState::Open {
                continue;
            }
            let outcome = session.enqueue(Arc::clone(message), now);
            if outcome == EnqueueOutcome::DroppedOldest {
                self.check_drop_rate_policy(session, now);
            }
        }
    }

    fn check_drop_rate_policy(&self, session: &Arc<Session>, now: Instant) {
        if session.exceeds_drop_limit(now, self.drop_window, self.drop_limit) {
            warn!(session = %session.id, "drop-rate cap exceeded");
            session.drain("excessive_drops");
        }
    }
}

/// Periodic sweeper for the time-based sustained-overflow policy (spec
/// §4.3 rule 2), which can become true without any further enqueue.
pub async fn run_full_timeout_sweeper(
    registry: Arc<Registry>,
    full_timeout: Duration,
    running: Arc<RwLock<bool>>,
    sweep_interval: Duration,
) {
    let mut ticker = tokio::time::interval(sweep_interval);
    loop {
        ticker.tick().await;
        if !*running.read() {
            return;
        }
        let now = Instant::now();
        for session in registry.snapshot() {
            if session.state() == crate::session::SessionState::Open
                && session.exceeds_full_timeout(now, full_timeout)
            {
                warn!(session = %session.id, "full-timeout exceeded");
                session.drain("queue_full_timeout");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionSender;
    use crate::error::SessionError;
    use async_trait::async_trait;
    use bytes::Bytes;

    struct NullSender;

    #[async_trait]
    impl ConnectionSender for NullSender {
        async fn send(&self, _data: Bytes) -> Result<(), SessionError> {
            Ok(())
        }
        fn try_send(&self, _data: Bytes) -> Result<(), SessionError> {
            Ok(())
        }
        fn is_connected(&self) -> bool {
            true
        }
        async fn close(&self) -> Result<(), SessionError> {
            Ok(())
        }
    }

    fn msg(seq: u64) -> Arc<Message> {
        Arc::new(Message::new(seq, seq, Bytes::from_static(b"x")))
    }

    #[test]
    fn queue_mode_drains_on_drop_limit() {
        let registry = Arc::new(Registry::new());
        let session = Arc::new(Session::new("s-0".to_string(), Arc::new(NullSender), 1));
        registry.insert(Arc::clone(&session));

        let mut config = FanoutConfig::default();
        config.mode = DispatchMode::Queue;
        config.drop_limit = 5;
        config.drop_window_secs = 10.0;
        let dispatcher = Dispatcher::new(&config, Arc::clone(&registry));

        // 7 rapid messages into a maxsize=1 session: 6 drops >= limit 5.
        for seq in 1..=7 {
            dispatcher.dispatch_queue(&msg(seq), &[Arc::clone(&session)]);
        }

        assert_eq!(session.state(), crate::session::SessionState::Draining);
        assert_eq!(session.close_reason(), Some("excessive_drops"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn full_timeout_sweeper_drains_stalled_session() {
        let registry = Arc::new(Registry::new());
        let session = Arc::new(Session::new("s-1".to_string(), Arc::new(NullSender), 2));
        registry.insert(Arc::clone(&session));

        let now = Instant::now();
        session.enqueue(msg(1), now);
        session.enqueue(msg(2), now);
        assert!(session.full_since().is_some());

        let running = Arc::new(RwLock::new(true));
        let sweeper = tokio::spawn(run_full_timeout_sweeper(
            Arc::clone(&registry),
            Duration::from_millis(100),
            Arc::clone(&running),
            Duration::from_millis(20),
        ));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(session.state(), crate::session::SessionState::Draining);
        assert_eq!(session.close_reason(), Some("queue_full_timeout"));

        *running.write() = false;
        let _ = tokio::time::timeout(Duration::from_secs(1), sweeper).await;
    }
}
