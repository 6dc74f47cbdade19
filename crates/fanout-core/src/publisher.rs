//! Produces one message per tick at a configured rate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::Instant as TokioInstant;
use tracing::info;

use crate::clock::{Clock, PayloadSource};
use crate::message::Message;

/// Produces messages at a target rate, correcting drift against absolute
/// deadlines rather than accumulating sleep error.
///
/// Infallible at the message level: the only way it stops is a
/// Supervisor-initiated shutdown, at which point it exits cleanly with no
/// backlog to drain — it is a generator, not a queue.
pub struct Publisher {
    period: Duration,
    payload_bytes: usize,
    seq: AtomicU64,
    running: Arc<RwLock<bool>>,
}

impl Publisher {
    pub fn new(period: Duration, payload_bytes: usize, running: Arc<RwLock<bool>>) -> Self {
        Self {
            period,
            payload_bytes,
            seq: AtomicU64::new(0),
            running,
        }
    }

    /// Produced-message count so far (for the Metrics Aggregator's rate
    /// calculation).
    pub fn produced_count(&self) -> u64 {
        self.seq.load(Ordering::Relaxed)
    }

    /// Run the tick loop, sending each produced message to `out`. Returns
    /// once `running` flips false or `out` is closed (dispatcher gone).
    pub async fn run(
        &self,
        clock: Arc<dyn Clock>,
        payload_source: Arc<dyn PayloadSource>,
        out: mpsc::Sender<Arc<Message>>,
    ) {
        let mut next_deadline = TokioInstant::now();
        loop {
            if !*self.running.read() {
                info!("publisher stopping (shutdown)");
                return;
            }

            tokio::time::sleep_until(next_deadline).await;
            next_deadline += self.period;

            if !*self.running.read() {
                return;
            }

            let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
            let payload = payload_source.generate(self.payload_bytes);
            let message = Arc::new(Message::new(seq, clock.now_nanos(), payload));

            if out.send(message).await.is_err() {
                info!("publisher stopping (dispatcher channel closed)");
                return;
            }
        }
    }
}
