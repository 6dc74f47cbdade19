//! Per-connection state and the delivery state machine.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::connection::ConnectionSender;
use crate::error::SessionError;
use crate::message::{ClientId, Message};
use crate::ring::RingBuffer;

/// How many `(seq, publish_ts_nanos)` pairs a session remembers for
/// matching client ACKs. ACKs for seqs evicted from this window (already
/// delivered long ago, or never tracked because the session dropped them)
/// are ignored silently.
const OUTBOUND_TRACKING_WINDOW: usize = 4096;

/// How many latency samples are kept for percentile computation.
const LATENCY_SAMPLE_CAPACITY: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Draining,
    Closed,
}

/// The result of a non-blocking enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Admitted,
    DroppedOldest,
}

struct QueueState {
    queue: VecDeque<Arc<Message>>,
    full_since: Option<Instant>,
    drop_window: VecDeque<Instant>,
}

/// Per-connection state and tasks for one subscriber.
///
/// Invariants upheld by this type alone (no external synchronization
/// needed beyond what's here): queue length is always in `[0, maxsize]`;
/// `full_since` is `Some` iff the queue has been continuously at `maxsize`
/// since that instant; state only moves forward `Open -> Draining -> Closed`.
pub struct Session {
    pub id: ClientId,
    sender: Arc<dyn ConnectionSender>,
    maxsize: usize,
    state: RwLock<SessionState>,
    close_reason: RwLock<Option<&'static str>>,
    queue_state: Mutex<QueueState>,
    notify: tokio::sync::Notify,
    drops_total: AtomicU64,
    send_latency_samples: Mutex<RingBuffer<Duration>>,
    e2e_latency_samples: Mutex<RingBuffer<Duration>>,
    outbound: Mutex<RingBuffer<(u64, u64)>>,
    malformed_streak: AtomicU64,
}

impl Session {
    pub fn new(id: ClientId, sender: Arc<dyn ConnectionSender>, maxsize: u32) -> Self {
        let maxsize = maxsize.max(1) as usize;
        Self {
            id,
            sender,
            maxsize,
            state: RwLock::new(SessionState::Open),
            close_reason: RwLock::new(None),
            queue_state: Mutex::new(QueueState {
                queue: VecDeque::with_capacity(maxsize),
                full_since: None,
                drop_window: VecDeque::new(),
            }),
            notify: tokio::sync::Notify::new(),
            drops_total: AtomicU64::new(0),
            send_latency_samples: Mutex::new(RingBuffer::new(LATENCY_SAMPLE_CAPACITY)),
            e2e_latency_samples: Mutex::new(RingBuffer::new(LATENCY_SAMPLE_CAPACITY)),
            outbound: Mutex::new(RingBuffer::new(OUTBOUND_TRACKING_WINDOW)),
            malformed_streak: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn close_reason(&self) -> Option<&'static str> {
        *self.close_reason.read()
    }

    /// Open -> Draining. No-op if already Draining/Closed.
    pub fn drain(&self, reason: &'static str) {
        let mut state = self.state.write();
        if *state == SessionState::Open {
            *state = SessionState::Draining;
            *self.close_reason.write() = Some(reason);
            debug!(session = %self.id, reason, "session draining");
        }
        drop(state);
        // Wake a blocked sender so it observes the new state promptly.
        self.notify.notify_waiters();
    }

    /// Draining -> Closed. Caller must have already released the
    /// Connection and removed the session from the Registry.
    pub fn mark_closed(&self) {
        *self.state.write() = SessionState::Closed;
    }

    pub fn is_connected(&self) -> bool {
        self.sender.is_connected()
    }

    pub fn queue_len(&self) -> usize {
        self.queue_state.lock().queue.len()
    }

    pub fn total_drops(&self) -> u64 {
        self.drops_total.load(Ordering::Relaxed)
    }

    pub fn full_since(&self) -> Option<Instant> {
        self.queue_state.lock().full_since
    }

    /// Non-blocking enqueue used by the Dispatcher in queue mode.
    ///
    /// Applies drop-oldest on overflow and maintains `full_since` per the
    /// rule: set when length reaches `maxsize` with no prior `full_since`;
    /// cleared whenever length is strictly less than `maxsize`.
    pub fn enqueue(&self, msg: Arc<Message>, now: Instant) -> EnqueueOutcome {
        let mut st = self.queue_state.lock();
        let outcome = if st.queue.len() < self.maxsize {
            st.queue.push_back(msg);
            EnqueueOutcome::Admitted
        } else {
            st.queue.pop_front();
            st.queue.push_back(msg);
            self.drops_total.fetch_add(1, Ordering::Relaxed);
            st.drop_window.push_back(now);
            EnqueueOutcome::DroppedOldest
        };

        if st.queue.len() >= self.maxsize {
            if st.full_since.is_none() {
                st.full_since = Some(now);
            }
        } else {
            st.full_since = None;
        }
        drop(st);
        self.notify.notify_one();
        outcome
    }

    /// Blocking dequeue for the session's Sender task: waits if empty,
    /// returns `None` once the session is Draining/Closed with no
    /// remaining backlog.
    pub async fn dequeue(&self) -> Option<Arc<Message>> {
        loop {
            {
                let mut st = self.queue_state.lock();
                if let Some(msg) = st.queue.pop_front() {
                    if st.queue.len() < self.maxsize {
                        st.full_since = None;
                    }
                    return Some(msg);
                }
            }
            if self.state() != SessionState::Open {
                return None;
            }
            self.notify.notified().await;
        }
    }

    /// Number of drops within the last `window` ending at `now`. Prunes
    /// entries older than the window as a side effect — the ring is
    /// bounded defensively at `drop_limit + 1` by the caller sizing
    /// checks rather than here, so pruning keeps it from growing with
    /// an ever-larger window.
    pub fn drops_in_window(&self, now: Instant, window: Duration) -> u32 {
        let mut st = self.queue_state.lock();
        while let Some(&front) = st.drop_window.front() {
            if now.saturating_duration_since(front) > window {
                st.drop_window.pop_front();
            } else {
                break;
            }
        }
        st.drop_window.len() as u32
    }

    /// Evaluate the drop-rate cap policy.
    pub fn exceeds_drop_limit(&self, now: Instant, window: Duration, limit: u32) -> bool {
        self.drops_in_window(now, window) >= limit
    }

    /// Evaluate the sustained-overflow policy: true once the queue has
    /// been continuously full for at least `timeout`.
    pub fn exceeds_full_timeout(&self, now: Instant, timeout: Duration) -> bool {
        match self.full_since() {
            Some(since) => now.saturating_duration_since(since) >= timeout,
            None => false,
        }
    }

    pub fn record_send_latency(&self, d: Duration) {
        self.send_latency_samples.lock().push(d);
    }

    pub fn send_latency_samples(&self) -> Vec<Duration> {
        self.send_latency_samples.lock().iter().copied().collect()
    }

    pub fn e2e_latency_samples(&self) -> Vec<Duration> {
        self.e2e_latency_samples.lock().iter().copied().collect()
    }

    pub fn drain_e2e_latency_samples(&self) -> Vec<Duration> {
        self.e2e_latency_samples.lock().drain().collect()
    }

    /// Record that `seq` was transmitted at `publish_ts_nanos`, for later
    /// ACK matching.
    pub fn track_outbound(&self, seq: u64, publish_ts_nanos: u64) {
        self.outbound.lock().push((seq, publish_ts_nanos));
    }

    /// Compute end-to-end latency for an ACK, if `ack_seq` is still being
    /// tracked. `now_nanos` is the receive time in the same clock domain
    /// as `publish_ts_nanos`. Unknown/evicted seqs are ignored (`None`).
    pub fn record_ack(&self, ack_seq: u64, now_nanos: u64) -> Option<Duration> {
        let publish_ts = {
            let outbound = self.outbound.lock();
            let found = outbound
                .iter()
                .find(|(seq, _)| *seq == ack_seq)
                .map(|(_, ts)| *ts);
            found
        }?;
        let latency_nanos = now_nanos.saturating_sub(publish_ts);
        let d = Duration::from_nanos(latency_nanos);
        self.e2e_latency_samples.lock().push(d);
        Some(d)
    }

    /// Count a malformed frame; returns `true` once the consecutive streak
    /// crosses the threshold and the session should be Drained.
    pub fn record_malformed_frame(&self, threshold: u64) -> bool {
        self.malformed_streak.fetch_add(1, Ordering::Relaxed) + 1 >= threshold
    }

    pub fn reset_malformed_streak(&self) {
        self.malformed_streak.store(0, Ordering::Relaxed);
    }

    pub async fn send(&self, data: bytes::Bytes) -> Result<(), SessionError> {
        self.sender.send(data).await
    }

    pub fn try_send(&self, data: bytes::Bytes) -> Result<(), SessionError> {
        self.sender.try_send(data)
    }

    pub async fn close_connection(&self) {
        let _ = self.sender.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionSender;
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

    fn session(maxsize: u32) -> Session {
        Session::new("test-0".to_string(), Arc::new(NullSender), maxsize)
    }

    fn msg(seq: u64) -> Arc<Message> {
        Arc::new(Message::new(seq, seq * 1000, Bytes::from_static(b"x")))
    }

    /// maxsize=3, enqueue 1..5 with sender paused: oldest two are dropped.
    #[test]
    fn drop_oldest_evicts_front_past_maxsize() {
        let s = session(3);
        let now = Instant::now();
        for seq in 1..=5 {
            s.enqueue(msg(seq), now);
        }
        assert_eq!(s.total_drops(), 2);
        let remaining: Vec<u64> = s.queue_state.lock().queue.iter().map(|m| m.seq).collect();
        assert_eq!(remaining, vec![3, 4, 5]);
    }

    #[test]
    fn full_since_set_and_cleared() {
        let s = session(2);
        let t0 = Instant::now();
        assert!(s.full_since().is_none());
        s.enqueue(msg(1), t0);
        assert!(s.full_since().is_none());
        s.enqueue(msg(2), t0);
        assert!(s.full_since().is_some());

        // dequeueing below maxsize clears it
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            s.dequeue().await;
        });
        assert!(s.full_since().is_none());
    }

    #[test]
    fn drop_window_prunes_old_entries() {
        let s = session(1);
        let t0 = Instant::now();
        s.enqueue(msg(1), t0);
        s.enqueue(msg(2), t0); // 1 drop at t0

        let later = t0 + Duration::from_secs(20);
        assert_eq!(s.drops_in_window(later, Duration::from_secs(10)), 0);
    }

    #[test]
    fn exceeds_drop_limit_after_repeated_overflow() {
        let s = session(1);
        let t0 = Instant::now();
        // 7 enqueues into maxsize=1 -> first admitted, 6 drops
        for seq in 1..=7 {
            s.enqueue(msg(seq), t0);
        }
        assert_eq!(s.total_drops(), 6);
        assert!(s.exceeds_drop_limit(t0, Duration::from_secs(10), 5));
    }

    #[test]
    fn exceeds_full_timeout_once_continuously_full() {
        let s = session(2);
        let t0 = Instant::now();
        s.enqueue(msg(1), t0);
        s.enqueue(msg(2), t0);
        assert!(!s.exceeds_full_timeout(t0, Duration::from_secs(1)));
        let later = t0 + Duration::from_millis(1200);
        assert!(s.exceeds_full_timeout(later, Duration::from_secs(1)));
    }

    #[test]
    fn ack_for_tracked_seq_yields_latency() {
        let s = session(10);
        s.track_outbound(5, 1_000_000);
        let latency = s.record_ack(5, 1_500_000);
        assert_eq!(latency, Some(Duration::from_nanos(500_000)));
    }

    #[test]
    fn ack_for_unknown_seq_is_ignored() {
        let s = session(10);
        s.track_outbound(5, 1_000_000);
        assert_eq!(s.record_ack(999, 2_000_000), None);
    }
}
