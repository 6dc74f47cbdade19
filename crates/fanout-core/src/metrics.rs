//! Periodic sampling and percentile computation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::info;

use crate::registry::Registry;

/// Cumulative count of sessions that have entered `Closed`. Owned by the
/// Supervisor, incremented wherever a session finishes draining, read by
/// the Metrics Aggregator each period.
#[derive(Default)]
pub struct DisconnectCounter(AtomicU64);

impl DisconnectCounter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Sorts a sample buffer and takes the element at `floor(p * N)`. Empty
/// buffers yield `None`.
pub fn percentile(samples: &mut [Duration], p: f64) -> Option<Duration> {
    if samples.is_empty() {
        return None;
    }
    samples.sort_unstable();
    let idx = ((samples.len() as f64) * p).floor() as usize;
    let idx = idx.min(samples.len() - 1);
    Some(samples[idx])
}

#[derive(Debug, Clone, Default)]
pub struct MetricsSample {
    pub clients: usize,
    pub pub_rate: f64,
    pub e2e_p50_ms: Option<f64>,
    pub e2e_p95_ms: Option<f64>,
    pub disconnects_total: u64,
    pub rows: Vec<SessionRow>,
}

#[derive(Debug, Clone)]
pub struct SessionRow {
    pub id: String,
    pub queue_len: usize,
    pub drops_total: u64,
    pub send_latency_ms: Option<f64>,
    pub e2e_latency_ms: Option<f64>,
}

fn mean_ms(samples: &[Duration]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let total: Duration = samples.iter().sum();
    Some(total.as_secs_f64() * 1000.0 / samples.len() as f64)
}

pub struct MetricsAggregator {
    registry: Arc<Registry>,
    disconnects: Arc<DisconnectCounter>,
    period: Duration,
    include_per_session: bool,
    last_produced: AtomicU64,
    last_sample_at: RwLock<Instant>,
}

impl MetricsAggregator {
    pub fn new(
        registry: Arc<Registry>,
        disconnects: Arc<DisconnectCounter>,
        period: Duration,
        include_per_session: bool,
    ) -> Self {
        Self {
            registry,
            disconnects,
            period,
            include_per_session,
            last_produced: AtomicU64::new(0),
            last_sample_at: RwLock::new(Instant::now()),
        }
    }

    /// Compute one sample given the Publisher's cumulative produced count
    /// as of now. Draining e2e latency samples from each session so the
    /// p50/p95 window is "this period" rather than all-time.
    pub fn sample(&self, produced_so_far: u64) -> MetricsSample {
        let now = Instant::now();
        let elapsed = {
            let mut last = self.last_sample_at.write();
            let elapsed = now.saturating_duration_since(*last).as_secs_f64();
            *last = now;
            elapsed.max(f64::EPSILON)
        };

        let previous = self.last_produced.swap(produced_so_far, Ordering::Relaxed);
        let delta = produced_so_far.saturating_sub(previous);
        let pub_rate = delta as f64 / elapsed;

        let sessions = self.registry.snapshot();
        let mut all_e2e: Vec<Duration> = Vec::new();
        let mut rows = Vec::new();

        for session in &sessions {
            let mut e2e = session.drain_e2e_latency_samples();
            let send_samples = session.send_latency_samples();

            if self.include_per_session {
                rows.push(SessionRow {
                    id: session.id.clone(),
                    queue_len: session.queue_len(),
                    drops_total: session.total_drops(),
                    send_latency_ms: mean_ms(&send_samples),
                    e2e_latency_ms: mean_ms(&e2e),
                });
            }

            all_e2e.append(&mut e2e);
        }

        let e2e_p50_ms = percentile(&mut all_e2e.clone(), 0.50).map(|d| d.as_secs_f64() * 1000.0);
        let e2e_p95_ms = percentile(&mut all_e2e, 0.95).map(|d| d.as_secs_f64() * 1000.0);

        MetricsSample {
            clients: sessions.len(),
            pub_rate,
            e2e_p50_ms,
            e2e_p95_ms,
            disconnects_total: self.disconnects.get(),
            rows,
        }
    }

    /// Run the sampling loop, logging each sample as a structured
    /// `tracing` event. `produced_count` is called each tick to fetch the
    /// Publisher's cumulative count.
    pub async fn run(
        &self,
        produced_count: impl Fn() -> u64,
        running: Arc<RwLock<bool>>,
    ) {
        let mut ticker = tokio::time::interval(self.period);
        loop {
            ticker.tick().await;
            if !*running.read() {
                return;
            }
            let sample = self.sample(produced_count());
            info!(
                clients = sample.clients,
                pub_rate = sample.pub_rate,
                e2e_p50_ms = sample.e2e_p50_ms,
                e2e_p95_ms = sample.e2e_p95_ms,
                disconnects_total = sample.disconnects_total,
                "metrics"
            );
            for row in &sample.rows {
                info!(
                    session = %row.id,
                    queue_len = row.queue_len,
                    drops_total = row.drops_total,
                    send_latency_ms = row.send_latency_ms,
                    e2e_latency_ms = row.e2e_latency_ms,
                    "session metrics"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_of_empty_is_none() {
        let mut samples: Vec<Duration> = vec![];
        assert_eq!(percentile(&mut samples, 0.5), None);
    }

    #[test]
    fn percentile_uses_floor_index() {
        let mut samples: Vec<Duration> = (1..=10)
            .map(|ms| Duration::from_millis(ms))
            .rev()
            .collect();
        // sorted: 1..10 ms; p50 -> floor(10*0.5)=5 -> index 5 -> 6ms
        let p50 = percentile(&mut samples, 0.5).unwrap();
        assert_eq!(p50, Duration::from_millis(6));
    }

    #[test]
    fn disconnect_counter_increments() {
        let c = DisconnectCounter::new();
        assert_eq!(c.get(), 0);
        c.increment();
        c.increment();
        assert_eq!(c.get(), 2);
    }
}
