//! Narrow collaborator interfaces: monotonic time and payload generation.
//!
//! Kept as traits (rather than calling `Instant::now()`/`rand` directly from
//! the engine) so tests can drive the Publisher and the drop-window/
//! full-timeout policies with a controlled clock instead of real sleeps.

use std::time::{Duration, Instant};

/// A monotonic clock. `now()` must never go backwards.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    /// Nanoseconds of `now()` relative to an arbitrary, process-local origin.
    /// Used to stamp `Message::publish_ts`.
    fn now_nanos(&self) -> u64;
}

/// Real wall/monotonic clock backed by [`std::time::Instant`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock {
    origin: Option<Instant>,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Some(Instant::now()),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_nanos(&self) -> u64 {
        let origin = self.origin.unwrap_or_else(Instant::now);
        Instant::now().saturating_duration_since(origin).as_nanos() as u64
    }
}

/// A source of fixed-size opaque payload bytes.
pub trait PayloadSource: Send + Sync {
    fn generate(&self, size: usize) -> bytes::Bytes;
}

/// Pseudo-random payload source backed by `rand`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomPayloadSource;

impl PayloadSource for RandomPayloadSource {
    fn generate(&self, size: usize) -> bytes::Bytes {
        use rand::RngCore;
        let mut buf = vec![0u8; size];
        rand::thread_rng().fill_bytes(&mut buf);
        bytes::Bytes::from(buf)
    }
}

/// Fixed-step clock for deterministic tests: `now()` only advances when
/// `advance()` is called.
#[cfg(any(test, feature = "test-util"))]
pub struct ManualClock {
    inner: parking_lot::Mutex<Instant>,
    nanos: std::sync::atomic::AtomicU64,
}

#[cfg(any(test, feature = "test-util"))]
impl ManualClock {
    pub fn new() -> Self {
        Self {
            inner: parking_lot::Mutex::new(Instant::now()),
            nanos: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn advance(&self, d: Duration) {
        let mut t = self.inner.lock();
        *t += d;
        self.nanos
            .fetch_add(d.as_nanos() as u64, std::sync::atomic::Ordering::Relaxed);
    }
}

#[cfg(any(test, feature = "test-util"))]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.inner.lock()
    }

    fn now_nanos(&self) -> u64 {
        self.nanos.load(std::sync::atomic::Ordering::Relaxed)
    }
}

/// Deterministic payload source for tests: always the same repeated byte.
#[cfg(any(test, feature = "test-util"))]
pub struct FixedPayloadSource(pub u8);

#[cfg(any(test, feature = "test-util"))]
impl PayloadSource for FixedPayloadSource {
    fn generate(&self, size: usize) -> bytes::Bytes {
        bytes::Bytes::from(vec![self.0; size])
    }
}
