//! Wire types: the published `Message` and the opaque `ClientId`.

use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque client identifier, unique for the server's lifetime.
///
/// Assigned at connect time as `<prefix>-<counter>`.
pub type ClientId = String;

/// Monotonically increasing allocator for the numeric part of a [`ClientId`].
#[derive(Debug, Default)]
pub struct ClientIdAllocator {
    counter: AtomicU64,
}

impl ClientIdAllocator {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    /// Allocate the next id for the given handshake-negotiated prefix.
    pub fn next(&self, prefix: &str) -> ClientId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}-{n}")
    }
}

/// An immutable message produced by the [`crate::publisher::Publisher`].
///
/// Once published a `Message` never changes; it is shared by reference
/// (via [`std::sync::Arc`]) across every session it is fanned out to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Monotonically increasing sequence number, starting at 1.
    pub seq: u64,
    /// Monotonic nanoseconds at production time. Comparable only within
    /// this process; never sent to or interpreted by another process.
    pub publish_ts: u64,
    /// Opaque payload bytes.
    pub payload: Bytes,
}

impl Message {
    pub fn new(seq: u64, publish_ts: u64, payload: Bytes) -> Self {
        Self {
            seq,
            publish_ts,
            payload,
        }
    }
}

/// A client-originated acknowledgement of a previously received [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub ack_seq: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_produces_unique_increasing_ids() {
        let alloc = ClientIdAllocator::new();
        assert_eq!(alloc.next("sub"), "sub-0");
        assert_eq!(alloc.next("sub"), "sub-1");
        assert_eq!(alloc.next("other"), "other-2");
    }
}
