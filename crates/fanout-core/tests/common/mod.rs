//! In-memory `Connection` double used by integration tests so the engine
//! can be exercised end to end without a real socket.

use async_trait::async_trait;
use bytes::Bytes;
use fanout_core::{ConnectionEvent, ConnectionReceiver, ConnectionSender, SessionError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct MemorySender {
    tx: mpsc::Sender<Bytes>,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl ConnectionSender for MemorySender {
    async fn send(&self, data: Bytes) -> Result<(), SessionError> {
        self.tx
            .send(data)
            .await
            .map_err(|_| SessionError::ConnectionClosed)
    }

    fn try_send(&self, data: Bytes) -> Result<(), SessionError> {
        self.tx
            .try_send(data)
            .map_err(|_| SessionError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.connected.store(false, Ordering::Relaxed);
        Ok(())
    }
}

pub struct MemoryReceiver {
    rx: mpsc::Receiver<ConnectionEvent>,
}

#[async_trait]
impl ConnectionReceiver for MemoryReceiver {
    async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.rx.recv().await
    }
}

/// A paired in-memory connection plus handles the test keeps to drive the
/// "client" side: `outbound` drains what the server sent, `inbound` feeds
/// events (e.g. ACKs) as if the client sent them.
pub struct MemoryConnection {
    pub sender: MemorySender,
    pub receiver: MemoryReceiver,
    pub outbound: mpsc::Receiver<Bytes>,
    pub inbound: mpsc::Sender<ConnectionEvent>,
}

pub fn memory_connection(buffer: usize) -> MemoryConnection {
    let (out_tx, out_rx) = mpsc::channel(buffer);
    let (in_tx, in_rx) = mpsc::channel(buffer);
    MemoryConnection {
        sender: MemorySender {
            tx: out_tx,
            connected: Arc::new(AtomicBool::new(true)),
        },
        receiver: MemoryReceiver { rx: in_rx },
        outbound: out_rx,
        inbound: in_tx,
    }
}
