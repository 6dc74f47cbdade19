//! Ten connected sessions, shutdown signal received. Every session reaches
//! Closed within shutdown_grace + epsilon, and no session remains in the
//! Registry.

mod common;

use async_trait::async_trait;
use fanout_core::{ConnectionServer, FanoutConfig, SupervisorError};
use std::time::Duration;

struct QueueServer {
    pending: Vec<common::MemoryConnection>,
}

#[async_trait]
impl ConnectionServer for QueueServer {
    type Sender = common::MemorySender;
    type Receiver = common::MemoryReceiver;

    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, String), SupervisorError> {
        match self.pending.pop() {
            Some(conn) => Ok((conn.sender, conn.receiver, "client".to_string())),
            None => std::future::pending().await,
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn graceful_shutdown_closes_every_session() {
    let mut pending = Vec::new();
    for _ in 0..10 {
        pending.push(common::memory_connection(32));
    }
    let server = QueueServer { pending };

    let mut config = FanoutConfig::default();
    config.rate = 50.0;
    config.shutdown_grace = 1.0;
    config.metrics_period = 60.0;

    let supervisor = fanout_core::Supervisor::new(config);
    let registry = supervisor.registry();

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    let run = tokio::spawn(async move {
        supervisor
            .run(server, async {
                let _ = shutdown_rx.await;
            })
            .await;
    });

    // Give the accept loop a moment to drain all ten pending connections.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(registry.len(), 10);

    let _ = shutdown_tx.send(());

    let result = tokio::time::timeout(Duration::from_secs(3), run).await;
    assert!(result.is_ok(), "supervisor did not shut down within grace + epsilon");

    assert_eq!(registry.len(), 0, "no session should remain in the registry");
}
