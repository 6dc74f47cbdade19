//! Exercises the real `tokio-tungstenite` socket path: a `WebSocketServer`
//! accepting a `Supervisor`-driven session, a client connecting with the
//! crate's own `connect` helper, ACKing frames, and observing the session
//! stay alive and correctly reaped — over a real socket rather than the
//! in-memory double `fanout-core`'s own tests use.

use std::time::Duration;

use fanout_core::{wire, Ack, ConnectionEvent, ConnectionReceiver, ConnectionSender, FanoutConfig};
use fanout_transport::WebSocketServer;

#[tokio::test(flavor = "multi_thread")]
async fn round_trip_over_a_real_socket() {
    let mut config = FanoutConfig::default();
    config.rate = 100.0;
    config.metrics_period = 60.0;
    config.shutdown_grace = 1.0;

    let server = WebSocketServer::bind(
        "127.0.0.1:0",
        config.ping_interval(),
        config.ping_timeout(),
    )
    .await
    .expect("bind to an ephemeral port should succeed");
    let addr = server.local_addr().expect("bound listener has a local addr");

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

    let url = format!("ws://{addr}/");
    let (sender, mut receiver) =
        fanout_transport::connect(&url, Duration::from_secs(30), Duration::from_secs(30))
            .await
            .expect("client should connect");

    // Drain frames from the server and ACK each one.
    let acker = tokio::spawn(async move {
        let mut acked = 0u32;
        while acked < 5 {
            match receiver.recv().await {
                Some(ConnectionEvent::Data(bytes)) => {
                    if let Ok(msg) = wire::decode_message(&bytes) {
                        let ack = wire::encode_ack(Ack { ack_seq: msg.seq });
                        if sender.send(ack).await.is_err() {
                            break;
                        }
                        acked += 1;
                    }
                }
                Some(ConnectionEvent::Closed { .. }) | None => break,
                _ => {}
            }
        }
        acked
    });

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(registry.len(), 1, "the client should have a live session");

    let acked = tokio::time::timeout(Duration::from_secs(5), acker)
        .await
        .expect("acker should finish")
        .expect("acker task should not panic");
    assert!(acked >= 5, "expected at least 5 acked frames, got {acked}");

    let _ = shutdown_tx.send(());
    let _ = tokio::time::timeout(Duration::from_secs(3), run).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn closing_the_client_connection_frees_its_session() {
    let mut config = FanoutConfig::default();
    config.rate = 50.0;
    config.metrics_period = 60.0;
    config.shutdown_grace = 1.0;

    let server = WebSocketServer::bind(
        "127.0.0.1:0",
        config.ping_interval(),
        config.ping_timeout(),
    )
    .await
    .expect("bind to an ephemeral port should succeed");
    let addr = server.local_addr().expect("bound listener has a local addr");

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

    let url = format!("ws://{addr}/");
    let (sender, _receiver) =
        fanout_transport::connect(&url, Duration::from_secs(30), Duration::from_secs(30))
            .await
            .expect("client should connect");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(registry.len(), 1);

    sender.close().await.expect("close should queue a close frame");

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(
        registry.len(),
        0,
        "a client-initiated close should be reaped from the registry"
    );

    let _ = shutdown_tx.send(());
    let _ = tokio::time::timeout(Duration::from_secs(3), run).await;
}
