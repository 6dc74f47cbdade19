//! Load-generation client simulator used to exercise fast-vs-slow client
//! workloads by hand against a running `fanout` server: a mix of "fast"
//! clients that ACK immediately and "slow" clients that hold each frame for
//! a configurable delay before ACKing, reproducing the isolation-vs-naive-
//! stall workload that motivates queue mode's disconnect policies.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use fanout_core::{wire, Ack, ConnectionEvent, ConnectionReceiver, ConnectionSender};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "client-sim", author, about = "Fan-out broadcaster load client")]
struct Args {
    /// WebSocket URL of the server to connect to
    #[arg(long, default_value = "ws://127.0.0.1:8765/")]
    url: String,

    /// Number of fast (immediate-ACK) clients to connect
    #[arg(long, default_value_t = 1)]
    fast: u32,

    /// Number of slow clients to connect
    #[arg(long, default_value_t = 0)]
    slow: u32,

    /// Per-frame processing delay simulated by slow clients, in milliseconds
    #[arg(long, default_value_t = 200)]
    slow_delay_ms: u64,

    /// How long to run before disconnecting, in seconds
    #[arg(long, default_value_t = 30)]
    duration_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false).compact())
        .init();

    let args = Args::parse();
    let deadline = Instant::now() + Duration::from_secs(args.duration_secs);

    let mut handles = Vec::new();
    for i in 0..args.fast {
        handles.push(tokio::spawn(run_client(
            args.url.clone(),
            format!("fast-{i}"),
            None,
            deadline,
        )));
    }
    for i in 0..args.slow {
        handles.push(tokio::spawn(run_client(
            args.url.clone(),
            format!("slow-{i}"),
            Some(Duration::from_millis(args.slow_delay_ms)),
            deadline,
        )));
    }

    let mut total_received = 0u64;
    for handle in handles {
        match handle.await {
            Ok(Ok(count)) => total_received += count,
            Ok(Err(e)) => warn!(error = %e, "client exited with an error"),
            Err(e) => warn!(error = %e, "client task panicked"),
        }
    }
    info!(total_received, "load run finished");
    Ok(())
}

/// Connect one client, ACKing every received frame after an optional
/// artificial delay, until `deadline`. Returns the number of frames seen.
async fn run_client(
    url: String,
    label: String,
    processing_delay: Option<Duration>,
    deadline: Instant,
) -> Result<u64> {
    let (sender, mut receiver) = fanout_transport::connect(
        &url,
        Duration::from_secs(20),
        Duration::from_secs(20),
    )
    .await
    .with_context(|| format!("{label}: connecting to {url}"))?;

    let mut received = 0u64;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let event = tokio::time::timeout(remaining, receiver.recv()).await;
        let event = match event {
            Ok(event) => event,
            Err(_) => break,
        };
        match event {
            Some(ConnectionEvent::Data(bytes)) => {
                received += 1;
                if let Some(delay) = processing_delay {
                    tokio::time::sleep(delay).await;
                }
                if let Ok(msg) = wire::decode_message(&bytes) {
                    let ack = wire::encode_ack(Ack { ack_seq: msg.seq });
                    if sender.send(ack).await.is_err() {
                        break;
                    }
                }
            }
            Some(ConnectionEvent::Closed { reason }) => {
                info!(%label, ?reason, "server closed connection");
                break;
            }
            Some(ConnectionEvent::Malformed) | None => break,
        }
    }

    let _ = sender.close().await;
    info!(%label, received, "client finished");
    Ok(received)
}
