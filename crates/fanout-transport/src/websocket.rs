//! WebSocket implementation of `fanout-core`'s `ConnectionSender` /
//! `ConnectionReceiver` / `ConnectionServer` traits.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fanout_core::{ConnectionEvent, ConnectionReceiver, ConnectionSender, ConnectionServer, SessionError, SupervisorError};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{
    handshake::server::{Request as HsRequest, Response as HsResponse},
    protocol::Message as WsMessage,
};
use tracing::{debug, error, info, warn};

use crate::error::TransportError;

pub const SUBPROTOCOL: &str = "fanout.v1";

/// Channel buffer between the socket I/O tasks and the engine. Sized well
/// above any single session's `maxsize` so the transport layer is never the
/// bottleneck the dispatcher's own queue already models.
const CHANNEL_BUFFER_SIZE: usize = 1024;

pub struct WebSocketSender {
    tx: mpsc::Sender<WsMessage>,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl ConnectionSender for WebSocketSender {
    async fn send(&self, data: Bytes) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::ConnectionClosed);
        }
        let text = String::from_utf8_lossy(&data).into_owned();
        self.tx
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| SessionError::SendFailed(e.to_string()))
    }

    fn try_send(&self, data: Bytes) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::ConnectionClosed);
        }
        let text = String::from_utf8_lossy(&data).into_owned();
        self.tx
            .try_send(WsMessage::Text(text))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SessionError::SendTimeout,
                mpsc::error::TrySendError::Closed(_) => SessionError::ConnectionClosed,
            })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn close(&self) -> Result<(), SessionError> {
        let _ = self.tx.send(WsMessage::Close(None)).await;
        self.connected.store(false, Ordering::Relaxed);
        Ok(())
    }
}

pub struct WebSocketReceiver {
    rx: mpsc::Receiver<ConnectionEvent>,
}

#[async_trait]
impl ConnectionReceiver for WebSocketReceiver {
    async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.rx.recv().await
    }
}

/// Split a handshaken WebSocket stream into the engine's sender/receiver
/// pair, spawning the writer, reader, and ping-keepalive tasks.
fn spawn_io<S>(
    ws_stream: tokio_tungstenite::WebSocketStream<S>,
    ping_interval: Duration,
    ping_timeout: Duration,
) -> (WebSocketSender, WebSocketReceiver)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (mut write, mut read) = ws_stream.split();

    let (send_tx, mut send_rx) = mpsc::channel::<WsMessage>(CHANNEL_BUFFER_SIZE);
    let (event_tx, event_rx) = mpsc::channel::<ConnectionEvent>(CHANNEL_BUFFER_SIZE);

    let connected = Arc::new(AtomicBool::new(true));
    let awaiting_pong = Arc::new(AtomicBool::new(false));

    // Writer: drains outbound frames plus periodic pings.
    let connected_write = Arc::clone(&connected);
    let awaiting_pong_write = Arc::clone(&awaiting_pong);
    let ping_tx = send_tx.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ping_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            awaiting_pong_write.store(true, Ordering::Relaxed);
            if ping_tx.send(WsMessage::Ping(Vec::new())).await.is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        while let Some(msg) = send_rx.recv().await {
            if let Err(e) = write.send(msg).await {
                error!(error = %e, "websocket write error");
                break;
            }
        }
        connected_write.store(false, Ordering::Relaxed);
    });

    // Reader: decodes frames, tracks pong liveness, enforces ping-timeout.
    // Splitting the stream means tungstenite can no longer auto-answer
    // pings on our behalf, so pongs are queued through `send_tx` by hand.
    let event_tx_reader = event_tx.clone();
    let connected_read = Arc::clone(&connected);
    let awaiting_pong_read = Arc::clone(&awaiting_pong);
    let pong_tx = send_tx.clone();
    tokio::spawn(async move {
        let timeout_check = tokio::time::sleep(ping_timeout);
        tokio::pin!(timeout_check);
        loop {
            tokio::select! {
                frame = read.next() => {
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            let _ = event_tx_reader
                                .send(ConnectionEvent::Data(Bytes::from(text.into_bytes())))
                                .await;
                        }
                        Some(Ok(WsMessage::Binary(data))) => {
                            let _ = event_tx_reader.send(ConnectionEvent::Data(Bytes::from(data))).await;
                        }
                        Some(Ok(WsMessage::Pong(_))) => {
                            awaiting_pong_read.store(false, Ordering::Relaxed);
                            timeout_check.as_mut().reset(tokio::time::Instant::now() + ping_timeout);
                        }
                        Some(Ok(WsMessage::Ping(data))) => {
                            let _ = pong_tx.send(WsMessage::Pong(data)).await;
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            let reason = frame.map(|f| f.reason.to_string());
                            info!(?reason, "websocket closed by peer");
                            let _ = event_tx_reader.send(ConnectionEvent::Closed { reason }).await;
                            break;
                        }
                        Some(Ok(WsMessage::Frame(_))) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "websocket read error");
                            let _ = event_tx_reader
                                .send(ConnectionEvent::Closed { reason: Some(e.to_string()) })
                                .await;
                            break;
                        }
                        None => {
                            let _ = event_tx_reader.send(ConnectionEvent::Closed { reason: None }).await;
                            break;
                        }
                    }
                }
                _ = &mut timeout_check => {
                    if awaiting_pong_read.load(Ordering::Relaxed) {
                        warn!("ping timeout elapsed without a pong");
                        let _ = event_tx_reader
                            .send(ConnectionEvent::Closed { reason: Some("ping_timeout".to_string()) })
                            .await;
                        break;
                    }
                    timeout_check.as_mut().reset(tokio::time::Instant::now() + ping_timeout);
                }
            }
        }
        connected_read.store(false, Ordering::Relaxed);
    });

    (
        WebSocketSender { tx: send_tx, connected },
        WebSocketReceiver { rx: event_rx },
    )
}

/// Accepts TCP connections and upgrades them to WebSocket, negotiating the
/// fan-out subprotocol and wiring up ping/pong keepalive per `Session`.
pub struct WebSocketServer {
    listener: TcpListener,
    ping_interval: Duration,
    ping_timeout: Duration,
}

impl WebSocketServer {
    pub async fn bind(addr: &str, ping_interval: Duration, ping_timeout: Duration) -> Result<Self, SupervisorError> {
        let socket_addr: SocketAddr = addr
            .parse()
            .map_err(|e: std::net::AddrParseError| SupervisorError::AcceptLoop(e.to_string()))?;
        let listener = TcpListener::bind(socket_addr)
            .await
            .map_err(|source| SupervisorError::Bind { addr: addr.to_string(), source })?;
        info!(%addr, "websocket server listening");
        Ok(Self { listener, ping_interval, ping_timeout })
    }

    /// The bound address, including the kernel-assigned port when the
    /// server was bound to port 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

#[async_trait]
impl ConnectionServer for WebSocketServer {
    type Sender = WebSocketSender;
    type Receiver = WebSocketReceiver;

    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, String), SupervisorError> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| SupervisorError::AcceptLoop(e.to_string()))?;
        debug!(%addr, "accepted tcp connection");

        let prefix = Arc::new(parking_lot::Mutex::new(None));
        let prefix_write = Arc::clone(&prefix);
        let ws_stream = tokio_tungstenite::accept_hdr_async(
            stream,
            move |req: &HsRequest, mut response: HsResponse| {
                if let Some(protocols) = req.headers().get("Sec-WebSocket-Protocol") {
                    if let Ok(protocols_str) = protocols.to_str() {
                        let requested: Vec<&str> =
                            protocols_str.split(',').map(|s| s.trim()).collect();
                        if requested.contains(&SUBPROTOCOL) {
                            response
                                .headers_mut()
                                .insert("Sec-WebSocket-Protocol", SUBPROTOCOL.parse().unwrap());
                        }
                    }
                }
                if let Some(id_prefix) = req.headers().get("X-Fanout-Client-Prefix") {
                    if let Ok(s) = id_prefix.to_str() {
                        *prefix_write.lock() = Some(s.to_string());
                    }
                }
                Ok(response)
            },
        )
        .await
        .map_err(|e| TransportError::HandshakeFailed(e.to_string()))?;

        let prefix = prefix.lock().clone().unwrap_or_else(|| "client".to_string());
        info!(%addr, %prefix, "websocket client connected");
        let (sender, receiver) = spawn_io(ws_stream, self.ping_interval, self.ping_timeout);
        Ok((sender, receiver, prefix))
    }
}

/// Client-side connector, used by `demos/client-sim` to open load-test
/// connections against a running server.
pub async fn connect(
    url: &str,
    ping_interval: Duration,
    ping_timeout: Duration,
) -> Result<(WebSocketSender, WebSocketReceiver), TransportError> {
    use tokio_tungstenite::tungstenite::handshake::client::generate_key;
    use tokio_tungstenite::tungstenite::http::Request;

    let parsed = url::Url::parse(url).map_err(|e| TransportError::AcceptFailed(e.to_string()))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| TransportError::AcceptFailed("missing host in url".to_string()))?;
    let host_header = match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let request = Request::builder()
        .method("GET")
        .uri(url)
        .header("Host", host_header)
        .header("Upgrade", "websocket")
        .header("Connection", "Upgrade")
        .header("Sec-WebSocket-Key", generate_key())
        .header("Sec-WebSocket-Version", "13")
        .header("Sec-WebSocket-Protocol", SUBPROTOCOL)
        .body(())
        .map_err(|e| TransportError::AcceptFailed(e.to_string()))?;

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| TransportError::AcceptFailed(e.to_string()))?;

    Ok(spawn_io(ws_stream, ping_interval, ping_timeout))
}
