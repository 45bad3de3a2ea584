//! Transport adapter: axum WebSocket upgrade to `RawConnection`s handed to
//! the [`SocketWrapper`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::Uri;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use switchboard_core::{ConnectionId, TransportError};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;

use crate::socket::SocketWrapper;

/// Close code used when the peer sent a close frame without a status.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Close code used when the stream ended without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Inbound half of a transport connection.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Wait for the next text frame. Closure surfaces as
    /// [`TransportError::Closed`].
    async fn recv(&mut self) -> Result<String, TransportError>;
}

/// Sender feeding a connection's writer task.
pub type Outbound = mpsc::Sender<String>;

/// The transport handle for one accepted connection.
pub struct RawConnection {
    id: ConnectionId,
    remote: SocketAddr,
    frames: Box<dyn FrameSource>,
    outbound: Outbound,
}

impl RawConnection {
    /// Wrap a freshly accepted connection, minting its identity.
    pub fn new(remote: SocketAddr, frames: Box<dyn FrameSource>, outbound: Outbound) -> Self {
        Self {
            id: ConnectionId::new(),
            remote,
            frames,
            outbound,
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn remote_address(&self) -> SocketAddr {
        self.remote
    }

    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }

    pub async fn recv(&mut self) -> Result<String, TransportError> {
        self.frames.recv().await
    }
}

impl std::fmt::Debug for RawConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawConnection")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

/// Reader half of an axum WebSocket.
struct WsFrames {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameSource for WsFrames {
    async fn recv(&mut self) -> Result<String, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(WsMessage::Text(text))) => return Ok(text.as_str().to_owned()),
                Some(Ok(WsMessage::Close(frame))) => {
                    return Err(match frame {
                        Some(frame) => TransportError::closed(frame.code, frame.reason.as_str()),
                        None => TransportError::closed(CLOSE_NO_STATUS, "no status"),
                    });
                }
                // axum answers pings itself; binary frames are not part of the protocol
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(TransportError::closed(CLOSE_ABNORMAL, e.to_string())),
                None => return Err(TransportError::closed(CLOSE_ABNORMAL, "stream ended")),
            }
        }
    }
}

/// Build the Axum router: `/health` plus a WebSocket upgrade on every other path.
pub fn router(socket: Arc<SocketWrapper>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .fallback(ws_handler)
        .with_state(socket)
        .layer(CorsLayer::permissive())
}

async fn health_handler(State(socket): State<Arc<SocketWrapper>>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "connections": socket.connection_count(),
    }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    uri: Uri,
    State(socket): State<Arc<SocketWrapper>>,
) -> impl IntoResponse {
    let path = uri
        .path_and_query()
        .map_or_else(|| uri.path().to_owned(), |pq| pq.as_str().to_owned());
    ws.on_upgrade(move |ws| accept(ws, remote, path, socket))
}

/// Split an upgraded socket, start its writer, and hand the connection to
/// the wrapper until it ends.
async fn accept(ws: WebSocket, remote: SocketAddr, path: String, socket: Arc<SocketWrapper>) {
    let (sink, stream) = ws.split();
    let config = &socket.app().config;
    let (tx, rx) = mpsc::channel(config.max_send_queue);
    let heartbeat = Duration::from_secs(config.heartbeat_interval_secs.max(1));
    let writer = tokio::spawn(write_frames(sink, rx, heartbeat));

    let raw = RawConnection::new(remote, Box::new(WsFrames { stream }), tx);
    let id = raw.id().clone();
    if let Err(e) = socket.pipe(raw, path).await {
        tracing::warn!(connection = %id, error = %e, "connection terminated");
    }

    // Registry route and raw handle are gone, so the writer drains and exits.
    let _ = writer.await;
}

/// Forward queued frames to the socket, pinging on an interval.
async fn write_frames(
    mut ws_tx: SplitSink<WebSocket, WsMessage>,
    mut rx: mpsc::Receiver<String>,
    heartbeat: Duration,
) {
    let mut ping_interval = tokio::time::interval(heartbeat);
    ping_interval.tick().await; // consume first immediate tick

    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Some(text) => {
                        if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                            return;
                        }
                    }
                    None => break,
                }
            }
            _ = ping_interval.tick() => {
                if ws_tx.send(WsMessage::Ping(Bytes::new())).await.is_err() {
                    return;
                }
                tracing::trace!("sent ping");
            }
        }
    }

    let _ = ws_tx.send(WsMessage::Close(None)).await;
}
