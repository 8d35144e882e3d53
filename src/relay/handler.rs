//! WebSocket endpoint for the agent
//!
//! The agent connects to `/ws/agent?token=<secret>`. Rejected connections are
//! upgraded and immediately closed with code 4003 so the agent sees the reason.

use super::admission::{client_ip, Rejection, CLOSE_FORBIDDEN};
use super::connection::ConnectionManager;
use crate::protocol::Frame;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Frames buffered for the socket writer before pushes wait
const OUTBOUND_CAPACITY: usize = 64;

/// Router exposing the agent WebSocket endpoint
pub fn agent_router(connections: Arc<ConnectionManager>) -> Router {
    Router::new()
        .route("/ws/agent", get(ws_agent_upgrade))
        .with_state(connections)
}

#[derive(Debug, Deserialize)]
struct AgentQuery {
    token: Option<String>,
}

async fn ws_agent_upgrade(
    ws: WebSocketUpgrade,
    Query(query): Query<AgentQuery>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    State(connections): State<Arc<ConnectionManager>>,
) -> impl IntoResponse {
    let forwarded_for = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok());
    let peer = client_ip(forwarded_for, connect_info.map(|ConnectInfo(addr)| addr));
    let admission = connections.accept(&peer, query.token.as_deref());

    ws.on_upgrade(move |socket| handle_agent_ws(socket, peer, admission, connections))
}

async fn handle_agent_ws(
    mut socket: WebSocket,
    peer: String,
    admission: Result<(), Rejection>,
    connections: Arc<ConnectionManager>,
) {
    if let Err(rejection) = admission {
        let close = Message::Close(Some(CloseFrame {
            code: CLOSE_FORBIDDEN,
            reason: rejection.close_reason().into(),
        }));
        let _ = socket.send(close).await;
        return;
    }

    let (mut ws_sender, ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Frame>(OUTBOUND_CAPACITY);

    // The writer must be draining before attach flushes the backlog
    let writer_peer = peer.clone();
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender.send(Message::Text(frame.to_text())).await.is_err() {
                tracing::debug!(peer = %writer_peer, "Agent WebSocket send failed");
                break;
            }
        }
    });

    let session_id = connections.attach(&peer, tx.clone()).await;
    connections.receive_loop(&session_id, ws_receiver, tx).await;

    send_task.abort();
}
