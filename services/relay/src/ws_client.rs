//! Websocket endpoint for streaming clients.
//!
//! Each accepted socket is registered with the [`relay_core::ClientConnector`]
//! and then driven by three concurrent branches:
//! - a writer draining the connection's outbox into the socket, each send
//!   bounded by `send_timeout`
//! - a reader discarding inbound frames (keep-alive only) until close
//! - a watch on the connection state, which fires if the broadcaster evicts it
//!
//! Whichever finishes first ends the session and decides how it is
//! deregistered.

use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use relay_core::{FeedMessage, Outbox};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, trace};

/// Upper bound on the courtesy close frame sent to an evicted client.
const CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

pub async fn ws_client_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_client_socket(socket, state, peer))
}

#[derive(Debug)]
enum SessionEnd {
    ClientClosed,
    ReadError(axum::Error),
    SendFailed(String),
    Evicted,
}

async fn handle_client_socket(socket: WebSocket, state: AppState, peer: SocketAddr) {
    let (conn, mut outbox) = state.connector.on_connect_opened(Some(peer));
    let (mut sink, mut stream) = socket.split();

    let end = tokio::select! {
        end = write_loop(&mut sink, &mut outbox, state.send_timeout) => end,
        end = read_loop(&mut stream) => end,
        () = conn.deregistered() => SessionEnd::Evicted,
    };

    match end {
        SessionEnd::ClientClosed => {
            state.connector.on_connect_closed(&conn);
        }
        SessionEnd::ReadError(e) => {
            debug!(conn_id = %conn.id(), error = %e, "client read error");
            state.connector.on_connect_closed(&conn);
        }
        SessionEnd::SendFailed(reason) => {
            state.connector.on_send_failure(&conn, reason);
        }
        SessionEnd::Evicted => {
            debug!(conn_id = %conn.id(), "closing evicted client");
            let _ = timeout(CLOSE_TIMEOUT, sink.send(Message::Close(None))).await;
        }
    }
}

async fn write_loop(
    sink: &mut SplitSink<WebSocket, Message>,
    outbox: &mut Outbox,
    send_timeout: Duration,
) -> SessionEnd {
    while let Some(msg) = outbox.recv().await {
        match timeout(send_timeout, sink.send(to_frame(&msg))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return SessionEnd::SendFailed(e.to_string()),
            Err(_) => {
                return SessionEnd::SendFailed(format!(
                    "send timed out after {}ms",
                    send_timeout.as_millis()
                ));
            }
        }
    }
    SessionEnd::Evicted
}

async fn read_loop(stream: &mut SplitStream<WebSocket>) -> SessionEnd {
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Close(_)) => return SessionEnd::ClientClosed,
            Ok(_) => trace!("client keep-alive"),
            Err(e) => return SessionEnd::ReadError(e),
        }
    }
    SessionEnd::ClientClosed
}

/// Payloads go out verbatim: text frames for UTF-8, binary otherwise.
fn to_frame(msg: &FeedMessage) -> Message {
    match msg.as_text() {
        Some(text) => Message::Text(text.into()),
        None => Message::Binary(msg.payload().clone()),
    }
}
