use crate::channel::{ChannelSession, ChannelState, OUTBOUND_CAPACITY, Outbox};
use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt, stream::SplitSink};
use tracing::{debug, error, info, warn};
use vdrive_core::{ErrorCode, ServerMessage};

/// WebSocket upgrade handler. Authentication happens in-band with the first message.
pub async fn ws_handler(
    State(state): State<ChannelState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: ChannelState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbox, mut out_rx) = Outbox::channel(OUTBOUND_CAPACITY);
    let mut session = ChannelSession::new(state.clone(), outbox.clone());

    info!("Channel connected: connection={}", session.connection_id());

    let mut heartbeat = tokio::time::interval(state.heartbeat_interval);
    // The first tick completes immediately.
    heartbeat.tick().await;

    // An unauthenticated connection gets one heartbeat interval to send `auth`.
    let handshake_deadline = tokio::time::sleep(state.heartbeat_interval);
    tokio::pin!(handshake_deadline);

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => session.handle_text(text.as_str()),
                    Some(Ok(Message::Binary(_))) => session.handle_binary(),
                    Some(Ok(Message::Ping(data))) => {
                        session.touch();
                        if ws_tx.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => session.touch(),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!("Channel read error on {}: {}", session.connection_id(), e);
                        break;
                    }
                }
            }

            Some(msg) = out_rx.recv() => {
                if !send_json(&mut ws_tx, &msg).await {
                    debug!("Channel write failed on {}", session.connection_id());
                    break;
                }
            }

            _ = outbox.closed() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }

            _ = &mut handshake_deadline, if session.identity().is_none() => {
                warn!("Channel handshake timed out: connection={}", session.connection_id());
                let timeout = ServerMessage::error(ErrorCode::Authentication, "authentication timed out");
                send_json(&mut ws_tx, &timeout).await;
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }

            _ = heartbeat.tick() => {
                if let Some(identity) = session.identity() {
                    if let Some(seen) = state.registry.last_seen(&identity.player_id, session.connection_id()) {
                        debug!(
                            "Heartbeat to {}, last seen {}ms ago",
                            session.connection_id(),
                            Utc::now().timestamp_millis() - seen
                        );
                    }
                    let ping = ServerMessage::Ping { server_time: Utc::now().timestamp_millis() };
                    if !send_json(&mut ws_tx, &ping).await {
                        break;
                    }
                }
            }
        }
    }

    info!("Channel disconnected: connection={}", session.connection_id());
}

/// Encode and write one message. Returns `false` once the socket is unusable.
async fn send_json(ws_tx: &mut SplitSink<WebSocket, Message>, msg: &ServerMessage) -> bool {
    match msg.to_json() {
        Ok(json) => ws_tx.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            error!("Failed to encode channel message: {}", e);
            true
        }
    }
}

/// Routes for the real-time channel
pub fn channel_routes(state: ChannelState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
}
