pub mod handlers;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::SplitSink, stream::StreamExt};
use std::sync::Arc;
use tokio::sync::watch;

use crate::protocol::{ClientMessage, PlayerView, ServerMessage};
use crate::session::view::SessionView;
use crate::session::Peer;
use crate::state::AppState;

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    tracing::info!("WebSocket connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

type Sender = SplitSink<WebSocket, Message>;

/// Serialize and send one message. Returns false once the socket is gone.
async fn send(sender: &mut Sender, msg: &ServerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::error!("Failed to serialize server message: {}", e);
            true
        }
    }
}

fn view_message(rx: &mut watch::Receiver<SessionView>) -> ServerMessage {
    ServerMessage::View(PlayerView::from_view(&rx.borrow_and_update()))
}

/// Handle individual WebSocket connection. The connection owns its peer;
/// closing the socket drops it and stops its background tasks.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let welcome = ServerMessage::Welcome {
        protocol: "1.0".to_string(),
        server_now: chrono::Utc::now().to_rfc3339(),
    };
    if !send(&mut sender, &welcome).await {
        tracing::error!("Failed to send welcome message");
        return;
    }

    let mut peer: Option<Peer> = None;
    let mut view_rx: Option<watch::Receiver<SessionView>> = None;

    loop {
        tokio::select! {
            // Forward local view updates once joined
            changed = async {
                match &mut view_rx {
                    Some(rx) => rx.changed().await.is_ok(),
                    None => std::future::pending::<bool>().await,
                }
            } => {
                let Some(rx) = view_rx.as_mut().filter(|_| changed) else {
                    tracing::warn!("View channel closed");
                    break;
                };
                if !send(&mut sender, &view_message(rx)).await {
                    break;
                }
            }

            // Handle client messages
            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!("Received message: {}", text);

                        let response = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => {
                                handlers::handle_message(client_msg, &mut peer, &state).await
                            }
                            Err(e) => {
                                tracing::error!("Failed to parse client message: {}", e);
                                Some(ServerMessage::Error {
                                    code: "PARSE_ERROR".to_string(),
                                    msg: format!("Invalid message format: {}", e),
                                })
                            }
                        };
                        if let Some(response) = response {
                            if !send(&mut sender, &response).await {
                                tracing::error!("Failed to send response");
                                break;
                            }
                        }

                        // First view goes out right after `joined`
                        if let (None, Some(joined)) = (&view_rx, &peer) {
                            let mut rx = joined.subscribe();
                            if !send(&mut sender, &view_message(&mut rx)).await {
                                break;
                            }
                            view_rx = Some(rx);
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("WebSocket closed");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    match &peer {
        Some(peer) => tracing::info!("WebSocket connection closed for player {}", peer.id()),
        None => tracing::info!("WebSocket connection closed before joining"),
    }
}
