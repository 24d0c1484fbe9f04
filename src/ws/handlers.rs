//! WebSocket message dispatch
//!
//! A connection holds at most one [`Peer`]. `join` creates it; every other
//! message is forwarded to it. Authorization and phase checks happen inside
//! the peer, failures come back as `error` messages.

use crate::protocol::{ClientMessage, ServerMessage};
use crate::session::{GameError, Peer};
use crate::state::AppState;
use std::sync::Arc;

fn error(code: &str, msg: impl Into<String>) -> ServerMessage {
    ServerMessage::Error {
        code: code.to_string(),
        msg: msg.into(),
    }
}

impl From<GameError> for ServerMessage {
    fn from(e: GameError) -> Self {
        error(e.code(), e.to_string())
    }
}

/// Handle client messages and return optional response. Successful game
/// actions answer with nothing; the resulting view update follows.
pub async fn handle_message(
    msg: ClientMessage,
    peer: &mut Option<Peer>,
    state: &Arc<AppState>,
) -> Option<ServerMessage> {
    match msg {
        ClientMessage::Join {
            game,
            session_id,
            name,
        } => {
            if peer.is_some() {
                return Some(error("ALREADY_JOINED", "This connection already joined a session"));
            }
            tracing::info!("Join request for {:?} session {}", game, session_id);
            match state.join_peer(game, &session_id, &name).await {
                Ok(joined) => {
                    let reply = ServerMessage::Joined {
                        player_id: joined.id().clone(),
                        session_id: session_id.trim().to_string(),
                        game,
                    };
                    *peer = Some(joined);
                    Some(reply)
                }
                Err(e) => Some(e.into()),
            }
        }
        action => match peer.as_ref() {
            Some(peer) => perform(peer, action).await.err().map(ServerMessage::from),
            None => Some(error("NOT_JOINED", "Join a session first")),
        },
    }
}

async fn perform(peer: &Peer, action: ClientMessage) -> Result<(), GameError> {
    match action {
        // Host-only messages
        ClientMessage::StartRound => peer.start_round().await,
        ClientMessage::NewMatch => peer.new_match().await,
        // Player messages
        ClientMessage::SubmitResponse { text } => peer.submit_response(&text).await,
        ClientMessage::Vote { target } => peer.cast_vote(&target).await,
        ClientMessage::Join { .. } => Err(GameError::InvalidInput("Already joined".to_string())),
    }
}
