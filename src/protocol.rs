use crate::session::view::SessionView;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ClientMessage {
    Join {
        game: GameKind,
        session_id: String,
        name: String,
    },
    // Host-only messages
    StartRound,
    NewMatch,
    // Player messages
    SubmitResponse {
        text: String,
    },
    Vote {
        target: PlayerId,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        protocol: String,
        server_now: String,
    },
    Joined {
        player_id: PlayerId,
        session_id: String,
        game: GameKind,
    },
    View(PlayerView),
    Error {
        code: String,
        msg: String,
    },
}

/// A roster entry as one player may see it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerInfo {
    pub id: PlayerId,
    pub name: String,
    pub is_host: bool,
    pub responded: bool,
    pub voted: bool,
    pub eliminated: bool,
    /// Only the player's own role until the match is over
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

/// The session as shown to one player.
///
/// Other players' roles stay hidden until the match is over. In Spy rounds
/// the shared prompt and the answers are only revealed once everybody has
/// answered, and individual votes only once the vote is resolved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerView {
    pub game: GameKind,
    pub phase: Phase,
    pub me: PlayerId,
    pub host_id: Option<PlayerId>,
    pub match_id: Option<EpochToken>,
    pub round_id: Option<EpochToken>,
    pub players: Vec<PlayerInfo>,
    pub my_prompt: Option<String>,
    pub my_role: Option<Role>,
    pub base_prompt: Option<String>,
    pub responses: BTreeMap<PlayerId, String>,
    pub votes: BTreeMap<PlayerId, PlayerId>,
    pub vote_counts: BTreeMap<PlayerId, u32>,
    pub eliminated: Option<PlayerId>,
    pub scores: BTreeMap<PlayerId, u32>,
    pub standings: Vec<Standing>,
    pub winner: Option<Winner>,
    pub game_over: bool,
    pub last_error: Option<String>,
}

impl PlayerView {
    pub fn from_view(view: &SessionView) -> Self {
        let phase = view.phase();
        let host = view.host();
        let reveal_roles = view.game_over;
        let answers_visible = view.kind == GameKind::Quest
            || matches!(
                phase,
                Phase::Voting | Phase::Resolved | Phase::MatchOver
            );
        let votes_visible = matches!(phase, Phase::Resolved | Phase::MatchOver);

        let players = view
            .roster
            .iter()
            .map(|p| PlayerInfo {
                id: p.id.clone(),
                name: p.name.clone(),
                is_host: host == Some(&p.id),
                responded: view.responses.contains_key(&p.id),
                voted: view.votes.contains_key(&p.id),
                eliminated: p.eliminated,
                role: if reveal_roles || p.id == view.me {
                    p.role
                } else {
                    None
                },
            })
            .collect();

        let base_prompt = if view.kind == GameKind::Quest || answers_visible {
            view.base_prompt.clone()
        } else {
            None
        };

        let (votes, vote_counts) = if votes_visible {
            (view.votes.clone(), view.tally().counts)
        } else {
            (BTreeMap::new(), BTreeMap::new())
        };

        Self {
            game: view.kind,
            phase,
            me: view.me.clone(),
            host_id: host.cloned(),
            match_id: view.match_id().cloned(),
            round_id: view.round_id().cloned(),
            players,
            my_prompt: view.my_prompt().cloned(),
            my_role: view.my_role(),
            base_prompt,
            responses: if answers_visible {
                view.responses.clone()
            } else {
                BTreeMap::new()
            },
            votes,
            vote_counts,
            eliminated: view.eliminated.clone(),
            scores: view.scores.clone(),
            standings: if view.kind == GameKind::Quest {
                view.standings()
            } else {
                Vec::new()
            },
            winner: view.winner.clone(),
            game_over: view.game_over,
            last_error: view.last_error.clone(),
        }
    }
}
