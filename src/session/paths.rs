//! Store schema for one game session, rooted at `<game>/<sessionId>`.

use crate::types::{GameKind, PlayerId};

/// Characters that cannot appear in a session id (path separators and
/// characters reserved by hosted realtime databases)
const FORBIDDEN_CHARS: &[char] = &['/', '.', '#', '$', '[', ']'];
const MAX_SESSION_ID_LEN: usize = 64;

/// Validate a user supplied session id
pub fn validate_session_id(session_id: &str) -> Result<(), String> {
    let trimmed = session_id.trim();
    if trimmed.is_empty() {
        return Err("Session id cannot be empty".to_string());
    }
    if trimmed.chars().count() > MAX_SESSION_ID_LEN {
        return Err(format!(
            "Session id is longer than {} characters",
            MAX_SESSION_ID_LEN
        ));
    }
    if let Some(c) = trimmed.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        return Err(format!("Session id cannot contain '{}'", c));
    }
    Ok(())
}

/// Path builder for all keys of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    root: String,
}

impl SessionPaths {
    /// Callers validate the session id first
    pub fn new(kind: GameKind, session_id: &str) -> Self {
        Self {
            root: format!("{}/{}", kind.root(), session_id.trim()),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    fn child(&self, key: &str) -> String {
        format!("{}/{}", self.root, key)
    }

    pub fn key(&self, key: SessionKey) -> String {
        self.child(key.as_str())
    }

    pub fn player(&self, id: &PlayerId) -> String {
        self.child(&format!("players/{}", id))
    }

    pub fn personal_prompt(&self, id: &PlayerId) -> String {
        self.child(&format!("personalPrompts/{}", id))
    }

    pub fn response(&self, id: &PlayerId) -> String {
        self.child(&format!("responses/{}", id))
    }

    pub fn vote(&self, voter: &PlayerId) -> String {
        self.child(&format!("votes/{}", voter))
    }

    pub fn score(&self, id: &PlayerId) -> String {
        self.child(&format!("scores/{}", id))
    }

    pub fn history_round(&self, round_id: &str) -> String {
        self.child(&format!("history/{}", round_id))
    }

    /// Single-writer guard for `step` within the given epoch
    pub fn claim(&self, epoch: &str, step: &str) -> String {
        self.child(&format!("claims/{}/{}", epoch, step))
    }
}

/// Top-level keys of a session subtree, each watched separately
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKey {
    Players,
    HostId,
    BasePrompt,
    PersonalPrompts,
    Responses,
    Votes,
    Scores,
    History,
    Eliminated,
    Winner,
    GameOver,
    RoundId,
    MatchId,
    Claims,
}

impl SessionKey {
    /// Keys a peer subscribes to (claims are only ever read one-shot)
    pub const WATCHED: [SessionKey; 13] = [
        SessionKey::MatchId,
        SessionKey::RoundId,
        SessionKey::Players,
        SessionKey::HostId,
        SessionKey::BasePrompt,
        SessionKey::PersonalPrompts,
        SessionKey::Responses,
        SessionKey::Votes,
        SessionKey::Scores,
        SessionKey::History,
        SessionKey::Eliminated,
        SessionKey::Winner,
        SessionKey::GameOver,
    ];

    /// Keys discarded when a new round starts
    pub const ROUND_SCOPED: [SessionKey; 7] = [
        SessionKey::BasePrompt,
        SessionKey::PersonalPrompts,
        SessionKey::Responses,
        SessionKey::Votes,
        SessionKey::Scores,
        SessionKey::Eliminated,
        SessionKey::Winner,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKey::Players => "players",
            SessionKey::HostId => "hostId",
            SessionKey::BasePrompt => "basePrompt",
            SessionKey::PersonalPrompts => "personalPrompts",
            SessionKey::Responses => "responses",
            SessionKey::Votes => "votes",
            SessionKey::Scores => "scores",
            SessionKey::History => "history",
            SessionKey::Eliminated => "eliminated",
            SessionKey::Winner => "winner",
            SessionKey::GameOver => "gameOver",
            SessionKey::RoundId => "roundId",
            SessionKey::MatchId => "matchId",
            SessionKey::Claims => "claims",
        }
    }

    /// Epoch keys are applied before everything else when loading a snapshot
    pub fn is_epoch(&self) -> bool {
        matches!(self, SessionKey::MatchId | SessionKey::RoundId)
    }
}
