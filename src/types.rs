use serde::{Deserialize, Serialize};

/// Opaque ID types for type safety
pub type SessionId = String;
pub type PlayerId = String;
pub type EpochToken = String;

/// Which of the two games a session runs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GameKind {
    /// Prompt Quest: everyone answers, the oracle scores
    Quest,
    /// Spy Among Prompts: hidden imposter, vote to eliminate
    Spy,
}

impl GameKind {
    /// Top-level store namespace for this game
    pub fn root(&self) -> &'static str {
        match self {
            GameKind::Quest => "prompt-quest",
            GameKind::Spy => "spy",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Role {
    Imposter,
    Collaborator,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    Imposter,
    Collaborators,
    /// Quest round winner
    Player(PlayerId),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Lobby,
    Generating,
    AwaitingResponses,
    Voting,
    Scoring,
    Resolved,
    MatchOver,
}

/// A player entry as stored under `players/{id}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    pub name: String,
    /// Milliseconds since the Unix epoch; defines join order
    pub joined_at: i64,
    #[serde(default)]
    pub responded: bool,
    #[serde(default)]
    pub eliminated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

impl PlayerRecord {
    pub fn new(name: impl Into<String>, joined_at: i64) -> Self {
        Self {
            name: name.into(),
            joined_at,
            responded: false,
            eliminated: false,
            role: None,
        }
    }
}

/// A roster member, validated on construction
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub joined_at: i64,
    pub responded: bool,
    pub eliminated: bool,
    pub role: Option<Role>,
}

impl Player {
    /// Build a player from its store key and record.
    /// Returns `None` for an empty id or a blank name.
    pub fn from_record(id: impl Into<PlayerId>, record: PlayerRecord) -> Option<Self> {
        let id = id.into();
        if id.is_empty() || record.name.trim().is_empty() {
            return None;
        }
        Some(Self {
            id,
            name: record.name,
            joined_at: record.joined_at,
            responded: record.responded,
            eliminated: record.eliminated,
            role: record.role,
        })
    }

    pub fn is_alive(&self) -> bool {
        !self.eliminated
    }

    /// Seniority key: earlier join first, id breaks ties
    pub fn seniority(&self) -> (i64, &str) {
        (self.joined_at, self.id.as_str())
    }
}

/// Challenge produced by the content oracle at round start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub base_prompt: String,
    /// Only set for Spy rounds
    pub imposter_prompt: Option<String>,
}

/// Cumulative score line for Quest standings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Standing {
    pub player_id: PlayerId,
    pub name: String,
    pub total: u32,
    pub rounds_won: u32,
}

/// Placeholder written for players who never answered before the phase timed out
pub const NO_RESPONSE: &str = "(no response)";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_record_uses_camel_case() {
        let record = PlayerRecord::new("Alice", 42);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["joinedAt"], 42);
        assert!(json.get("role").is_none());
    }

    #[test]
    fn test_player_record_tolerates_missing_flags() {
        let record: PlayerRecord =
            serde_json::from_value(serde_json::json!({"name": "Bob", "joinedAt": 7})).unwrap();
        assert!(!record.eliminated);
        assert!(!record.responded);
        assert_eq!(record.role, None);
    }

    #[test]
    fn test_player_requires_name() {
        assert!(Player::from_record("p1", PlayerRecord::new("  ", 1)).is_none());
        assert!(Player::from_record("", PlayerRecord::new("Alice", 1)).is_none());
        assert!(Player::from_record("p1", PlayerRecord::new("Alice", 1)).is_some());
    }

    #[test]
    fn test_role_wire_format() {
        assert_eq!(
            serde_json::to_value(Role::Imposter).unwrap(),
            serde_json::json!("Imposter")
        );
        assert_eq!(
            serde_json::to_value(Winner::Player("p2".to_string())).unwrap(),
            serde_json::json!({"player": "p2"})
        );
    }
}
