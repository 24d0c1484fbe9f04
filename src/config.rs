use crate::types::GameKind;
use std::time::Duration;

/// Tunables for session coordination
#[derive(Debug, Clone, PartialEq)]
pub struct GameConfig {
    /// Players needed to start a Spy match
    pub spy_min_players: usize,
    /// Living players needed to start another Spy round
    pub spy_min_alive: usize,
    /// Players needed to start a Quest round
    pub quest_min_players: usize,
    /// Scored rounds per Quest match
    pub quest_rounds_per_match: usize,
    /// Host starts the next Spy round right after a non-final elimination
    pub auto_next_round: bool,
    pub max_response_chars: usize,
    pub max_name_chars: usize,
    /// Fill or resolve a phase that stalls longer than this
    pub phase_timeout: Option<Duration>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            spy_min_players: 4,
            spy_min_alive: 3,
            quest_min_players: 2,
            quest_rounds_per_match: 3,
            auto_next_round: true,
            max_response_chars: 500,
            max_name_chars: 24,
            phase_timeout: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

impl GameConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        // At least three players are needed for a vote to mean anything
        let spy_min_alive = env_parse("SPY_MIN_ALIVE")
            .unwrap_or(defaults.spy_min_alive)
            .max(3);

        Self {
            spy_min_players: env_parse("SPY_MIN_PLAYERS")
                .unwrap_or(defaults.spy_min_players)
                .max(spy_min_alive),
            spy_min_alive,
            quest_min_players: env_parse("QUEST_MIN_PLAYERS")
                .unwrap_or(defaults.quest_min_players)
                .max(1),
            quest_rounds_per_match: env_parse("QUEST_ROUNDS_PER_MATCH")
                .unwrap_or(defaults.quest_rounds_per_match)
                .max(1),
            auto_next_round: env_parse("AUTO_NEXT_ROUND").unwrap_or(defaults.auto_next_round),
            max_response_chars: env_parse("MAX_RESPONSE_CHARS")
                .unwrap_or(defaults.max_response_chars),
            max_name_chars: env_parse("MAX_NAME_CHARS").unwrap_or(defaults.max_name_chars),
            phase_timeout: env_parse::<u64>("PHASE_TIMEOUT_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        }
    }

    /// Minimum roster size for the next round of a game
    pub fn min_players(&self, kind: GameKind, roles_assigned: bool) -> usize {
        match kind {
            GameKind::Quest => self.quest_min_players,
            GameKind::Spy if roles_assigned => self.spy_min_alive,
            GameKind::Spy => self.spy_min_players,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "SPY_MIN_PLAYERS",
        "SPY_MIN_ALIVE",
        "QUEST_MIN_PLAYERS",
        "QUEST_ROUNDS_PER_MATCH",
        "AUTO_NEXT_ROUND",
        "MAX_RESPONSE_CHARS",
        "MAX_NAME_CHARS",
        "PHASE_TIMEOUT_SECS",
    ];

    fn clear_env() {
        for key in KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_without_env() {
        clear_env();
        assert_eq!(GameConfig::from_env(), GameConfig::default());
    }

    #[test]
    #[serial]
    fn test_reads_env() {
        clear_env();
        std::env::set_var("QUEST_ROUNDS_PER_MATCH", "5");
        std::env::set_var("PHASE_TIMEOUT_SECS", "90");
        std::env::set_var("AUTO_NEXT_ROUND", "false");

        let config = GameConfig::from_env();
        assert_eq!(config.quest_rounds_per_match, 5);
        assert_eq!(config.phase_timeout, Some(Duration::from_secs(90)));
        assert!(!config.auto_next_round);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_values_fall_back() {
        clear_env();
        std::env::set_var("SPY_MIN_ALIVE", "1");
        std::env::set_var("QUEST_MIN_PLAYERS", "lots");
        std::env::set_var("PHASE_TIMEOUT_SECS", "0");

        let config = GameConfig::from_env();
        assert_eq!(config.spy_min_alive, 3);
        assert_eq!(config.quest_min_players, 2);
        assert_eq!(config.phase_timeout, None);
        clear_env();
    }

    #[test]
    fn test_min_players() {
        let config = GameConfig::default();
        assert_eq!(config.min_players(GameKind::Spy, false), 4);
        assert_eq!(config.min_players(GameKind::Spy, true), 3);
        assert_eq!(config.min_players(GameKind::Quest, false), 2);
    }
}
