//! Local projection of a session and the reducer that maintains it.
//!
//! Every store notification is decoded into a [`SessionEvent`] and folded
//! into a [`SessionView`]. The game phase is never stored; it is derived
//! from the projection so all peers that see the same data agree on it.

use super::epoch::{EpochChange, EpochTracker};
use super::host;
use super::paths::SessionKey;
use super::score;
use super::vote::{self, VoteTally};
use crate::types::*;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;

/// Decoded store notification
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Players(Vec<Player>),
    HostId(Option<PlayerId>),
    BasePrompt(Option<String>),
    PersonalPrompts(BTreeMap<PlayerId, String>),
    Responses(BTreeMap<PlayerId, String>),
    Votes(BTreeMap<PlayerId, PlayerId>),
    Scores(BTreeMap<PlayerId, u32>),
    History(BTreeMap<EpochToken, BTreeMap<PlayerId, u32>>),
    Eliminated(Option<PlayerId>),
    Winner(Option<Winner>),
    GameOver(bool),
    RoundId(Option<EpochToken>),
    MatchId(Option<EpochToken>),
}

/// Decode an object entry by entry, skipping malformed children
fn decode_map<T: DeserializeOwned>(key: SessionKey, value: Option<Value>) -> BTreeMap<String, T> {
    let mut out = BTreeMap::new();
    match value {
        Some(Value::Object(map)) => {
            for (k, v) in map {
                match serde_json::from_value(v) {
                    Ok(item) => {
                        out.insert(k, item);
                    }
                    Err(e) => {
                        tracing::warn!("Ignoring malformed {} entry {}: {}", key.as_str(), k, e)
                    }
                }
            }
        }
        Some(other) => {
            tracing::warn!("Expected object at {}, got {}", key.as_str(), other)
        }
        None => {}
    }
    out
}

fn decode_value<T: DeserializeOwned>(key: SessionKey, value: Option<Value>) -> Option<T> {
    let value = value?;
    match serde_json::from_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("Ignoring malformed {}: {}", key.as_str(), e);
            None
        }
    }
}

/// Sort a roster into join order
pub fn sort_roster(roster: &mut [Player]) {
    roster.sort_by(|a, b| a.seniority().cmp(&b.seniority()));
}

impl SessionEvent {
    /// Decode the value of one watched key. Returns `None` for keys that
    /// have no projection.
    pub fn decode(key: SessionKey, value: Option<Value>) -> Option<Self> {
        let event = match key {
            SessionKey::Players => {
                let records: BTreeMap<PlayerId, PlayerRecord> = decode_map(key, value);
                let mut roster: Vec<Player> = records
                    .into_iter()
                    .filter_map(|(id, record)| Player::from_record(id, record))
                    .collect();
                sort_roster(&mut roster);
                SessionEvent::Players(roster)
            }
            SessionKey::HostId => SessionEvent::HostId(decode_value(key, value)),
            SessionKey::BasePrompt => SessionEvent::BasePrompt(
                decode_value::<String>(key, value).filter(|p| !p.trim().is_empty()),
            ),
            SessionKey::PersonalPrompts => SessionEvent::PersonalPrompts(decode_map(key, value)),
            SessionKey::Responses => SessionEvent::Responses(decode_map(key, value)),
            SessionKey::Votes => SessionEvent::Votes(decode_map(key, value)),
            SessionKey::Scores => SessionEvent::Scores(decode_map(key, value)),
            SessionKey::History => {
                let rounds: BTreeMap<EpochToken, Value> = decode_map(key, value);
                SessionEvent::History(
                    rounds
                        .into_iter()
                        .map(|(round, scores)| (round, decode_map(key, Some(scores))))
                        .collect(),
                )
            }
            SessionKey::Eliminated => SessionEvent::Eliminated(decode_value(key, value)),
            SessionKey::Winner => SessionEvent::Winner(decode_value(key, value)),
            SessionKey::GameOver => {
                SessionEvent::GameOver(decode_value(key, value).unwrap_or(false))
            }
            SessionKey::RoundId => SessionEvent::RoundId(decode_value(key, value)),
            SessionKey::MatchId => SessionEvent::MatchId(decode_value(key, value)),
            SessionKey::Claims => return None,
        };
        Some(event)
    }

    /// Events for a whole session subtree, epochs first
    pub fn from_snapshot(snapshot: Option<&Value>) -> Vec<Self> {
        let object = snapshot.and_then(Value::as_object);
        let (epochs, rest): (Vec<SessionKey>, Vec<SessionKey>) =
            SessionKey::WATCHED.into_iter().partition(SessionKey::is_epoch);
        epochs
            .into_iter()
            .chain(rest)
            .filter_map(|key| {
                let value = object.and_then(|o| o.get(key.as_str())).cloned();
                Self::decode(key, value)
            })
            .collect()
    }
}

/// Effect of applying one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Updated,
    /// Duplicate epoch notification
    Ignored,
    /// Round-scoped state was discarded
    RoundReset,
    /// Round- and match-scoped state was discarded
    MatchReset,
}

impl Applied {
    pub fn is_reset(&self) -> bool {
        matches!(self, Applied::RoundReset | Applied::MatchReset)
    }
}

/// One peer's projection of the shared session state
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub kind: GameKind,
    pub me: PlayerId,
    pub roster: Vec<Player>,
    pub host_id: Option<PlayerId>,
    pub base_prompt: Option<String>,
    pub personal_prompts: BTreeMap<PlayerId, String>,
    pub responses: BTreeMap<PlayerId, String>,
    pub votes: BTreeMap<PlayerId, PlayerId>,
    pub scores: BTreeMap<PlayerId, u32>,
    pub history: BTreeMap<EpochToken, BTreeMap<PlayerId, u32>>,
    pub eliminated: Option<PlayerId>,
    pub winner: Option<Winner>,
    pub game_over: bool,
    /// Local only: this peer is waiting on the content oracle
    pub generating: bool,
    /// Local only: last failed action, for inline display
    pub last_error: Option<String>,
    epochs: EpochTracker,
}

/// Functional form of [`SessionView::apply`]
pub fn reduce(mut view: SessionView, event: SessionEvent) -> SessionView {
    view.apply(event);
    view
}

impl SessionView {
    pub fn new(kind: GameKind, me: impl Into<PlayerId>) -> Self {
        Self {
            kind,
            me: me.into(),
            roster: Vec::new(),
            host_id: None,
            base_prompt: None,
            personal_prompts: BTreeMap::new(),
            responses: BTreeMap::new(),
            votes: BTreeMap::new(),
            scores: BTreeMap::new(),
            history: BTreeMap::new(),
            eliminated: None,
            winner: None,
            game_over: false,
            generating: false,
            last_error: None,
            epochs: EpochTracker::new(),
        }
    }

    /// Build a view from a one-shot read of the session root
    pub fn from_snapshot(kind: GameKind, me: impl Into<PlayerId>, snapshot: Option<&Value>) -> Self {
        let mut view = Self::new(kind, me);
        view.apply_all(SessionEvent::from_snapshot(snapshot));
        view
    }

    pub fn apply_all(&mut self, events: impl IntoIterator<Item = SessionEvent>) {
        for event in events {
            self.apply(event);
        }
    }

    /// Fold one event into the projection
    pub fn apply(&mut self, event: SessionEvent) -> Applied {
        match event {
            SessionEvent::RoundId(token) => match self.epochs.observe_round(token) {
                EpochChange::Unchanged => Applied::Ignored,
                EpochChange::FirstSeen => Applied::Updated,
                EpochChange::Reset => {
                    self.clear_round();
                    Applied::RoundReset
                }
            },
            SessionEvent::MatchId(token) => match self.epochs.observe_match(token) {
                EpochChange::Unchanged => Applied::Ignored,
                EpochChange::FirstSeen => Applied::Updated,
                EpochChange::Reset => {
                    self.clear_round();
                    self.clear_match();
                    Applied::MatchReset
                }
            },
            SessionEvent::Players(roster) => {
                self.roster = roster;
                Applied::Updated
            }
            SessionEvent::HostId(id) => {
                self.host_id = id;
                Applied::Updated
            }
            SessionEvent::BasePrompt(prompt) => {
                if prompt.is_some() {
                    self.generating = false;
                }
                self.base_prompt = prompt;
                Applied::Updated
            }
            SessionEvent::PersonalPrompts(prompts) => {
                self.personal_prompts = prompts;
                Applied::Updated
            }
            SessionEvent::Responses(responses) => {
                self.responses = responses;
                Applied::Updated
            }
            SessionEvent::Votes(votes) => {
                self.votes = votes;
                Applied::Updated
            }
            SessionEvent::Scores(scores) => {
                self.scores = scores;
                Applied::Updated
            }
            SessionEvent::History(history) => {
                self.history = history;
                Applied::Updated
            }
            SessionEvent::Eliminated(id) => {
                self.eliminated = id;
                Applied::Updated
            }
            SessionEvent::Winner(winner) => {
                self.winner = winner;
                Applied::Updated
            }
            SessionEvent::GameOver(over) => {
                self.game_over = over;
                Applied::Updated
            }
        }
    }

    fn clear_round(&mut self) {
        self.base_prompt = None;
        self.personal_prompts.clear();
        self.responses.clear();
        self.votes.clear();
        self.scores.clear();
        self.eliminated = None;
        self.winner = None;
    }

    fn clear_match(&mut self) {
        for player in &mut self.roster {
            player.role = None;
            player.eliminated = false;
            player.responded = false;
        }
        self.history.clear();
        self.game_over = false;
    }

    pub fn round_id(&self) -> Option<&EpochToken> {
        self.epochs.round_id()
    }

    pub fn match_id(&self) -> Option<&EpochToken> {
        self.epochs.match_id()
    }

    pub fn player(&self, id: &str) -> Option<&Player> {
        self.roster.iter().find(|p| p.id == id)
    }

    pub fn me(&self) -> Option<&Player> {
        self.player(&self.me)
    }

    pub fn host(&self) -> Option<&PlayerId> {
        host::effective_host(&self.roster, self.host_id.as_ref())
    }

    pub fn is_host(&self) -> bool {
        self.host() == Some(&self.me)
    }

    pub fn roles_assigned(&self) -> bool {
        self.roster.iter().any(|p| p.role.is_some())
    }

    pub fn in_round(&self) -> bool {
        self.base_prompt.is_some()
    }

    /// Players taking part in the current round, in join order.
    ///
    /// During a round: living players that were issued a personal prompt.
    /// Between rounds: living players, restricted to role holders once a
    /// Spy match has assigned roles.
    pub fn participants(&self) -> Vec<&Player> {
        self.roster
            .iter()
            .filter(|p| p.is_alive())
            .filter(|p| {
                if self.in_round() {
                    self.personal_prompts.contains_key(&p.id)
                } else {
                    self.kind != GameKind::Spy || !self.roles_assigned() || p.role.is_some()
                }
            })
            .collect()
    }

    /// Players who would be dealt into the next round
    pub fn eligible_players(&self) -> Vec<&Player> {
        let roles_assigned = self.kind == GameKind::Spy && self.roles_assigned();
        self.roster
            .iter()
            .filter(|p| p.is_alive())
            .filter(|p| !roles_assigned || p.role.is_some())
            .collect()
    }

    pub fn is_participant(&self, id: &str) -> bool {
        self.participants().iter().any(|p| p.id == id)
    }

    /// Every participant has answered
    pub fn responses_complete(&self) -> bool {
        let participants = self.participants();
        !participants.is_empty()
            && participants
                .iter()
                .all(|p| self.responses.contains_key(&p.id))
    }

    /// Every participant has cast a valid vote
    pub fn votes_complete(&self) -> bool {
        let participants = self.participants();
        !participants.is_empty()
            && participants.iter().all(|p| {
                self.votes.get(&p.id).is_some_and(|target| {
                    target != &p.id && participants.iter().any(|q| &q.id == target)
                })
            })
    }

    pub fn is_resolved(&self) -> bool {
        match self.kind {
            GameKind::Spy => self.eliminated.is_some(),
            GameKind::Quest => self.winner.is_some(),
        }
    }

    /// Derived game phase
    pub fn phase(&self) -> Phase {
        if self.game_over {
            return Phase::MatchOver;
        }
        if !self.in_round() {
            return if self.generating {
                Phase::Generating
            } else {
                Phase::Lobby
            };
        }
        if self.is_resolved() {
            return Phase::Resolved;
        }
        if !self.responses_complete() {
            return Phase::AwaitingResponses;
        }
        match self.kind {
            GameKind::Spy => Phase::Voting,
            GameKind::Quest => Phase::Scoring,
        }
    }

    pub fn my_prompt(&self) -> Option<&String> {
        self.personal_prompts.get(&self.me)
    }

    pub fn my_role(&self) -> Option<Role> {
        self.me().and_then(|p| p.role)
    }

    pub fn has_responded(&self) -> bool {
        self.responses.contains_key(&self.me)
    }

    pub fn has_voted(&self) -> bool {
        self.votes.contains_key(&self.me)
    }

    /// Vote counts over the current participants
    pub fn tally(&self) -> VoteTally {
        let participants: Vec<Player> = self.participants().into_iter().cloned().collect();
        vote::tally_votes(&self.votes, &participants)
    }

    /// Cumulative Quest standings for the current match
    pub fn standings(&self) -> Vec<Standing> {
        score::standings(&self.history, &self.roster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn player(id: &str, joined_at: i64) -> Player {
        Player::from_record(id, PlayerRecord::new(id.to_uppercase(), joined_at)).unwrap()
    }

    fn spy_view_in_round() -> SessionView {
        let mut view = SessionView::new(GameKind::Spy, "a");
        view.apply(SessionEvent::MatchId(Some("m1".into())));
        view.apply(SessionEvent::RoundId(Some("r1".into())));
        view.apply(SessionEvent::Players(vec![
            player("a", 1),
            player("b", 2),
            player("c", 3),
        ]));
        view.apply(SessionEvent::PersonalPrompts(
            [("a", "P"), ("b", "P'"), ("c", "P")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ));
        view.apply(SessionEvent::BasePrompt(Some("P".into())));
        view
    }

    fn responses(ids: &[&str]) -> BTreeMap<PlayerId, String> {
        ids.iter()
            .map(|id| (id.to_string(), format!("answer from {}", id)))
            .collect()
    }

    #[test]
    fn test_round_epoch_reset_is_idempotent() {
        let mut once = spy_view_in_round();
        once.apply(SessionEvent::Responses(responses(&["a"])));
        let mut twice = once.clone();

        assert_eq!(
            once.apply(SessionEvent::RoundId(Some("r2".into()))),
            Applied::RoundReset
        );
        twice.apply(SessionEvent::RoundId(Some("r2".into())));
        assert_eq!(
            twice.apply(SessionEvent::RoundId(Some("r2".into()))),
            Applied::Ignored
        );

        assert_eq!(once, twice);
        assert!(once.responses.is_empty());
        assert!(once.base_prompt.is_none());
        // Roster survives a round reset
        assert_eq!(once.roster.len(), 3);
    }

    #[test]
    fn test_match_reset_revives_and_drops_roles() {
        let mut view = spy_view_in_round();
        let mut roster = view.roster.clone();
        roster[1].role = Some(Role::Imposter);
        roster[2].eliminated = true;
        view.apply(SessionEvent::Players(roster));
        view.apply(SessionEvent::GameOver(true));

        assert_eq!(
            view.apply(SessionEvent::MatchId(Some("m2".into()))),
            Applied::MatchReset
        );
        assert!(view.roster.iter().all(|p| p.role.is_none() && p.is_alive()));
        assert!(!view.game_over);
        assert!(view.base_prompt.is_none());
    }

    #[test]
    fn test_response_completion_gates_voting() {
        let mut view = spy_view_in_round();
        assert_eq!(view.phase(), Phase::AwaitingResponses);

        view.apply(SessionEvent::Responses(responses(&["a", "b"])));
        assert_eq!(view.phase(), Phase::AwaitingResponses);

        view.apply(SessionEvent::Responses(responses(&["a", "b", "c"])));
        assert_eq!(view.phase(), Phase::Voting);
    }

    #[test]
    fn test_responses_from_non_participants_do_not_count() {
        let mut view = spy_view_in_round();
        view.apply(SessionEvent::Responses(responses(&["a", "b", "zz"])));
        assert_eq!(view.phase(), Phase::AwaitingResponses);
    }

    #[test]
    fn test_eliminated_players_are_not_participants() {
        let mut view = spy_view_in_round();
        let mut roster = view.roster.clone();
        roster[2].eliminated = true;
        view.apply(SessionEvent::Players(roster));
        view.apply(SessionEvent::Responses(responses(&["a", "b"])));
        assert_eq!(view.phase(), Phase::Voting);
    }

    #[test]
    fn test_no_participants_never_completes() {
        let mut view = SessionView::new(GameKind::Quest, "a");
        view.apply(SessionEvent::Players(vec![player("a", 1)]));
        // Base prompt arrived before personal prompts
        view.apply(SessionEvent::BasePrompt(Some("P".into())));
        assert_eq!(view.phase(), Phase::AwaitingResponses);
    }

    #[test]
    fn test_votes_complete_ignores_self_votes() {
        let mut view = spy_view_in_round();
        view.apply(SessionEvent::Responses(responses(&["a", "b", "c"])));
        let mut votes: BTreeMap<PlayerId, PlayerId> = [("a", "b"), ("b", "b"), ("c", "a")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        view.apply(SessionEvent::Votes(votes.clone()));
        assert!(!view.votes_complete());

        votes.insert("b".into(), "c".into());
        view.apply(SessionEvent::Votes(votes));
        assert!(view.votes_complete());
    }

    #[test]
    fn test_phase_progression() {
        let mut view = SessionView::new(GameKind::Quest, "a");
        assert_eq!(view.phase(), Phase::Lobby);
        view.generating = true;
        assert_eq!(view.phase(), Phase::Generating);

        view.apply(SessionEvent::Players(vec![player("a", 1), player("b", 2)]));
        view.apply(SessionEvent::PersonalPrompts(
            [("a", "P"), ("b", "P")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ));
        view.apply(SessionEvent::BasePrompt(Some("P".into())));
        assert!(!view.generating);
        assert_eq!(view.phase(), Phase::AwaitingResponses);

        view.apply(SessionEvent::Responses(responses(&["a", "b"])));
        assert_eq!(view.phase(), Phase::Scoring);

        view.apply(SessionEvent::Winner(Some(Winner::Player("b".into()))));
        assert_eq!(view.phase(), Phase::Resolved);

        view.apply(SessionEvent::GameOver(true));
        assert_eq!(view.phase(), Phase::MatchOver);
    }

    #[test]
    fn test_decode_skips_malformed_entries() {
        let event = SessionEvent::decode(
            SessionKey::Players,
            Some(json!({
                "b": {"name": "Bea", "joinedAt": 20},
                "a": {"name": "Al", "joinedAt": 10},
                "broken": {"name": 5},
                "blank": {"name": " ", "joinedAt": 1}
            })),
        );
        match event {
            Some(SessionEvent::Players(roster)) => {
                let ids: Vec<_> = roster.iter().map(|p| p.id.as_str()).collect();
                assert_eq!(ids, vec!["a", "b"]);
            }
            other => panic!("Expected players event, got {:?}", other),
        }

        assert_eq!(
            SessionEvent::decode(SessionKey::GameOver, Some(json!("yes"))),
            Some(SessionEvent::GameOver(false))
        );
        assert_eq!(SessionEvent::decode(SessionKey::Claims, Some(json!({}))), None);
    }

    #[test]
    fn test_from_snapshot_applies_epochs_first() {
        let snapshot = json!({
            "roundId": "r1",
            "matchId": "m1",
            "basePrompt": "P",
            "players": {"a": {"name": "A", "joinedAt": 1}},
            "personalPrompts": {"a": "P"},
            "responses": {"a": "hello"}
        });
        let events = SessionEvent::from_snapshot(Some(&snapshot));
        assert!(matches!(events[0], SessionEvent::MatchId(Some(_))));
        assert!(matches!(events[1], SessionEvent::RoundId(Some(_))));

        let view = SessionView::from_snapshot(GameKind::Quest, "a", Some(&snapshot));
        assert_eq!(view.round_id(), Some(&"r1".to_string()));
        assert_eq!(view.base_prompt.as_deref(), Some("P"));
        assert_eq!(view.phase(), Phase::Scoring);
        assert!(view.is_host());
    }

    #[test]
    fn test_reduce_is_pure() {
        let view = SessionView::new(GameKind::Spy, "a");
        let next = reduce(view.clone(), SessionEvent::GameOver(true));
        assert!(!view.game_over);
        assert!(next.game_over);
    }
}
