use super::paths::SessionKey;
use super::view::SessionView;
use super::{GameError, Peer};
use crate::types::*;
use serde_json::json;
use std::collections::BTreeMap;

/// Result of counting the votes of one Spy round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoteTally {
    pub counts: BTreeMap<PlayerId, u32>,
    /// Player with the most votes; among tied players the latest joiner
    pub eliminated: Option<PlayerId>,
}

/// Count votes cast by participants for other participants
pub fn tally_votes(votes: &BTreeMap<PlayerId, PlayerId>, participants: &[Player]) -> VoteTally {
    let is_participant = |id: &str| participants.iter().any(|p| p.id == id);

    let mut counts: BTreeMap<PlayerId, u32> = BTreeMap::new();
    for (voter, target) in votes {
        if voter == target || !is_participant(voter) || !is_participant(target) {
            continue;
        }
        *counts.entry(target.clone()).or_insert(0) += 1;
    }

    let eliminated = counts.values().copied().max().and_then(|top| {
        let mut tied: Vec<&Player> = participants
            .iter()
            .filter(|p| counts.get(&p.id) == Some(&top))
            .collect();
        tied.sort_by(|a, b| a.seniority().cmp(&b.seniority()));
        tied.last().map(|p| p.id.clone())
    });

    VoteTally { counts, eliminated }
}

/// What an elimination means for the match
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    MatchOver(Winner),
}

/// Evaluate the win conditions after `eliminated` leaves the round.
///
/// The Imposter wins once fewer than `min_alive` players (never fewer than
/// three) remain, since no further round could be dealt.
pub fn spy_outcome(participants: &[Player], eliminated: &str, min_alive: usize) -> Outcome {
    let removed_imposter = participants
        .iter()
        .any(|p| p.id == eliminated && p.role == Some(Role::Imposter));
    if removed_imposter {
        return Outcome::MatchOver(Winner::Collaborators);
    }

    let living: Vec<&Player> = participants
        .iter()
        .filter(|p| p.id != eliminated)
        .collect();
    let imposter_alive = living.iter().any(|p| p.role == Some(Role::Imposter));

    if !imposter_alive {
        // Imposter left the session
        Outcome::MatchOver(Winner::Collaborators)
    } else if living.len() < min_alive.max(3) {
        Outcome::MatchOver(Winner::Imposter)
    } else {
        Outcome::Continue
    }
}

impl Peer {
    /// Accuse another player during the Spy voting phase
    pub async fn cast_vote(&self, target: &str) -> Result<(), GameError> {
        self.tracked(self.try_cast_vote(target)).await
    }

    async fn try_cast_vote(&self, target: &str) -> Result<(), GameError> {
        if self.kind != GameKind::Spy {
            return Err(GameError::WrongGame(GameKind::Spy));
        }
        let view = self.view();
        let phase = view.phase();
        if phase != Phase::Voting {
            return Err(GameError::WrongPhase {
                action: "vote",
                phase,
            });
        }
        if !view.is_participant(&self.me) {
            return Err(GameError::NotParticipant(self.me.clone()));
        }
        if target == self.me {
            return Err(GameError::SelfVote);
        }
        if !view.is_participant(target) {
            return Err(GameError::NotParticipant(target.to_string()));
        }
        if view.has_voted() {
            return Err(GameError::AlreadyVoted);
        }

        self.store
            .set(&self.paths.vote(&self.me), json!(target))
            .await?;
        tracing::info!("{} voted for {}", self.me, target);
        Ok(())
    }

    /// Eliminate the top-voted player and check the win conditions.
    ///
    /// Any participant may run this; a per-round claim picks one writer and
    /// a snapshot from an earlier round is rejected. The match outcome is
    /// written before `eliminated`, so no peer ever observes a resolved
    /// round whose win check is still pending. With `force` the votes cast
    /// so far are used even if some are missing.
    pub(crate) async fn resolve_votes(
        &self,
        snapshot: &SessionView,
        force: bool,
    ) -> Result<bool, GameError> {
        if snapshot.phase() != Phase::Voting || !(force || snapshot.votes_complete()) {
            return Ok(false);
        }
        let Some(round_id) = snapshot.round_id().cloned() else {
            return Ok(false);
        };
        let tally = snapshot.tally();
        let Some(eliminated) = tally.eliminated else {
            tracing::debug!("No valid votes to resolve in {}", self.paths.root());
            return Ok(false);
        };

        let claim = self.paths.claim(&round_id, "resolve");
        if !self.store.set_if_absent(&claim, json!(self.me)).await? {
            tracing::debug!("Round {} is already being resolved", round_id);
            return Ok(false);
        }
        let current: Option<EpochToken> = self
            .store
            .get_as(&self.paths.key(SessionKey::RoundId))
            .await?;
        if current.as_ref() != Some(&round_id) {
            tracing::debug!("Skipping resolution of stale round {}", round_id);
            return Ok(false);
        }

        self.store
            .set(
                &format!("{}/eliminated", self.paths.player(&eliminated)),
                json!(true),
            )
            .await?;

        let participants: Vec<Player> = snapshot.participants().into_iter().cloned().collect();
        let outcome = spy_outcome(&participants, &eliminated, self.config.spy_min_alive);
        if let Outcome::MatchOver(winner) = outcome {
            self.finish_match(&winner).await?;
        }
        self.store
            .set(&self.paths.key(SessionKey::Eliminated), json!(eliminated))
            .await?;
        tracing::info!(
            "Eliminated {} in {} (votes: {:?})",
            eliminated,
            self.paths.root(),
            tally.counts
        );
        Ok(true)
    }

    /// Publish the winner and end the match. Idempotent.
    pub(crate) async fn finish_match(&self, winner: &Winner) -> Result<(), GameError> {
        self.store
            .put(&self.paths.key(SessionKey::Winner), winner)
            .await?;
        self.store
            .set(&self.paths.key(SessionKey::GameOver), json!(true))
            .await?;
        tracing::info!("Match over in {}: {:?}", self.paths.root(), winner);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::tests::ScriptedOracle;
    use crate::session::tests::{join, WAIT};
    use crate::store::{DocumentStore, MemoryStore};
    use std::sync::Arc;

    fn player(id: &str, joined_at: i64, role: Role) -> Player {
        let mut record = PlayerRecord::new(id, joined_at);
        record.role = Some(role);
        Player::from_record(id, record).unwrap()
    }

    fn votes(pairs: &[(&str, &str)]) -> BTreeMap<PlayerId, PlayerId> {
        pairs
            .iter()
            .map(|(voter, target)| (voter.to_string(), target.to_string()))
            .collect()
    }

    fn table() -> Vec<Player> {
        vec![
            player("A", 1, Role::Collaborator),
            player("B", 2, Role::Imposter),
            player("C", 3, Role::Collaborator),
            player("D", 4, Role::Collaborator),
        ]
    }

    #[test]
    fn test_imposter_caught() {
        let players = table();
        let tally = tally_votes(
            &votes(&[("A", "B"), ("C", "B"), ("D", "A"), ("B", "C")]),
            &players,
        );

        assert_eq!(tally.counts.get("B"), Some(&2));
        assert_eq!(tally.counts.get("A"), Some(&1));
        assert_eq!(tally.counts.get("C"), Some(&1));
        assert_eq!(tally.eliminated.as_deref(), Some("B"));
        assert_eq!(
            spy_outcome(&players, "B", 3),
            Outcome::MatchOver(Winner::Collaborators)
        );
    }

    #[test]
    fn test_tie_eliminates_latest_joiner() {
        let players = table();
        let tally = tally_votes(
            &votes(&[("A", "C"), ("C", "A"), ("B", "D"), ("D", "B")]),
            &players,
        );
        assert_eq!(tally.eliminated.as_deref(), Some("D"));
    }

    #[test]
    fn test_invalid_votes_are_ignored() {
        let players = table();
        let tally = tally_votes(
            &votes(&[("A", "A"), ("Z", "B"), ("C", "Z"), ("D", "C")]),
            &players,
        );
        assert_eq!(tally.counts.len(), 1);
        assert_eq!(tally.eliminated.as_deref(), Some("C"));

        let empty = tally_votes(&BTreeMap::new(), &players);
        assert_eq!(empty, VoteTally::default());
    }

    #[test]
    fn test_wrong_accusation_continues() {
        let players = table();
        assert_eq!(spy_outcome(&players, "A", 3), Outcome::Continue);
    }

    #[test]
    fn test_imposter_wins_at_two_living() {
        let players = vec![
            player("A", 1, Role::Collaborator),
            player("B", 2, Role::Imposter),
            player("C", 3, Role::Collaborator),
        ];
        assert_eq!(
            spy_outcome(&players, "C", 3),
            Outcome::MatchOver(Winner::Imposter)
        );
    }

    #[test]
    fn test_min_alive_floor_ends_match_early() {
        let players = table();
        assert_eq!(spy_outcome(&players, "D", 3), Outcome::Continue);
        assert_eq!(
            spy_outcome(&players, "D", 4),
            Outcome::MatchOver(Winner::Imposter)
        );
        // The floor never drops below three
        assert_eq!(spy_outcome(&players, "D", 1), Outcome::Continue);
    }

    #[tokio::test]
    async fn test_stale_snapshot_cannot_eliminate_in_next_round() {
        let store = MemoryStore::new();
        let oracle = Arc::new(ScriptedOracle::default());
        let mut peers = Vec::new();
        for name in ["Ann", "Ben", "Cid", "Dee", "Eve"] {
            peers.push(join(&store, &oracle, GameKind::Spy, name).await);
        }
        let host = &peers[0];
        host.wait_for(WAIT, |v| v.roster.len() == 5).await.unwrap();
        host.start_round().await.unwrap();
        let first = host
            .wait_for(WAIT, |v| v.in_round() && v.personal_prompts.len() == 5 && v.roles_assigned())
            .await
            .unwrap();
        let first_round = first.round_id().cloned().unwrap();

        for peer in &peers {
            peer.wait_for(WAIT, |v| v.my_prompt().is_some()).await.unwrap();
            peer.submit_response("A memo").await.unwrap();
        }
        for peer in &peers {
            peer.wait_for(WAIT, |v| v.phase() == Phase::Voting).await.unwrap();
        }

        let imposter = peers
            .iter()
            .find(|p| first.player(p.id()).and_then(|p| p.role) == Some(Role::Imposter))
            .unwrap();
        let others: Vec<&Peer> = peers.iter().filter(|p| p.id() != imposter.id()).collect();
        let (a, b, c, d) = (others[0], others[1], others[2], others[3]);

        d.cast_vote(a.id()).await.unwrap();
        imposter.cast_vote(a.id()).await.unwrap();
        let stale = a.snapshot().await.unwrap();
        assert_eq!(stale.phase(), Phase::Voting);
        assert_eq!(stale.tally().eliminated.as_ref(), Some(a.id()));

        a.cast_vote(d.id()).await.unwrap();
        b.cast_vote(d.id()).await.unwrap();
        c.cast_vote(d.id()).await.unwrap();
        host.wait_for(WAIT, |v| v.phase() == Phase::Resolved && v.eliminated.is_some())
            .await
            .unwrap();
        assert_eq!(host.view().eliminated.as_ref(), Some(d.id()));

        host.start_round().await.unwrap();
        host.wait_for(WAIT, |v| {
            v.round_id().is_some_and(|r| r != &first_round) && v.personal_prompts.len() == 4
        })
        .await
        .unwrap();

        assert!(!a.resolve_votes(&stale, true).await.unwrap());
        // Without the claim the round check still rejects it
        store
            .remove(&a.paths().claim(&first_round, "resolve"))
            .await
            .unwrap();
        assert!(!a.resolve_votes(&stale, true).await.unwrap());

        let tree = store.dump().await;
        let session = &tree["spy"]["test-session"];
        assert!(session.get("eliminated").is_none());
        assert_ne!(session["players"][a.id().as_str()]["eliminated"], json!(true));
        assert_eq!(session["players"][d.id().as_str()]["eliminated"], json!(true));
        assert!(session.get("gameOver").is_none());
    }
}
