use super::epoch;
use super::paths::SessionKey;
use super::view::SessionView;
use super::vote::{self, Outcome};
use super::{GameError, Peer};
use crate::llm::LlmError;
use crate::types::*;
use rand::Rng;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

impl Peer {
    /// Generate and deal the next round (host only)
    pub async fn start_round(&self) -> Result<(), GameError> {
        let result = self.tracked(self.try_start_round()).await;
        if result.is_err() {
            self.view
                .send_if_modified(|view| std::mem::take(&mut view.generating));
        }
        result
    }

    async fn try_start_round(&self) -> Result<(), GameError> {
        let snapshot = self.snapshot().await?;
        if !snapshot.is_host() {
            return Err(GameError::NotHost("start a round"));
        }
        let phase = snapshot.phase();
        if !matches!(phase, Phase::Lobby | Phase::Resolved) {
            return Err(GameError::WrongPhase {
                action: "start a round",
                phase,
            });
        }
        if self.kind == GameKind::Spy && phase == Phase::Resolved {
            self.ensure_match_continues(&snapshot).await?;
        }

        let players: Vec<Player> = snapshot.eligible_players().into_iter().cloned().collect();
        let roles_assigned = self.kind == GameKind::Spy && snapshot.roles_assigned();
        let need = self.config.min_players(self.kind, roles_assigned);
        if players.len() < need {
            return Err(GameError::NotEnoughPlayers {
                need,
                have: players.len(),
            });
        }

        // One advance per epoch; the round id is absent before the first round
        let epoch = snapshot
            .round_id()
            .or(snapshot.match_id())
            .cloned()
            .unwrap_or_else(|| "lobby".to_string());
        let claim = self.paths.claim(&epoch, "advance");
        if !self.store.set_if_absent(&claim, json!(self.me)).await? {
            return Err(GameError::Contended("round advance"));
        }

        match self.advance_round(&snapshot, players).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // Let the host retry the same epoch
                if let Err(release) = self.store.remove(&claim).await {
                    tracing::error!("Could not release claim {}: {}", claim, release);
                }
                Err(e)
            }
        }
    }

    /// Re-run the win check on a resolved Spy round before dealing another.
    /// A finished match whose outcome was not written yet gets it written.
    async fn ensure_match_continues(&self, snapshot: &SessionView) -> Result<(), GameError> {
        let Some(eliminated) = snapshot.eliminated.as_ref() else {
            return Ok(());
        };
        let participants: Vec<Player> = snapshot.participants().into_iter().cloned().collect();
        match vote::spy_outcome(&participants, eliminated, self.config.spy_min_alive) {
            Outcome::Continue => Ok(()),
            Outcome::MatchOver(winner) => {
                self.finish_match(&winner).await?;
                Err(GameError::WrongPhase {
                    action: "start a round",
                    phase: Phase::MatchOver,
                })
            }
        }
    }

    async fn advance_round(
        &self,
        snapshot: &SessionView,
        players: Vec<Player>,
    ) -> Result<(), GameError> {
        self.view.send_modify(|view| view.generating = true);
        let challenge = self.oracle.challenge(self.kind).await?;
        if challenge.base_prompt.trim().is_empty() {
            return Err(LlmError::ParseError("Empty challenge".to_string()).into());
        }

        let roles = match self.kind {
            GameKind::Spy => {
                if challenge.imposter_prompt.is_none() {
                    return Err(LlmError::ParseError("Missing imposter prompt".to_string()).into());
                }
                self.assign_roles(snapshot, &players).await?
            }
            GameKind::Quest => BTreeMap::new(),
        };

        self.clear_round(snapshot).await?;
        let round_id = epoch::mint();
        self.store
            .set(&self.paths.key(SessionKey::RoundId), json!(round_id))
            .await?;

        for player in &players {
            let prompt = match (roles.get(&player.id), &challenge.imposter_prompt) {
                (Some(Role::Imposter), Some(imposter)) => imposter,
                _ => &challenge.base_prompt,
            };
            self.store
                .set(&self.paths.personal_prompt(&player.id), json!(prompt))
                .await?;
        }
        // Written last: its arrival is what opens the round on every peer
        self.store
            .set(
                &self.paths.key(SessionKey::BasePrompt),
                json!(challenge.base_prompt),
            )
            .await?;

        tracing::info!(
            "Started round {} in {} with {} players",
            round_id,
            self.paths.root(),
            players.len()
        );
        Ok(())
    }

    /// Roles for this match, picking the Imposter on the first round.
    /// The pick is made by exactly one writer per match.
    async fn assign_roles(
        &self,
        snapshot: &SessionView,
        players: &[Player],
    ) -> Result<BTreeMap<PlayerId, Role>, GameError> {
        let existing = |roster: &[Player]| -> BTreeMap<PlayerId, Role> {
            roster
                .iter()
                .filter_map(|p| p.role.map(|role| (p.id.clone(), role)))
                .collect()
        };
        if snapshot.roles_assigned() {
            return Ok(existing(&snapshot.roster));
        }

        let match_id = snapshot
            .match_id()
            .cloned()
            .unwrap_or_else(|| "lobby".to_string());
        let claim = self.paths.claim(&match_id, "roles");
        if !self.store.set_if_absent(&claim, json!(self.me)).await? {
            let fresh = self.snapshot().await?;
            return Ok(existing(&fresh.roster));
        }

        let imposter = rand::rng().random_range(0..players.len());
        let mut roles = BTreeMap::new();
        for (index, player) in players.iter().enumerate() {
            let role = if index == imposter {
                Role::Imposter
            } else {
                Role::Collaborator
            };
            self.store
                .set(&format!("{}/role", self.paths.player(&player.id)), json!(role))
                .await?;
            roles.insert(player.id.clone(), role);
        }
        tracing::info!("Assigned roles for match {} in {}", match_id, self.paths.root());
        Ok(roles)
    }

    /// Remove round-scoped keys and reset the `responded` flags
    async fn clear_round(&self, snapshot: &SessionView) -> Result<(), GameError> {
        for key in SessionKey::ROUND_SCOPED {
            self.store.remove(&self.paths.key(key)).await?;
        }
        for player in snapshot.roster.iter().filter(|p| p.responded) {
            self.store
                .set(&format!("{}/responded", self.paths.player(&player.id)), json!(false))
                .await?;
        }
        Ok(())
    }

    /// Throw away the current match and return to the lobby (host only)
    pub async fn new_match(&self) -> Result<(), GameError> {
        self.tracked(self.try_new_match()).await
    }

    async fn try_new_match(&self) -> Result<(), GameError> {
        let snapshot = self.snapshot().await?;
        if !snapshot.is_host() {
            return Err(GameError::NotHost("start a new match"));
        }
        let match_id = snapshot
            .match_id()
            .cloned()
            .unwrap_or_else(|| "lobby".to_string());
        if !self
            .store
            .set_if_absent(&self.paths.claim(&match_id, "rematch"), json!(self.me))
            .await?
        {
            return Err(GameError::Contended("new match"));
        }

        self.clear_round(&snapshot).await?;
        self.store.remove(&self.paths.key(SessionKey::History)).await?;
        self.store.remove(&self.paths.key(SessionKey::GameOver)).await?;

        let mut revive = Map::new();
        revive.insert("eliminated".to_string(), Value::Null);
        revive.insert("role".to_string(), Value::Null);
        revive.insert("responded".to_string(), Value::Null);
        for player in &snapshot.roster {
            self.store
                .update(&self.paths.player(&player.id), revive.clone())
                .await?;
        }

        self.store.remove(&self.paths.key(SessionKey::RoundId)).await?;
        let next = epoch::mint();
        self.store
            .set(&self.paths.key(SessionKey::MatchId), json!(next))
            .await?;
        self.store.remove(&self.paths.key(SessionKey::Claims)).await?;

        tracing::info!("New match {} in {}", next, self.paths.root());
        Ok(())
    }
}
