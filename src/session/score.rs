use super::paths::SessionKey;
use super::view::SessionView;
use super::{GameError, Peer};
use crate::types::*;
use serde_json::json;
use std::collections::BTreeMap;

/// Highest score among participants; ties go to the senior player.
/// Participants the oracle did not score count as 0.
pub fn quest_winner(scores: &BTreeMap<PlayerId, u32>, participants: &[Player]) -> Option<PlayerId> {
    let mut ordered: Vec<&Player> = participants.iter().collect();
    ordered.sort_by(|a, b| a.seniority().cmp(&b.seniority()));

    let mut best: Option<(&Player, u32)> = None;
    for player in ordered {
        let score = scores.get(&player.id).copied().unwrap_or(0);
        match best {
            Some((_, top)) if top >= score => {}
            _ => best = Some((player, score)),
        }
    }
    best.map(|(player, _)| player.id.clone())
}

/// Cumulative standings over every scored round of the match
pub fn standings(
    history: &BTreeMap<EpochToken, BTreeMap<PlayerId, u32>>,
    roster: &[Player],
) -> Vec<Standing> {
    let mut lines: Vec<(&Player, Standing)> = roster
        .iter()
        .map(|p| {
            (
                p,
                Standing {
                    player_id: p.id.clone(),
                    name: p.name.clone(),
                    total: 0,
                    rounds_won: 0,
                },
            )
        })
        .collect();

    for round in history.values() {
        let scored: Vec<Player> = roster
            .iter()
            .filter(|p| round.contains_key(&p.id))
            .cloned()
            .collect();
        let winner = quest_winner(round, &scored);

        for (player, line) in lines.iter_mut() {
            if let Some(score) = round.get(&player.id) {
                line.total += score;
            }
            if winner.as_ref() == Some(&player.id) {
                line.rounds_won += 1;
            }
        }
    }

    lines.sort_by(|(a, x), (b, y)| {
        y.total
            .cmp(&x.total)
            .then_with(|| a.seniority().cmp(&b.seniority()))
    });
    lines.into_iter().map(|(_, line)| line).collect()
}

impl Peer {
    /// Score the current Quest round with the oracle and publish the winner.
    ///
    /// Host only, guarded by a per-round claim so a promoted second host
    /// cannot score the same round again.
    pub(crate) async fn score_round(&self, snapshot: &SessionView) -> Result<bool, GameError> {
        if snapshot.phase() != Phase::Scoring || !snapshot.is_host() {
            return Ok(false);
        }
        let Some(round_id) = snapshot.round_id().cloned() else {
            return Ok(false);
        };

        let claim = self.paths.claim(&round_id, "score");
        if !self.store.set_if_absent(&claim, json!(self.me)).await? {
            tracing::debug!("Round {} is already being scored", round_id);
            return Ok(false);
        }

        let participants: Vec<Player> = snapshot.participants().into_iter().cloned().collect();
        let responses: Vec<(PlayerId, String)> = participants
            .iter()
            .filter_map(|p| {
                snapshot
                    .responses
                    .get(&p.id)
                    .map(|text| (p.id.clone(), text.clone()))
            })
            .collect();
        let prompt = snapshot.base_prompt.clone().unwrap_or_default();

        let raw = match self.oracle.score(&prompt, &responses).await {
            Ok(raw) => raw,
            Err(e) => {
                // Let the next drive retry
                self.store.remove(&claim).await?;
                return Err(e.into());
            }
        };

        let scores: BTreeMap<PlayerId, u32> = participants
            .iter()
            .map(|p| (p.id.clone(), raw.get(&p.id).copied().unwrap_or(0).min(100)))
            .collect();

        self.store
            .put(&self.paths.key(SessionKey::Scores), &scores)
            .await?;
        self.store
            .put(&self.paths.history_round(&round_id), &scores)
            .await?;

        if let Some(winner) = quest_winner(&scores, &participants) {
            tracing::info!("Round {} won by {} ({:?})", round_id, winner, scores);
            self.store
                .put(
                    &self.paths.key(SessionKey::Winner),
                    &Winner::Player(winner),
                )
                .await?;
        }

        let scored_rounds = snapshot.history.len() + usize::from(!snapshot.history.contains_key(&round_id));
        if scored_rounds >= self.config.quest_rounds_per_match {
            self.store
                .set(&self.paths.key(SessionKey::GameOver), json!(true))
                .await?;
            tracing::info!(
                "Match over in {} after {} rounds",
                self.paths.root(),
                scored_rounds
            );
        }
        Ok(true)
    }
}
