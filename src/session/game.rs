use super::paths::SessionKey;
use super::view::{Applied, SessionEvent};
use super::{GameError, Peer};
use crate::store::StoreError;
use crate::types::*;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};

impl Peer {
    /// Fold store notifications into the local view, one at a time
    pub(super) async fn dispatch<S>(self, mut events: S)
    where
        S: Stream<Item = (SessionKey, Option<Value>)> + Unpin + Send,
    {
        while let Some((key, value)) = events.next().await {
            let Some(event) = SessionEvent::decode(key, value) else {
                continue;
            };

            let mut applied = Applied::Ignored;
            self.view.send_if_modified(|view| {
                applied = view.apply(event);
                applied != Applied::Ignored
            });

            if applied.is_reset() {
                tracing::debug!("{} saw {:?} on {}", self.me, applied, key.as_str());
                if let Err(e) = self.resync().await {
                    tracing::error!("Resync failed for {}: {}", self.me, e);
                }
            }
            if applied != Applied::Ignored {
                self.wake.notify_one();
            }
        }
        tracing::info!("Subscriptions closed for {}", self.me);
    }

    /// Reapply a full snapshot after an epoch change so values that
    /// arrived before the epoch notification are not lost
    async fn resync(&self) -> Result<(), StoreError> {
        let snapshot = self.store.get(self.paths.root()).await?;
        let events = SessionEvent::from_snapshot(snapshot.as_ref());
        self.view.send_modify(|view| view.apply_all(events));
        Ok(())
    }

    /// Run [`Peer::drive`] whenever the view changes. Wakeups that arrive
    /// while a drive step is running collapse into one follow-up step.
    pub(super) async fn run_driver(self) {
        loop {
            self.wake.notified().await;
            if let Err(e) = self.drive().await {
                tracing::warn!("Drive step failed for {}: {}", self.me, e);
                self.record_error(&e);
            }
        }
    }

    /// Perform whatever transition the shared state currently calls for.
    ///
    /// Spy vote resolution is idempotent and runs on every participant so a
    /// missing host cannot stall an elimination. Quest scoring and the
    /// automatic next Spy round are host only and claim-guarded. Decisions
    /// are made on a fresh snapshot, never on the incremental view.
    pub async fn drive(&self) -> Result<(), GameError> {
        let local = self.view();
        match local.phase() {
            Phase::Voting if local.votes_complete() => {
                let snapshot = self.snapshot().await?;
                self.resolve_votes(&snapshot, false).await?;
            }
            Phase::Scoring if local.is_host() => {
                let snapshot = self.snapshot().await?;
                self.score_round(&snapshot).await?;
            }
            Phase::Resolved
                if local.is_host() && self.kind == GameKind::Spy && self.config.auto_next_round =>
            {
                match self.start_round().await {
                    Ok(()) | Err(GameError::Contended(_)) | Err(GameError::WrongPhase { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Default action for a phase that outlived the timeout (host only).
    ///
    /// Missing answers are filled with a placeholder; a stalled vote is
    /// resolved with the votes cast so far. Returns whether anything was
    /// written.
    pub async fn expire_phase(&self) -> Result<bool, GameError> {
        let snapshot = self.snapshot().await?;
        if !snapshot.is_host() {
            return Ok(false);
        }
        match snapshot.phase() {
            Phase::AwaitingResponses => {
                let missing: Vec<PlayerId> = snapshot
                    .participants()
                    .into_iter()
                    .filter(|p| !snapshot.responses.contains_key(&p.id))
                    .map(|p| p.id.clone())
                    .collect();
                for id in &missing {
                    self.store
                        .set_if_absent(&self.paths.response(id), json!(NO_RESPONSE))
                        .await?;
                    self.store
                        .set(&format!("{}/responded", self.paths.player(id)), json!(true))
                        .await?;
                }
                tracing::info!(
                    "Phase timed out in {}, filled {} missing responses",
                    self.paths.root(),
                    missing.len()
                );
                Ok(!missing.is_empty())
            }
            Phase::Voting => {
                let resolved = self.resolve_votes(&snapshot, true).await?;
                if resolved {
                    tracing::info!("Voting timed out in {}, resolved early", self.paths.root());
                }
                Ok(resolved)
            }
            _ => Ok(false),
        }
    }
}
