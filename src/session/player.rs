use super::host::{self, HostClaim};
use super::paths::{validate_session_id, SessionKey, SessionPaths};
use super::view::SessionView;
use super::{epoch, GameError, Peer, TaskGuard};
use crate::config::GameConfig;
use crate::oracle::ContentOracle;
use crate::store::DocumentStore;
use crate::types::*;
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;

/// Trimmed display name capped at `max_chars`; blank names get a
/// generated friendly name
pub fn normalize_name(name: &str, max_chars: usize) -> String {
    let trimmed: String = name.trim().chars().take(max_chars).collect();
    let trimmed = trimmed.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }
    petname::petname(2, " ")
        .map(|generated| generated.chars().take(max_chars).collect())
        .unwrap_or_else(|| "Player".to_string())
}

impl Peer {
    /// Join (or implicitly create) a session and start following it.
    ///
    /// Registers the player, makes sure the session has a match epoch,
    /// applies the host promotion rule and subscribes to every session key.
    /// Background tasks stop when the last clone of the returned peer is
    /// dropped.
    pub async fn join(
        store: Arc<dyn DocumentStore>,
        oracle: Arc<dyn ContentOracle>,
        config: Arc<GameConfig>,
        kind: GameKind,
        session_id: &str,
        name: &str,
    ) -> Result<Peer, GameError> {
        validate_session_id(session_id).map_err(GameError::InvalidInput)?;
        let paths = SessionPaths::new(kind, session_id);
        let name = normalize_name(name, config.max_name_chars);
        let me: PlayerId = ulid::Ulid::new().to_string();

        let record = PlayerRecord::new(name.clone(), chrono::Utc::now().timestamp_millis());
        store.put(&paths.player(&me), &record).await?;
        store
            .set_if_absent(&paths.key(SessionKey::MatchId), json!(epoch::mint()))
            .await?;
        match host::claim_on_join(store.as_ref(), &paths, &me).await? {
            HostClaim::Promoted => tracing::info!("{} ({}) hosts {}", name, me, paths.root()),
            HostClaim::Existing(host) => {
                tracing::info!("{} ({}) joined {} hosted by {}", name, me, paths.root(), host)
            }
        }

        let snapshot = store.get(paths.root()).await?;
        let view = SessionView::from_snapshot(kind, me.clone(), snapshot.as_ref());
        let mut peer = Peer::new(store, oracle, config, paths, kind, me, view);

        let mut watches = Vec::with_capacity(SessionKey::WATCHED.len());
        for key in SessionKey::WATCHED {
            let watch = peer.store.watch(&peer.paths.key(key)).await?;
            watches.push(watch.into_stream().map(move |value| (key, value)).boxed());
        }

        let mut handles = vec![
            tokio::spawn(peer.detached().dispatch(futures::stream::select_all(watches))),
            tokio::spawn(peer.detached().run_driver()),
        ];
        if let Some(timeout) = peer.config.phase_timeout {
            handles.push(super::timeout::spawn_phase_timeout_watcher(
                peer.detached(),
                timeout,
            ));
        }
        peer.tasks = Some(Arc::new(TaskGuard { handles }));
        peer.wake.notify_one();

        Ok(peer)
    }

    /// Submit this player's answer for the current round
    pub async fn submit_response(&self, text: &str) -> Result<(), GameError> {
        self.tracked(self.try_submit_response(text)).await
    }

    async fn try_submit_response(&self, text: &str) -> Result<(), GameError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(GameError::InvalidInput("Response cannot be empty".to_string()));
        }
        if text.chars().count() > self.config.max_response_chars {
            return Err(GameError::InvalidInput(format!(
                "Response is longer than {} characters",
                self.config.max_response_chars
            )));
        }

        let view = self.view();
        let phase = view.phase();
        if phase != Phase::AwaitingResponses {
            return Err(GameError::WrongPhase {
                action: "submit a response",
                phase,
            });
        }
        if !view.is_participant(&self.me) {
            return Err(GameError::NotParticipant(self.me.clone()));
        }
        if view.has_responded() {
            return Err(GameError::AlreadySubmitted);
        }

        self.store
            .set(&self.paths.response(&self.me), Value::String(text.to_string()))
            .await?;
        self.store
            .set(&format!("{}/responded", self.paths.player(&self.me)), json!(true))
            .await?;
        tracing::info!("{} submitted a response", self.me);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::tests::ScriptedOracle;
    use crate::session::tests::{join, WAIT};
    use crate::store::MemoryStore;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  Alice ", 24), "Alice");
        assert_eq!(normalize_name("Bartholomew", 4), "Bart");

        let generated = normalize_name("   ", 24);
        assert!(!generated.trim().is_empty());
        assert!(generated.chars().count() <= 24);
    }

    #[tokio::test]
    async fn test_join_rejects_bad_session_id() {
        let store = MemoryStore::new();
        let result = Peer::join(
            Arc::new(store),
            Arc::new(ScriptedOracle::default()),
            Arc::new(GameConfig::default()),
            GameKind::Spy,
            "a/b",
            "Alice",
        )
        .await;
        assert!(matches!(result, Err(GameError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_join_writes_record_and_epoch() {
        let store = MemoryStore::new();
        let oracle = Arc::new(ScriptedOracle::default());
        let alice = join(&store, &oracle, GameKind::Quest, "Alice").await;

        let tree = store.dump().await;
        let session = &tree["prompt-quest"]["test-session"];
        assert_eq!(session["players"][alice.id()]["name"], "Alice");
        assert!(session["matchId"].is_string());
        assert_eq!(session["hostId"], json!(alice.id()));
    }

    #[tokio::test]
    async fn test_submit_outside_round_is_rejected() {
        let store = MemoryStore::new();
        let oracle = Arc::new(ScriptedOracle::default());
        let alice = join(&store, &oracle, GameKind::Quest, "Alice").await;

        let err = alice.submit_response("hello").await.unwrap_err();
        assert!(matches!(err, GameError::WrongPhase { .. }));
        assert!(alice.view().last_error.is_some());
    }

    #[tokio::test]
    async fn test_submit_once_per_round() {
        let store = MemoryStore::new();
        let oracle = Arc::new(ScriptedOracle::default());
        let alice = join(&store, &oracle, GameKind::Quest, "Alice").await;
        let bob = join(&store, &oracle, GameKind::Quest, "Bob").await;

        alice.wait_for(WAIT, |v| v.roster.len() == 2).await.unwrap();
        alice.start_round().await.unwrap();
        bob.wait_for(WAIT, |v| v.phase() == Phase::AwaitingResponses)
            .await
            .unwrap();

        assert!(matches!(
            bob.submit_response("   ").await,
            Err(GameError::InvalidInput(_))
        ));
        bob.submit_response("A haiku about printers").await.unwrap();
        bob.wait_for(WAIT, |v| v.has_responded()).await.unwrap();
        assert!(matches!(
            bob.submit_response("Second thoughts").await,
            Err(GameError::AlreadySubmitted)
        ));

        let view = bob
            .wait_for(WAIT, |v| v.me().is_some_and(|p| p.responded))
            .await
            .unwrap();
        assert_eq!(
            view.responses.get(bob.id()).map(String::as_str),
            Some("A haiku about printers")
        );
        assert!(view.last_error.is_some());
    }
}
