//! Session coordination for one peer.
//!
//! A [`Peer`] is one player's client logic. It owns nothing but its local
//! projection; all shared state lives in the [`DocumentStore`]. Each peer
//! subscribes to every session key, folds notifications through the reducer
//! in [`view`], and runs [`Peer::drive`] after every change to perform the
//! transitions it is responsible for.

mod game;
pub mod epoch;
pub mod host;
pub mod paths;
mod player;
mod round;
pub mod score;
pub mod timeout;
pub mod view;
pub mod vote;

use crate::config::GameConfig;
use crate::llm::LlmError;
use crate::oracle::ContentOracle;
use crate::store::{DocumentStore, StoreError};
use crate::types::*;
use paths::SessionPaths;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use view::SessionView;

pub use paths::{validate_session_id, SessionKey};
pub use view::{reduce, Applied, SessionEvent};

/// Errors returned by peer actions
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Only the host can {0}")]
    NotHost(&'static str),

    #[error("Cannot {action} during {phase:?}")]
    WrongPhase { action: &'static str, phase: Phase },

    #[error("Need at least {need} players, have {have}")]
    NotEnoughPlayers { need: usize, have: usize },

    #[error("Player {0} is not taking part in this round")]
    NotParticipant(PlayerId),

    #[error("Already submitted a response this round")]
    AlreadySubmitted,

    #[error("Already voted this round")]
    AlreadyVoted,

    #[error("Players cannot vote for themselves")]
    SelfVote,

    #[error("Only available in {0:?} sessions")]
    WrongGame(GameKind),

    #[error("Another peer is already handling {0}")]
    Contended(&'static str),

    #[error("Timed out waiting for the session")]
    Timeout,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Oracle(#[from] LlmError),
}

impl GameError {
    /// Stable code for wire error messages
    pub fn code(&self) -> &'static str {
        match self {
            GameError::InvalidInput(_) => "INVALID_INPUT",
            GameError::NotHost(_) => "UNAUTHORIZED",
            GameError::WrongPhase { .. } => "WRONG_PHASE",
            GameError::NotEnoughPlayers { .. } => "NOT_ENOUGH_PLAYERS",
            GameError::NotParticipant(_) => "NOT_PARTICIPANT",
            GameError::AlreadySubmitted => "ALREADY_SUBMITTED",
            GameError::AlreadyVoted => "ALREADY_VOTED",
            GameError::SelfVote => "SELF_VOTE",
            GameError::WrongGame(_) => "WRONG_GAME",
            GameError::Contended(_) => "CONTENDED",
            GameError::Timeout => "TIMEOUT",
            GameError::Store(_) => "STORE_ERROR",
            GameError::Oracle(_) => "ORACLE_ERROR",
        }
    }
}

/// Aborts a peer's background tasks once the last handle is dropped
struct TaskGuard {
    handles: Vec<JoinHandle<()>>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

/// One player's coordinator
#[derive(Clone)]
pub struct Peer {
    store: Arc<dyn DocumentStore>,
    oracle: Arc<dyn ContentOracle>,
    config: Arc<GameConfig>,
    paths: SessionPaths,
    kind: GameKind,
    me: PlayerId,
    view: Arc<watch::Sender<SessionView>>,
    wake: Arc<Notify>,
    tasks: Option<Arc<TaskGuard>>,
}

impl Peer {
    fn new(
        store: Arc<dyn DocumentStore>,
        oracle: Arc<dyn ContentOracle>,
        config: Arc<GameConfig>,
        paths: SessionPaths,
        kind: GameKind,
        me: PlayerId,
        view: SessionView,
    ) -> Self {
        let (tx, _rx) = watch::channel(view);
        Self {
            store,
            oracle,
            config,
            paths,
            kind,
            me,
            view: Arc::new(tx),
            wake: Arc::new(Notify::new()),
            tasks: None,
        }
    }

    /// Clone for background tasks; does not keep them alive
    fn detached(&self) -> Self {
        Self {
            tasks: None,
            ..self.clone()
        }
    }

    pub fn id(&self) -> &PlayerId {
        &self.me
    }

    pub fn kind(&self) -> GameKind {
        self.kind
    }

    pub fn paths(&self) -> &SessionPaths {
        &self.paths
    }

    /// Current local projection
    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    /// Receive every update of the local projection
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.subscribe()
    }

    /// Wait until the local projection satisfies `pred`
    pub async fn wait_for<F>(&self, timeout: Duration, mut pred: F) -> Result<SessionView, GameError>
    where
        F: FnMut(&SessionView) -> bool,
    {
        let mut rx = self.subscribe();
        let wait = async {
            loop {
                {
                    let view = rx.borrow_and_update();
                    if pred(&view) {
                        return Ok(view.clone());
                    }
                }
                if rx.changed().await.is_err() {
                    return Err(GameError::Timeout);
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| GameError::Timeout)?
    }

    /// Fresh projection built from a one-shot read of the whole session.
    /// Transitions decide on this, never on the incrementally built view.
    pub async fn snapshot(&self) -> Result<SessionView, StoreError> {
        let snapshot = self.store.get(self.paths.root()).await?;
        Ok(SessionView::from_snapshot(
            self.kind,
            self.me.clone(),
            snapshot.as_ref(),
        ))
    }

    fn record_error(&self, error: &GameError) {
        let message = error.to_string();
        self.view
            .send_modify(|view| view.last_error = Some(message));
    }

    fn clear_error(&self) {
        self.view.send_if_modified(|view| view.last_error.take().is_some());
    }

    /// Run an action, keeping `last_error` in sync with its outcome
    async fn tracked<T>(
        &self,
        action: impl std::future::Future<Output = Result<T, GameError>>,
    ) -> Result<T, GameError> {
        match action.await {
            Ok(value) => {
                self.clear_error();
                Ok(value)
            }
            Err(e) => {
                tracing::warn!("Action failed for {}: {}", self.me, e);
                self.record_error(&e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::oracle::tests::ScriptedOracle;
    use crate::store::MemoryStore;

    pub(crate) const WAIT: Duration = Duration::from_secs(2);

    /// Rounds only advance when a test asks for it
    pub(crate) fn manual_config() -> GameConfig {
        GameConfig {
            auto_next_round: false,
            ..GameConfig::default()
        }
    }

    pub(crate) async fn join(
        store: &MemoryStore,
        oracle: &Arc<ScriptedOracle>,
        kind: GameKind,
        name: &str,
    ) -> Peer {
        join_with(store, oracle, manual_config(), kind, name).await
    }

    pub(crate) async fn join_with(
        store: &MemoryStore,
        oracle: &Arc<ScriptedOracle>,
        config: GameConfig,
        kind: GameKind,
        name: &str,
    ) -> Peer {
        let peer = Peer::join(
            Arc::new(store.clone()),
            oracle.clone(),
            Arc::new(config),
            kind,
            "test-session",
            name,
        )
        .await
        .unwrap();
        // Keep join timestamps strictly ordered
        tokio::time::sleep(Duration::from_millis(3)).await;
        peer
    }

    #[tokio::test]
    async fn test_join_registers_player() {
        let store = MemoryStore::new();
        let oracle = Arc::new(ScriptedOracle::default());
        let alice = join(&store, &oracle, GameKind::Quest, "Alice").await;

        let view = alice
            .wait_for(WAIT, |v| v.me().is_some())
            .await
            .unwrap();
        assert_eq!(view.me().unwrap().name, "Alice");
        assert_eq!(view.phase(), Phase::Lobby);
        assert!(view.is_host());
        assert!(view.match_id().is_some());
    }

    #[tokio::test]
    async fn test_second_peer_sees_first() {
        let store = MemoryStore::new();
        let oracle = Arc::new(ScriptedOracle::default());
        let alice = join(&store, &oracle, GameKind::Spy, "Alice").await;
        let bob = join(&store, &oracle, GameKind::Spy, "Bob").await;

        let view = alice
            .wait_for(WAIT, |v| v.roster.len() == 2)
            .await
            .unwrap();
        assert_eq!(view.roster[0].name, "Alice");
        assert_eq!(view.roster[1].name, "Bob");

        let bob_view = bob.wait_for(WAIT, |v| v.roster.len() == 2).await.unwrap();
        assert!(!bob_view.is_host());
        assert_eq!(bob_view.host(), Some(alice.id()));
    }

    #[tokio::test]
    async fn test_dropping_peer_stops_subscriptions() {
        let store = MemoryStore::new();
        let oracle = Arc::new(ScriptedOracle::default());
        let alice = join(&store, &oracle, GameKind::Quest, "Alice").await;
        assert_eq!(store.watcher_count().await, SessionKey::WATCHED.len());

        drop(alice);
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.watcher_count().await, 0);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(GameError::NotHost("start a round").code(), "UNAUTHORIZED");
        assert_eq!(
            GameError::NotHost("start a round").to_string(),
            "Only the host can start a round"
        );
        assert_eq!(GameError::SelfVote.code(), "SELF_VOTE");
    }
}
