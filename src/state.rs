//! Shared server state behind every browser connection

use crate::config::GameConfig;
use crate::llm::{LlmConfig, LlmManager};
use crate::oracle::{ContentOracle, LlmOracle};
use crate::session::{GameError, Peer};
use crate::store::MemoryStore;
use crate::types::GameKind;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    /// The one store every connected peer coordinates through
    pub store: MemoryStore,
    pub oracle: Arc<dyn ContentOracle>,
    pub game_config: Arc<GameConfig>,
    pub llm: Arc<LlmManager>,
    pub llm_config: LlmConfig,
}

impl AppState {
    /// State whose oracle and prompt endpoint use the given providers.
    /// Without providers every oracle call fails with a configuration error.
    pub fn new_with_llm(
        llm_manager: Option<LlmManager>,
        llm_config: LlmConfig,
        game_config: GameConfig,
    ) -> Self {
        let llm = Arc::new(llm_manager.unwrap_or_else(|| LlmManager::new(Vec::new())));
        let oracle = Arc::new(LlmOracle::new(llm.clone(), &llm_config));
        Self {
            store: MemoryStore::new(),
            oracle,
            game_config: Arc::new(game_config),
            llm,
            llm_config,
        }
    }

    /// Swap the content oracle, keeping everything else
    pub fn with_oracle(mut self, oracle: Arc<dyn ContentOracle>) -> Self {
        self.oracle = oracle;
        self
    }

    /// Start a peer for one browser connection
    pub async fn join_peer(
        &self,
        kind: GameKind,
        session_id: &str,
        name: &str,
    ) -> Result<Peer, GameError> {
        Peer::join(
            Arc::new(self.store.clone()),
            self.oracle.clone(),
            self.game_config.clone(),
            kind,
            session_id,
            name,
        )
        .await
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new_with_llm(None, LlmConfig::default(), GameConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;

    #[tokio::test]
    async fn test_default_state_has_no_oracle() {
        let state = AppState::default();
        let err = state.oracle.challenge(GameKind::Spy).await.unwrap_err();
        assert!(matches!(err, LlmError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_peers_share_the_store() {
        let state = AppState::default();
        let alice = state
            .join_peer(GameKind::Quest, "lunch", "Alice")
            .await
            .unwrap();
        let bob = state.join_peer(GameKind::Quest, "lunch", "Bob").await.unwrap();

        let view = bob
            .wait_for(std::time::Duration::from_secs(2), |v| v.roster.len() == 2)
            .await
            .unwrap();
        assert_eq!(view.host(), Some(alice.id()));

        let result = state.join_peer(GameKind::Quest, "", "Carol").await;
        assert!(matches!(result, Err(GameError::InvalidInput(_))));
    }
}
