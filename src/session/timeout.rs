use super::Peer;
use crate::types::{EpochToken, Phase};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Phase plus round: a timer restarts whenever either changes
fn marker(peer_view: &super::view::SessionView) -> (Phase, Option<EpochToken>) {
    (peer_view.phase(), peer_view.round_id().cloned())
}

fn is_timed(phase: Phase) -> bool {
    matches!(phase, Phase::AwaitingResponses | Phase::Voting)
}

/// Spawn a background task that applies the default action to a response
/// or voting phase that stays unchanged for `timeout`. Only the host acts.
pub fn spawn_phase_timeout_watcher(peer: Peer, timeout: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut rx = peer.subscribe();

        loop {
            let current = marker(&rx.borrow_and_update());
            if !is_timed(current.0) {
                if rx.changed().await.is_err() {
                    break;
                }
                continue;
            }

            let deadline = tokio::time::sleep(timeout);
            tokio::pin!(deadline);
            let expired = loop {
                tokio::select! {
                    _ = &mut deadline => break true,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        let next = marker(&rx.borrow_and_update());
                        if next != current {
                            break false;
                        }
                    }
                }
            };
            if !expired {
                continue;
            }

            match peer.expire_phase().await {
                Ok(true) => tracing::info!("{:?} timed out for {}", current.0, peer.id()),
                Ok(false) => {}
                Err(e) => tracing::warn!("Timeout action failed for {}: {}", peer.id(), e),
            }
            // Wait for the next change instead of re-arming the same phase
            if rx.changed().await.is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::oracle::tests::ScriptedOracle;
    use crate::session::tests::{join_with, manual_config, WAIT};
    use crate::store::MemoryStore;
    use crate::types::{GameKind, NO_RESPONSE};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_stalled_responses_are_filled() {
        let store = MemoryStore::new();
        let oracle = Arc::new(ScriptedOracle::default());
        let config = GameConfig {
            phase_timeout: Some(Duration::from_millis(100)),
            ..manual_config()
        };
        let alice = join_with(&store, &oracle, config.clone(), GameKind::Quest, "Alice").await;
        let bob = join_with(&store, &oracle, config, GameKind::Quest, "Bob").await;
        alice.wait_for(WAIT, |v| v.roster.len() == 2).await.unwrap();

        alice.start_round().await.unwrap();
        alice
            .wait_for(WAIT, |v| v.phase() == Phase::AwaitingResponses)
            .await
            .unwrap();
        alice.submit_response("Mine is done").await.unwrap();

        // Bob never answers; the host fills in and the round gets scored
        let view = alice
            .wait_for(WAIT, |v| v.phase() == Phase::Resolved)
            .await
            .unwrap();
        assert_eq!(
            view.responses.get(bob.id()).map(String::as_str),
            Some(NO_RESPONSE)
        );
        assert_eq!(view.scores.len(), 2);
    }
}
