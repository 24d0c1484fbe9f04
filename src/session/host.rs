//! Host authority
//!
//! Exactly one live player is expected to drive phase transitions. The
//! persisted `hostId` wins while it names a roster member; otherwise the
//! senior player (earliest join) is host. Promotion on join is best effort:
//! two simultaneous joiners may both promote themselves, so every host action
//! is either idempotent or guarded by a claim.

use super::paths::{SessionKey, SessionPaths};
use crate::store::{DocumentStore, StoreResult};
use crate::types::{Player, PlayerId};
use serde_json::Value;

/// The senior roster member (roster is kept in join order)
pub fn senior_player(roster: &[Player]) -> Option<&Player> {
    roster.iter().min_by(|a, b| a.seniority().cmp(&b.seniority()))
}

/// Resolve who currently holds host authority
pub fn effective_host<'a>(roster: &'a [Player], stored: Option<&'a PlayerId>) -> Option<&'a PlayerId> {
    match stored {
        Some(id) if roster.iter().any(|p| &p.id == id) => Some(id),
        _ => senior_player(roster).map(|p| &p.id),
    }
}

/// Outcome of the join-time host check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostClaim {
    /// This player became host
    Promoted,
    /// Someone else holds a valid host id
    Existing(PlayerId),
}

/// Write `hostId` for a joining player if none is set or the stored host is
/// no longer in the roster.
pub async fn claim_on_join(
    store: &dyn DocumentStore,
    paths: &SessionPaths,
    me: &PlayerId,
) -> StoreResult<HostClaim> {
    let host_path = paths.key(SessionKey::HostId);

    if store
        .set_if_absent(&host_path, Value::String(me.clone()))
        .await?
    {
        tracing::info!("{} is the first host of {}", me, paths.root());
        return Ok(HostClaim::Promoted);
    }

    let current = store.get(&host_path).await?;
    let current_id = current.as_ref().and_then(Value::as_str).map(str::to_string);
    let players = store.get(&paths.key(SessionKey::Players)).await?;
    let present = match (&current_id, &players) {
        (Some(id), Some(Value::Object(map))) => map.contains_key(id),
        _ => false,
    };

    match current_id {
        Some(id) if present => Ok(HostClaim::Existing(id)),
        stale => {
            tracing::warn!(
                "Stored host {:?} left {}, promoting {}",
                stale,
                paths.root(),
                me
            );
            store.set(&host_path, Value::String(me.clone())).await?;
            Ok(HostClaim::Promoted)
        }
    }
}
