//! Epoch reset protocol
//!
//! `roundId` and `matchId` are opaque tokens regenerated by the host. Only a
//! change of value matters: it tells every peer to drop its round- or
//! match-scoped projection. The tracker remembers the last value seen so
//! duplicate notifications are ignored.

use crate::types::EpochToken;

/// Mint a fresh epoch token
pub fn mint() -> EpochToken {
    ulid::Ulid::new().to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum Observed {
    #[default]
    Unseen,
    Seen(Option<EpochToken>),
}

/// What an epoch notification means for the local projection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochChange {
    /// Same value as before (duplicate delivery)
    Unchanged,
    /// Initial sync: nothing cached yet that could be stale
    FirstSeen,
    /// New epoch: scoped state must be discarded
    Reset,
}

/// Last-seen `roundId`/`matchId` of one peer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpochTracker {
    round: Observed,
    matched: Observed,
}

impl EpochTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe_round(&mut self, token: Option<EpochToken>) -> EpochChange {
        observe(&mut self.round, token)
    }

    pub fn observe_match(&mut self, token: Option<EpochToken>) -> EpochChange {
        observe(&mut self.matched, token)
    }

    pub fn round_id(&self) -> Option<&EpochToken> {
        match &self.round {
            Observed::Seen(token) => token.as_ref(),
            Observed::Unseen => None,
        }
    }

    pub fn match_id(&self) -> Option<&EpochToken> {
        match &self.matched {
            Observed::Seen(token) => token.as_ref(),
            Observed::Unseen => None,
        }
    }
}

fn observe(slot: &mut Observed, token: Option<EpochToken>) -> EpochChange {
    let next = Observed::Seen(token);
    if *slot == next {
        return EpochChange::Unchanged;
    }
    let change = match slot {
        Observed::Unseen => EpochChange::FirstSeen,
        Observed::Seen(_) => EpochChange::Reset,
    };
    *slot = next;
    change
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_observation_does_not_reset() {
        let mut tracker = EpochTracker::new();
        assert_eq!(
            tracker.observe_round(Some("r1".into())),
            EpochChange::FirstSeen
        );
        assert_eq!(tracker.round_id(), Some(&"r1".to_string()));
    }

    #[test]
    fn test_absent_then_present_is_a_reset() {
        let mut tracker = EpochTracker::new();
        assert_eq!(tracker.observe_round(None), EpochChange::FirstSeen);
        assert_eq!(tracker.observe_round(Some("r1".into())), EpochChange::Reset);
    }

    #[test]
    fn test_duplicate_is_unchanged() {
        let mut tracker = EpochTracker::new();
        tracker.observe_match(Some("m1".into()));
        assert_eq!(
            tracker.observe_match(Some("m1".into())),
            EpochChange::Unchanged
        );
        assert_eq!(tracker.observe_match(Some("m2".into())), EpochChange::Reset);
        assert_eq!(tracker.match_id(), Some(&"m2".to_string()));
    }

    #[test]
    fn test_minted_tokens_differ() {
        assert_ne!(mint(), mint());
    }
}
