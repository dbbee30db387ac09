//! Round Events
//!
//! Events produced by the round engine and fanned out to connections.
//! Delivery is best effort: a slow or missing subscriber never stalls the
//! round owner.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::core::clock::Millis;
use crate::core::units::{CrashPoint, Multiplier, Tokens};
use crate::fairness::client_seed::SeedContribution;
use crate::fairness::seed::SeedCommitment;
use crate::game::bet::UserId;
use crate::game::round::RoundId;

/// Something observable happened in the round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RoundEvent {
    /// New round running; the seed commitment is public from here on.
    RoundStarted {
        /// Round id.
        round_id: RoundId,
        /// SHA-256 of the (still secret) server seed.
        seed_hash: SeedCommitment,
        /// Client seed of this round (base seed or folded contributions).
        client_seed: String,
        /// Player contributions folded into `client_seed`.
        contributions: Vec<SeedContribution>,
        /// Commitment of the next round's server seed.
        next_seed_hash: Option<SeedCommitment>,
        /// Start instant.
        start_time: Millis,
    },

    /// Round crashed; the seed is revealed.
    RoundCrashed {
        /// Round id.
        round_id: RoundId,
        /// Final multiplier.
        crash_point: CrashPoint,
        /// Revealed server seed.
        server_seed: String,
        /// Client seed used.
        client_seed: String,
        /// Nonce used.
        nonce: u64,
        /// Crash instant.
        end_time: Millis,
    },

    /// A bet was cashed out.
    CashedOut {
        /// Bet owner.
        user_id: UserId,
        /// Round.
        round_id: RoundId,
        /// Settlement multiplier.
        multiplier: Multiplier,
        /// Amount credited.
        win_amount: Tokens,
        /// Triggered by the auto-cashout target.
        auto: bool,
    },

    /// A bet was still open at the crash.
    BetLost {
        /// Bet owner.
        user_id: UserId,
        /// Round.
        round_id: RoundId,
        /// Stake forfeited.
        amount: Tokens,
    },
}

impl RoundEvent {
    /// Round the event belongs to.
    pub fn round_id(&self) -> RoundId {
        match self {
            Self::RoundStarted { round_id, .. }
            | Self::RoundCrashed { round_id, .. }
            | Self::CashedOut { round_id, .. }
            | Self::BetLost { round_id, .. } => *round_id,
        }
    }

    /// User the event is addressed to, if any.
    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Self::CashedOut { user_id, .. } | Self::BetLost { user_id, .. } => Some(user_id),
            _ => None,
        }
    }
}

/// Broadcast failure. Logged by the owner, never fatal.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BroadcastError {
    /// Nobody is listening.
    #[error("no subscribers")]
    NoSubscribers,

    /// Transport-specific failure.
    #[error("broadcast failed: {0}")]
    Failed(String),
}

/// Fan-out seam for round events.
pub trait RoundBroadcaster: Send + Sync {
    /// Publish one event.
    fn publish(&self, event: RoundEvent) -> Result<(), BroadcastError>;
}

impl RoundBroadcaster for broadcast::Sender<RoundEvent> {
    fn publish(&self, event: RoundEvent) -> Result<(), BroadcastError> {
        self.send(event)
            .map(|_| ())
            .map_err(|_| BroadcastError::NoSubscribers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started() -> RoundEvent {
        RoundEvent::RoundStarted {
            round_id: 1,
            seed_hash: SeedCommitment::from_hex("00"),
            client_seed: "abc".into(),
            contributions: Vec::new(),
            next_seed_hash: None,
            start_time: 0,
        }
    }

    #[test]
    fn test_event_json_tag() {
        let event = RoundEvent::BetLost {
            user_id: UserId::new("alice"),
            round_id: 4,
            amount: Tokens::from_cents(250),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "bet_lost");
        assert_eq!(json["amount"], serde_json::json!(2.5));
        assert_eq!(event.round_id(), 4);
        assert_eq!(event.user_id(), Some(&UserId::new("alice")));
    }

    #[test]
    fn test_broadcast_sender_without_subscribers() {
        let (tx, rx) = broadcast::channel::<RoundEvent>(4);
        drop(rx);
        let event = started();
        assert_eq!(tx.publish(event), Err(BroadcastError::NoSubscribers));
    }

    #[test]
    fn test_broadcast_sender_delivers() {
        let (tx, mut rx) = broadcast::channel::<RoundEvent>(4);
        let event = started();
        tx.publish(event.clone()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), event);
    }
}
