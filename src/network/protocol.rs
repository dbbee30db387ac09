//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! All messages are JSON text frames tagged with `"type"`.

use serde::{Deserialize, Serialize};

use crate::core::clock::Millis;
use crate::core::units::{CrashPoint, Multiplier, Tokens, UnitError};
use crate::fairness::client_seed::SeedContribution;
use crate::fairness::seed::SeedCommitment;
use crate::game::engine::{BetRequest, RoundSnapshot};
use crate::game::error::GameError;
use crate::game::events::RoundEvent;
use crate::game::round::{RoundId, RoundStatus};
use crate::game::bet::UserId;
use crate::ledger::LedgerError;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Place a bet in the live round.
    PlaceBet(PlaceBet),

    /// Cash out the open bet.
    Cashout {
        /// Bettor.
        user_id: String,
    },

    /// Read the account balance.
    Balance {
        /// Account.
        user_id: String,
    },

    /// Claim the periodic faucet grant.
    Claim {
        /// Account.
        user_id: String,
    },

    /// Contribute to the next round's client seed.
    ClientSeed {
        /// Contributor.
        user_id: String,
        /// Printable ASCII, at most 64 bytes.
        client_seed: String,
    },

    /// Request the current round (late joiners).
    Sync,

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },
}

/// Bet request as sent by the client.
///
/// Amounts stay floats on the wire and are converted with validation, so
/// a bad amount is answered with `invalid_amount` rather than a parse error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceBet {
    /// Bettor.
    pub user_id: String,
    /// Round the client believes is live.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_id: Option<RoundId>,
    /// Stake in tokens.
    pub bet_amount: f64,
    /// Auto-cashout multiplier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_cashout: Option<f64>,
}

impl PlaceBet {
    /// Convert to an engine request.
    pub fn to_request(&self) -> Result<BetRequest, GameError> {
        let invalid = |e: UnitError| GameError::InvalidAmount(e.to_string());
        let amount = Tokens::try_from(self.bet_amount).map_err(invalid)?;
        let auto_cashout = self
            .auto_cashout
            .map(Multiplier::try_from)
            .transpose()
            .map_err(invalid)?;

        Ok(BetRequest {
            user_id: UserId::new(self.user_id.clone()),
            round_id: self.round_id,
            amount,
            auto_cashout,
        })
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A new round is running.
    RoundStart {
        /// Round id.
        round_id: RoundId,
        /// SHA-256 of the server seed.
        seed_hash: SeedCommitment,
        /// Client seed of this round.
        client_seed: String,
        /// Contributions folded into `client_seed`.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        contributions: Vec<SeedContribution>,
        /// Commitment of the next round's server seed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_seed_hash: Option<SeedCommitment>,
        /// Start instant (ms).
        start_time: Millis,
    },

    /// The round crashed; seed revealed.
    RoundCrash {
        /// Round id.
        round_id: RoundId,
        /// Final multiplier.
        crash_point: CrashPoint,
        /// Revealed server seed.
        server_seed: String,
        /// Client seed.
        client_seed: String,
        /// Nonce.
        nonce: u64,
    },

    /// A bet was cashed out.
    CashoutResult {
        /// Bettor.
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

    /// Bet recorded and debited.
    BetAccepted {
        /// Bettor.
        user_id: UserId,
        /// Round.
        round_id: RoundId,
        /// Stake.
        bet_amount: Tokens,
        /// Auto-cashout target.
        #[serde(skip_serializing_if = "Option::is_none")]
        auto_cashout: Option<Multiplier>,
    },

    /// Client seed contribution recorded.
    ClientSeedAccepted {
        /// Contributor.
        user_id: UserId,
        /// Round the contribution goes into.
        round_id: RoundId,
        /// Server seed commitment that round is already bound to.
        seed_hash: SeedCommitment,
    },

    /// Current round view.
    RoundState(RoundState),

    /// Account balance.
    Balance {
        /// Account.
        user_id: UserId,
        /// Balance.
        balance: Tokens,
    },

    /// Pong response.
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
        /// Server time (ms).
        server_time: u64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Reason.
        reason: String,
    },
}

/// Round view for `sync`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundState {
    /// Round id.
    pub round_id: RoundId,
    /// Status.
    pub status: RoundStatus,
    /// Live multiplier.
    pub multiplier: Multiplier,
    /// Seed commitment.
    pub seed_hash: SeedCommitment,
    /// Start instant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Millis>,
    /// Bets still riding.
    pub open_bets: usize,
    /// Crash point, once crashed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crash_point: Option<CrashPoint>,
    /// Commitment of the next round's server seed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_seed_hash: Option<SeedCommitment>,
}

impl From<RoundSnapshot> for RoundState {
    fn from(s: RoundSnapshot) -> Self {
        Self {
            round_id: s.round_id,
            status: s.status,
            multiplier: s.multiplier,
            seed_hash: s.seed_hash,
            start_time: s.start_time,
            open_bets: s.open_bets,
            crash_point: s.crash_point,
            next_seed_hash: s.next_seed_hash,
        }
    }
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

impl ServerError {
    /// Build an error frame.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed message.
    InvalidInput,
    /// Round could not start (seed rejected).
    InvalidSeed,
    /// Client seed contribution rejected.
    InvalidClientSeed,
    /// No round accepting requests.
    RoundNotRunning,
    /// One bet per user per round.
    DuplicateBet,
    /// Bad stake or auto-cashout target.
    InvalidAmount,
    /// Nothing to cash out.
    NoOpenBet,
    /// Balance too low.
    InsufficientFunds,
    /// Balance store unreachable.
    BalanceStoreUnavailable,
    /// Faucet claimed too recently.
    ClaimTooEarly,
    /// Server overloaded.
    ServerOverloaded,
    /// Internal error.
    InternalError,
}

impl From<&GameError> for ServerError {
    fn from(err: &GameError) -> Self {
        let code = match err {
            GameError::InvalidSeed(_) => ErrorCode::InvalidSeed,
            GameError::InvalidClientSeed(_) => ErrorCode::InvalidClientSeed,
            GameError::RoundNotRunning | GameError::RoundInProgress => ErrorCode::RoundNotRunning,
            GameError::DuplicateBet => ErrorCode::DuplicateBet,
            GameError::InvalidAmount(_) => ErrorCode::InvalidAmount,
            GameError::NoOpenBet => ErrorCode::NoOpenBet,
            GameError::InsufficientFunds => ErrorCode::InsufficientFunds,
            GameError::BalanceStoreUnavailable(_) => ErrorCode::BalanceStoreUnavailable,
            GameError::OwnerStopped => ErrorCode::InternalError,
        };
        Self::new(code, err.to_string())
    }
}

impl From<&LedgerError> for ServerError {
    fn from(err: &LedgerError) -> Self {
        let code = match err {
            LedgerError::InsufficientFunds { .. } => ErrorCode::InsufficientFunds,
            LedgerError::Unavailable(_) => ErrorCode::BalanceStoreUnavailable,
            LedgerError::ClaimTooEarly { .. } => ErrorCode::ClaimTooEarly,
        };
        Self::new(code, err.to_string())
    }
}

impl ServerMessage {
    /// Client-facing form of a round event. Losses are implied by the crash.
    pub fn from_round_event(event: &RoundEvent) -> Option<Self> {
        match event {
            RoundEvent::RoundStarted {
                round_id,
                seed_hash,
                client_seed,
                contributions,
                next_seed_hash,
                start_time,
            } => Some(Self::RoundStart {
                round_id: *round_id,
                seed_hash: seed_hash.clone(),
                client_seed: client_seed.clone(),
                contributions: contributions.clone(),
                next_seed_hash: next_seed_hash.clone(),
                start_time: *start_time,
            }),
            RoundEvent::RoundCrashed {
                round_id,
                crash_point,
                server_seed,
                client_seed,
                nonce,
                ..
            } => Some(Self::RoundCrash {
                round_id: *round_id,
                crash_point: *crash_point,
                server_seed: server_seed.clone(),
                client_seed: client_seed.clone(),
                nonce: *nonce,
            }),
            RoundEvent::CashedOut {
                user_id,
                round_id,
                multiplier,
                win_amount,
                auto,
            } => Some(Self::CashoutResult {
                user_id: user_id.clone(),
                round_id: *round_id,
                multiplier: *multiplier,
                win_amount: *win_amount,
                auto: *auto,
            }),
            RoundEvent::BetLost { .. } => None,
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_place_bet_from_json() {
        let msg = ClientMessage::from_json(
            r#"{"type":"place_bet","user_id":"u1","bet_amount":10.5,"auto_cashout":2.0}"#,
        )
        .unwrap();

        let ClientMessage::PlaceBet(bet) = msg else {
            panic!("Wrong message type");
        };
        let request = bet.to_request().unwrap();
        assert_eq!(request.user_id.as_str(), "u1");
        assert_eq!(request.round_id, None);
        assert_eq!(request.amount, Tokens::from_cents(1050));
        assert_eq!(request.auto_cashout, Some(Multiplier::from_thousandths(2000)));
    }

    #[test]
    fn test_bad_amounts_map_to_invalid_amount() {
        let negative = PlaceBet {
            user_id: "u1".into(),
            round_id: Some(3),
            bet_amount: -1.0,
            auto_cashout: None,
        };
        assert!(matches!(negative.to_request(), Err(GameError::InvalidAmount(_))));

        let low_target = PlaceBet {
            auto_cashout: Some(0.5),
            bet_amount: 1.0,
            ..negative
        };
        assert!(matches!(low_target.to_request(), Err(GameError::InvalidAmount(_))));
    }

    #[test]
    fn test_simple_client_messages() {
        assert_eq!(ClientMessage::from_json(r#"{"type":"sync"}"#).unwrap(), ClientMessage::Sync);
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"cashout","user_id":"u9"}"#).unwrap(),
            ClientMessage::Cashout { user_id: "u9".into() }
        );
        assert!(ClientMessage::from_json(r#"{"type":"teleport"}"#).is_err());
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"client_seed","user_id":"u9","client_seed":"lucky"}"#)
                .unwrap(),
            ClientMessage::ClientSeed {
                user_id: "u9".into(),
                client_seed: "lucky".into(),
            }
        );
    }

    #[test]
    fn test_round_start_carries_seed_schedule() {
        let start = RoundEvent::RoundStarted {
            round_id: 3,
            seed_hash: SeedCommitment::from_hex("aa"),
            client_seed: "abc".into(),
            contributions: vec![SeedContribution {
                user_id: UserId::new("u1"),
                client_seed: "lucky".into(),
            }],
            next_seed_hash: Some(SeedCommitment::from_hex("bb")),
            start_time: 10,
        };
        let json = serde_json::to_value(ServerMessage::from_round_event(&start).unwrap()).unwrap();
        assert_eq!(json["type"], "round_start");
        assert_eq!(json["seed_hash"], "aa");
        assert_eq!(json["next_seed_hash"], "bb");
        assert_eq!(json["contributions"][0]["client_seed"], "lucky");

        let err = ServerError::from(&GameError::InvalidClientSeed("empty".into()));
        assert_eq!(serde_json::to_value(err.code).unwrap(), "invalid_client_seed");
    }

    #[test]
    fn test_round_events_on_the_wire() {
        let crash = RoundEvent::RoundCrashed {
            round_id: 1,
            crash_point: CrashPoint::from_hundredths(112),
            server_seed: "00".repeat(32),
            client_seed: "abc".into(),
            nonce: 0,
            end_time: 120,
        };
        let json = serde_json::to_value(ServerMessage::from_round_event(&crash).unwrap()).unwrap();
        assert_eq!(json["type"], "round_crash");
        assert_eq!(json["crash_point"], json!(1.12));
        assert_eq!(json["server_seed"], "00".repeat(32));

        let lost = RoundEvent::BetLost {
            user_id: UserId::new("u1"),
            round_id: 1,
            amount: Tokens::whole(1),
        };
        assert_eq!(ServerMessage::from_round_event(&lost), None);
    }

    #[test]
    fn test_cashout_result_json() {
        let msg = ServerMessage::CashoutResult {
            user_id: UserId::new("u1"),
            round_id: 4,
            multiplier: Multiplier::from_thousandths(2000),
            win_amount: Tokens::whole(20),
            auto: true,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "cashout_result");
        assert_eq!(json["win_amount"], json!(20.0));
        assert_eq!(ServerMessage::from_json(&msg.to_json().unwrap()).unwrap(), msg);
    }

    #[test]
    fn test_error_codes() {
        let err = ServerError::from(&GameError::DuplicateBet);
        assert_eq!(err.code, ErrorCode::DuplicateBet);
        let json = serde_json::to_value(ServerMessage::Error(err)).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "duplicate_bet");

        let early = ServerError::from(&LedgerError::ClaimTooEarly { retry_after_ms: 5 });
        assert_eq!(early.code, ErrorCode::ClaimTooEarly);
    }
}
