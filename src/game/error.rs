//! Round and settlement errors.

use thiserror::Error;

use crate::fairness::FairnessError;
use crate::ledger::LedgerError;

/// Errors surfaced to a single bet/cashout request.
///
/// None of these change round state; the round keeps running.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GameError {
    /// Server seed missing, malformed or too short. Fatal to starting a round.
    #[error("invalid seed: {0}")]
    InvalidSeed(String),

    /// Client seed contribution rejected.
    #[error("invalid client seed: {0}")]
    InvalidClientSeed(String),

    /// No round is accepting requests, or the request names another round.
    #[error("round not running")]
    RoundNotRunning,

    /// User already holds a bet in this round.
    #[error("duplicate bet")]
    DuplicateBet,

    /// Bet amount or auto-cashout target is not acceptable.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// User has no open bet to cash out.
    #[error("no open bet")]
    NoOpenBet,

    /// Balance store refused the debit.
    #[error("insufficient funds")]
    InsufficientFunds,

    /// Balance store unreachable after retries.
    #[error("balance store unavailable: {0}")]
    BalanceStoreUnavailable(String),

    /// A round is already live; a new one cannot start yet.
    #[error("round already in progress")]
    RoundInProgress,

    /// Round owner task has stopped.
    #[error("round owner stopped")]
    OwnerStopped,
}

impl From<FairnessError> for GameError {
    fn from(err: FairnessError) -> Self {
        match err {
            FairnessError::InvalidSeed(reason) => GameError::InvalidSeed(reason),
            FairnessError::InvalidClientSeed(reason) => GameError::InvalidClientSeed(reason),
        }
    }
}

impl From<LedgerError> for GameError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientFunds { .. } => GameError::InsufficientFunds,
            LedgerError::Unavailable(reason) => GameError::BalanceStoreUnavailable(reason),
            other @ LedgerError::ClaimTooEarly { .. } => {
                GameError::BalanceStoreUnavailable(other.to_string())
            }
        }
    }
}
