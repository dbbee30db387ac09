//! Balance Store
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    LEDGER                                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  mod.rs    - BalanceStore trait, LedgerError                 │
//! │  memory.rs - In-memory store with idempotency + faucet       │
//! │  retry.rs  - Bounded exponential backoff                     │
//! │  settler.rs - Off-task settlement, parked credit redelivery  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Balances live outside the round logic. Every write carries an
//! `IdempotencyKey`; replaying a key that was already applied succeeds
//! without moving money a second time.

use async_trait::async_trait;
use thiserror::Error;

use crate::core::clock::Millis;
use crate::core::units::Tokens;
use crate::game::bet::UserId;
use crate::game::settlement::{IdempotencyKey, SettlementInstruction, SettlementKind};

pub mod memory;
pub mod retry;
pub mod settler;

pub use memory::{InMemoryBalanceStore, CLAIM_AMOUNT, CLAIM_INTERVAL_MS, KEY_RETENTION_ROUNDS};
pub use retry::{apply_with_retry, RetryPolicy};
pub use settler::Settler;

/// Balance store errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    /// Debit larger than the balance. Not retried.
    #[error("insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds {
        /// Current balance.
        available: Tokens,
        /// Requested debit.
        requested: Tokens,
    },

    /// Store unreachable or timed out. Retried.
    #[error("balance store unavailable: {0}")]
    Unavailable(String),

    /// Faucet claimed too recently.
    #[error("claim too early, retry in {retry_after_ms}ms")]
    ClaimTooEarly {
        /// Milliseconds until the next claim is allowed.
        retry_after_ms: Millis,
    },
}

impl LedgerError {
    /// Worth retrying?
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Atomic, durable account balances.
#[async_trait]
pub trait BalanceStore: Send + Sync {
    /// Current balance (zero for unknown users).
    async fn balance(&self, user_id: &UserId) -> Result<Tokens, LedgerError>;

    /// Take `amount` from the user, once per key.
    async fn debit(&self, key: &IdempotencyKey, amount: Tokens) -> Result<Tokens, LedgerError>;

    /// Give `amount` to the user, once per key.
    async fn credit(&self, key: &IdempotencyKey, amount: Tokens) -> Result<Tokens, LedgerError>;

    /// Faucet grant. Stores without a faucet refuse.
    async fn claim(&self, user_id: &UserId, now: Millis) -> Result<Tokens, LedgerError> {
        let _ = (user_id, now);
        Err(LedgerError::Unavailable("faucet not supported".into()))
    }

    /// Apply a settlement instruction. Returns the new balance.
    async fn apply(&self, instruction: &SettlementInstruction) -> Result<Tokens, LedgerError> {
        match instruction.kind {
            SettlementKind::Debit => self.debit(&instruction.key, instruction.amount).await,
            SettlementKind::Credit => self.credit(&instruction.key, instruction.amount).await,
        }
    }
}
