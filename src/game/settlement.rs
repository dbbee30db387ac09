//! Settlement Instructions
//!
//! The round logic never touches balances. It emits debit/credit
//! instructions keyed by `(user_id, round_id, action)`; the round owner
//! applies them to the balance store, retrying with the same key.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::units::Tokens;
use crate::game::bet::UserId;
use crate::game::round::RoundId;

/// Why money moves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementAction {
    /// Stake taken when the bet is placed.
    Bet,
    /// Winnings paid on cashout (manual or automatic).
    Cashout,
    /// Stake returned when a debited bet could not be recorded.
    Refund,
}

impl fmt::Display for SettlementAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bet => f.write_str("bet"),
            Self::Cashout => f.write_str("cashout"),
            Self::Refund => f.write_str("refund"),
        }
    }
}

/// Idempotency key: one settlement per user, round and action.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey {
    /// Account.
    pub user_id: UserId,
    /// Round.
    pub round_id: RoundId,
    /// Action.
    pub action: SettlementAction,
}

impl IdempotencyKey {
    /// Build a key.
    pub fn new(user_id: UserId, round_id: RoundId, action: SettlementAction) -> Self {
        Self {
            user_id,
            round_id,
            action,
        }
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.user_id, self.round_id, self.action)
    }
}

/// Direction of a balance change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementKind {
    /// Take tokens from the user.
    Debit,
    /// Give tokens to the user.
    Credit,
}

/// One balance change for the balance store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementInstruction {
    /// Idempotency key.
    pub key: IdempotencyKey,
    /// Debit or credit.
    pub kind: SettlementKind,
    /// Amount.
    pub amount: Tokens,
}

impl SettlementInstruction {
    /// Debit `amount` from the user.
    pub fn debit(user_id: UserId, round_id: RoundId, action: SettlementAction, amount: Tokens) -> Self {
        Self {
            key: IdempotencyKey::new(user_id, round_id, action),
            kind: SettlementKind::Debit,
            amount,
        }
    }

    /// Credit `amount` to the user.
    pub fn credit(user_id: UserId, round_id: RoundId, action: SettlementAction, amount: Tokens) -> Self {
        Self {
            key: IdempotencyKey::new(user_id, round_id, action),
            kind: SettlementKind::Credit,
            amount,
        }
    }

    /// Account affected.
    pub fn user_id(&self) -> &UserId {
        &self.key.user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display() {
        let key = IdempotencyKey::new(UserId::new("u1"), 42, SettlementAction::Cashout);
        assert_eq!(key.to_string(), "u1:42:cashout");
    }

    #[test]
    fn test_keys_distinguish_actions() {
        let bet = SettlementInstruction::debit(UserId::new("u1"), 1, SettlementAction::Bet, Tokens::whole(5));
        let win = SettlementInstruction::credit(UserId::new("u1"), 1, SettlementAction::Cashout, Tokens::whole(5));
        assert_ne!(bet.key, win.key);
        assert_eq!(bet.user_id(), win.user_id());
    }
}
