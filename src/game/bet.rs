//! Bets
//!
//! One `BetBook` per round; at most one bet per user. BTreeMap keeps the
//! settlement order stable (sorted by user id), which keeps event streams
//! and audit logs reproducible.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::clock::Millis;
use crate::core::units::{Multiplier, Tokens};
use crate::game::error::GameError;
use crate::game::round::RoundId;

/// External user identifier (account id in the balance store).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wrap an account id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Bet lifecycle: `Placed -> CashedOut | Lost`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BetStatus {
    /// Open, riding the multiplier.
    Placed,
    /// Cashed out before the crash.
    CashedOut {
        /// Multiplier the bet settled at.
        multiplier: Multiplier,
        /// Amount credited.
        payout: Tokens,
    },
    /// Still open when the round crashed.
    Lost,
}

/// A single user's stake in a round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bet {
    /// Owner.
    pub user_id: UserId,
    /// Round the bet belongs to.
    pub round_id: RoundId,
    /// Stake (already debited).
    pub amount: Tokens,
    /// Optional automatic cashout target.
    pub auto_cashout: Option<Multiplier>,
    /// Current status.
    pub status: BetStatus,
    /// When the bet was recorded.
    pub placed_at: Millis,
}

impl Bet {
    /// Is the bet still riding?
    pub fn is_open(&self) -> bool {
        matches!(self.status, BetStatus::Placed)
    }

    /// Auto-cashout target that has been reached at `current`, if any.
    pub fn auto_cashout_due(&self, current: Multiplier) -> Option<Multiplier> {
        match self.auto_cashout {
            Some(target) if self.is_open() && target <= current => Some(target),
            _ => None,
        }
    }

    /// Settle as cashed out. Returns the payout, or `None` if already settled.
    pub fn cash_out(&mut self, multiplier: Multiplier) -> Option<Tokens> {
        if !self.is_open() {
            return None;
        }
        let payout = self.amount.payout(multiplier);
        self.status = BetStatus::CashedOut { multiplier, payout };
        Some(payout)
    }

    /// Settle as lost. Returns false if already settled.
    pub fn lose(&mut self) -> bool {
        if !self.is_open() {
            return false;
        }
        self.status = BetStatus::Lost;
        true
    }
}

/// All bets of the current round.
#[derive(Debug, Default, Clone)]
pub struct BetBook {
    bets: BTreeMap<UserId, Bet>,
}

impl BetBook {
    /// Create an empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Has this user already bet?
    pub fn contains(&self, user_id: &UserId) -> bool {
        self.bets.contains_key(user_id)
    }

    /// Record a bet; a second bet by the same user is rejected.
    pub fn insert(&mut self, bet: Bet) -> Result<(), GameError> {
        if self.bets.contains_key(&bet.user_id) {
            return Err(GameError::DuplicateBet);
        }
        self.bets.insert(bet.user_id.clone(), bet);
        Ok(())
    }

    /// Look up a bet.
    pub fn get(&self, user_id: &UserId) -> Option<&Bet> {
        self.bets.get(user_id)
    }

    /// Mutable lookup.
    pub fn get_mut(&mut self, user_id: &UserId) -> Option<&mut Bet> {
        self.bets.get_mut(user_id)
    }

    /// Iterate open bets mutably.
    pub fn open_bets_mut(&mut self) -> impl Iterator<Item = &mut Bet> {
        self.bets.values_mut().filter(|b| b.is_open())
    }

    /// Number of open bets.
    pub fn open_count(&self) -> usize {
        self.bets.values().filter(|b| b.is_open()).count()
    }

    /// Total bets (any status).
    pub fn len(&self) -> usize {
        self.bets.len()
    }

    /// No bets at all?
    pub fn is_empty(&self) -> bool {
        self.bets.is_empty()
    }

    /// Earliest auto-cashout target among open bets.
    pub fn next_auto_cashout(&self) -> Option<Multiplier> {
        self.bets
            .values()
            .filter(|b| b.is_open())
            .filter_map(|b| b.auto_cashout)
            .min()
    }

    /// Drop every bet (round replaced).
    pub fn clear(&mut self) {
        self.bets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bet(user: &str, amount: u64, auto: Option<u64>) -> Bet {
        Bet {
            user_id: UserId::new(user),
            round_id: 1,
            amount: Tokens::from_cents(amount),
            auto_cashout: auto.map(Multiplier::from_thousandths),
            status: BetStatus::Placed,
            placed_at: 0,
        }
    }

    #[test]
    fn test_duplicate_bet_rejected() {
        let mut book = BetBook::new();
        book.insert(bet("alice", 100, None)).unwrap();
        assert_eq!(book.insert(bet("alice", 500, None)), Err(GameError::DuplicateBet));
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn test_settles_only_once() {
        let mut b = bet("alice", 1000, None);
        assert_eq!(b.cash_out(Multiplier::from_thousandths(1500)), Some(Tokens::from_cents(1500)));
        assert_eq!(b.cash_out(Multiplier::from_thousandths(2000)), None);
        assert!(!b.lose());
        assert!(matches!(b.status, BetStatus::CashedOut { .. }));
    }

    #[test]
    fn test_auto_cashout_due() {
        let b = bet("alice", 1000, Some(2000));
        assert_eq!(b.auto_cashout_due(Multiplier::from_thousandths(1999)), None);
        assert_eq!(
            b.auto_cashout_due(Multiplier::from_thousandths(2000)),
            Some(Multiplier::from_thousandths(2000))
        );
    }

    #[test]
    fn test_next_auto_cashout_ignores_settled() {
        let mut book = BetBook::new();
        book.insert(bet("alice", 100, Some(1500))).unwrap();
        book.insert(bet("bob", 100, Some(3000))).unwrap();
        book.get_mut(&UserId::new("alice")).unwrap().lose();

        assert_eq!(book.next_auto_cashout(), Some(Multiplier::from_thousandths(3000)));
        assert_eq!(book.open_count(), 1);
    }
}
