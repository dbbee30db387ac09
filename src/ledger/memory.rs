//! In-memory balance store.
//!
//! Accounts and applied keys sit behind one `tokio::sync::Mutex`, so a
//! balance change and its idempotency record are a single atomic step.
//!
//! Applied keys are grouped by round and only the newest
//! `KEY_RETENTION_ROUNDS` rounds are remembered. A key from an older round
//! is forgotten, so replaying it would apply again; settlement retries for a
//! round finish long before the window moves past it.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::core::clock::Millis;
use crate::core::units::Tokens;
use crate::game::bet::UserId;
use crate::game::round::RoundId;
use crate::game::settlement::IdempotencyKey;
use crate::ledger::{BalanceStore, LedgerError};

/// Faucet grant: 100.00 tokens.
pub const CLAIM_AMOUNT: Tokens = Tokens::from_cents(10_000);

/// Minimum time between faucet claims: 8 hours.
pub const CLAIM_INTERVAL_MS: Millis = 8 * 60 * 60 * 1000;

/// Rounds of idempotency keys kept in memory.
pub const KEY_RETENTION_ROUNDS: RoundId = 10_000;

#[derive(Debug, Default, Clone)]
struct Account {
    balance: Tokens,
    last_claim: Option<Millis>,
}

#[derive(Debug, Default)]
struct Applied {
    by_round: BTreeMap<RoundId, BTreeSet<IdempotencyKey>>,
    retention: RoundId,
}

impl Applied {
    fn contains(&self, key: &IdempotencyKey) -> bool {
        self.by_round
            .get(&key.round_id)
            .map_or(false, |keys| keys.contains(key))
    }

    fn insert(&mut self, key: IdempotencyKey) {
        self.by_round.entry(key.round_id).or_default().insert(key);
        let newest = self.by_round.keys().next_back().copied().unwrap_or(0);
        let floor = newest.saturating_add(1).saturating_sub(self.retention);
        if floor > 0 {
            self.by_round = self.by_round.split_off(&floor);
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    accounts: BTreeMap<UserId, Account>,
    applied: Applied,
}

/// Balance store for a single process.
#[derive(Debug)]
pub struct InMemoryBalanceStore {
    inner: Mutex<Inner>,
}

impl Default for InMemoryBalanceStore {
    fn default() -> Self {
        Self::with_key_retention(KEY_RETENTION_ROUNDS)
    }
}

impl InMemoryBalanceStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty store remembering keys of the newest `rounds` rounds.
    pub fn with_key_retention(rounds: RoundId) -> Self {
        Self {
            inner: Mutex::new(Inner {
                accounts: BTreeMap::new(),
                applied: Applied {
                    by_round: BTreeMap::new(),
                    retention: rounds.max(1),
                },
            }),
        }
    }

    /// Create an account with zero balance (no-op if it exists).
    pub async fn open_account(&self, user_id: &UserId) {
        let mut inner = self.inner.lock().await;
        inner.accounts.entry(user_id.clone()).or_default();
    }

    /// Set a balance directly (seeding, tests).
    pub async fn set_balance(&self, user_id: &UserId, balance: Tokens) {
        let mut inner = self.inner.lock().await;
        inner.accounts.entry(user_id.clone()).or_default().balance = balance;
    }

    /// Has this key been applied?
    pub async fn was_applied(&self, key: &IdempotencyKey) -> bool {
        self.inner.lock().await.applied.contains(key)
    }
}

#[async_trait]
impl BalanceStore for InMemoryBalanceStore {
    async fn balance(&self, user_id: &UserId) -> Result<Tokens, LedgerError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .accounts
            .get(user_id)
            .map(|a| a.balance)
            .unwrap_or(Tokens::ZERO))
    }

    /// Grant the faucet amount, at most once per `CLAIM_INTERVAL_MS`.
    async fn claim(&self, user_id: &UserId, now: Millis) -> Result<Tokens, LedgerError> {
        let mut inner = self.inner.lock().await;
        let account = inner.accounts.entry(user_id.clone()).or_default();

        if let Some(last) = account.last_claim {
            let next = last.saturating_add(CLAIM_INTERVAL_MS);
            if now < next {
                return Err(LedgerError::ClaimTooEarly {
                    retry_after_ms: next - now,
                });
            }
        }

        account.balance = account
            .balance
            .checked_add(CLAIM_AMOUNT)
            .ok_or_else(|| LedgerError::Unavailable("balance overflow".into()))?;
        account.last_claim = Some(now);

        debug!(user = %user_id, balance = %account.balance, "Faucet claimed");
        Ok(account.balance)
    }

    async fn debit(&self, key: &IdempotencyKey, amount: Tokens) -> Result<Tokens, LedgerError> {
        let mut inner = self.inner.lock().await;
        let Inner { accounts, applied } = &mut *inner;
        let account = accounts.entry(key.user_id.clone()).or_default();

        if applied.contains(key) {
            return Ok(account.balance);
        }

        let remaining = account
            .balance
            .checked_sub(amount)
            .ok_or(LedgerError::InsufficientFunds {
                available: account.balance,
                requested: amount,
            })?;
        account.balance = remaining;
        applied.insert(key.clone());
        Ok(remaining)
    }

    async fn credit(&self, key: &IdempotencyKey, amount: Tokens) -> Result<Tokens, LedgerError> {
        let mut inner = self.inner.lock().await;
        let Inner { accounts, applied } = &mut *inner;
        let account = accounts.entry(key.user_id.clone()).or_default();

        if applied.contains(key) {
            return Ok(account.balance);
        }

        account.balance = account
            .balance
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Unavailable("balance overflow".into()))?;
        applied.insert(key.clone());
        Ok(account.balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::settlement::{SettlementAction, SettlementInstruction};

    fn key(user: &str, round: u64, action: SettlementAction) -> IdempotencyKey {
        IdempotencyKey::new(UserId::new(user), round, action)
    }

    #[tokio::test]
    async fn test_unknown_user_has_zero_balance() {
        let store = InMemoryBalanceStore::new();
        assert_eq!(store.balance(&UserId::new("ghost")).await.unwrap(), Tokens::ZERO);
    }

    #[tokio::test]
    async fn test_debit_is_idempotent() {
        let store = InMemoryBalanceStore::new();
        let alice = UserId::new("alice");
        store.set_balance(&alice, Tokens::whole(10)).await;

        let k = key("alice", 1, SettlementAction::Bet);
        assert_eq!(store.debit(&k, Tokens::whole(4)).await.unwrap(), Tokens::whole(6));
        assert_eq!(store.debit(&k, Tokens::whole(4)).await.unwrap(), Tokens::whole(6));
        assert!(store.was_applied(&k).await);

        let other = key("alice", 2, SettlementAction::Bet);
        assert_eq!(
            store.debit(&other, Tokens::whole(7)).await.unwrap_err(),
            LedgerError::InsufficientFunds {
                available: Tokens::whole(6),
                requested: Tokens::whole(7),
            }
        );
        assert!(!store.was_applied(&other).await);
    }

    #[tokio::test]
    async fn test_apply_credit_once() {
        let store = InMemoryBalanceStore::new();
        let win = SettlementInstruction::credit(
            UserId::new("bob"),
            3,
            SettlementAction::Cashout,
            Tokens::from_cents(1_250),
        );
        store.apply(&win).await.unwrap();
        store.apply(&win).await.unwrap();
        assert_eq!(
            store.balance(&UserId::new("bob")).await.unwrap(),
            Tokens::from_cents(1_250)
        );
    }

    #[tokio::test]
    async fn test_claim_interval() {
        let store = InMemoryBalanceStore::new();
        let alice = UserId::new("alice");
        store.open_account(&alice).await;

        assert_eq!(store.claim(&alice, 0).await.unwrap(), Tokens::whole(100));
        assert_eq!(
            store.claim(&alice, CLAIM_INTERVAL_MS - 1).await.unwrap_err(),
            LedgerError::ClaimTooEarly { retry_after_ms: 1 }
        );
        assert_eq!(
            store.claim(&alice, CLAIM_INTERVAL_MS).await.unwrap(),
            Tokens::whole(200)
        );
    }

    #[tokio::test]
    async fn test_old_round_keys_are_pruned() {
        let store = InMemoryBalanceStore::with_key_retention(2);
        let early = key("alice", 1, SettlementAction::Cashout);
        store.credit(&early, Tokens::whole(1)).await.unwrap();
        assert!(store.was_applied(&early).await);

        let recent = key("alice", 2, SettlementAction::Cashout);
        store.credit(&recent, Tokens::whole(1)).await.unwrap();
        assert!(store.was_applied(&early).await);

        store
            .credit(&key("bob", 3, SettlementAction::Cashout), Tokens::whole(1))
            .await
            .unwrap();
        assert!(!store.was_applied(&early).await);
        assert!(store.was_applied(&recent).await);
        assert_eq!(store.inner.lock().await.applied.by_round.len(), 2);
    }
}
