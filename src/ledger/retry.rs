//! Bounded retry for balance-store writes.
//!
//! Only transient errors are retried. Every attempt reuses the same
//! idempotency key, so a write that landed before a timeout is not applied
//! twice.

use std::time::Duration;

use tracing::warn;

use crate::core::units::Tokens;
use crate::game::settlement::SettlementInstruction;
use crate::ledger::{BalanceStore, LedgerError};

/// Exponential backoff settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after the `attempt`-th failure (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Apply `instruction`, retrying transient failures under `policy`.
pub async fn apply_with_retry(
    store: &dyn BalanceStore,
    instruction: &SettlementInstruction,
    policy: &RetryPolicy,
) -> Result<Tokens, LedgerError> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match store.apply(instruction).await {
            Ok(balance) => return Ok(balance),
            Err(e) if e.is_transient() && attempt < attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    key = %instruction.key,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Balance store write failed, retrying: {}",
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use crate::game::bet::UserId;
    use crate::game::settlement::{IdempotencyKey, SettlementAction};
    use crate::ledger::InMemoryBalanceStore;

    /// Fails the first `failures` writes with `Unavailable`.
    #[derive(Debug, Default)]
    pub(crate) struct FlakyStore {
        pub(crate) inner: InMemoryBalanceStore,
        pub(crate) failures: AtomicU32,
        pub(crate) calls: AtomicU32,
    }

    impl FlakyStore {
        pub(crate) fn failing(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                ..Self::default()
            }
        }

        fn trip(&self) -> Result<(), LedgerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(LedgerError::Unavailable("connection reset".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl BalanceStore for FlakyStore {
        async fn balance(&self, user_id: &UserId) -> Result<Tokens, LedgerError> {
            self.inner.balance(user_id).await
        }

        async fn debit(&self, key: &IdempotencyKey, amount: Tokens) -> Result<Tokens, LedgerError> {
            self.trip()?;
            self.inner.debit(key, amount).await
        }

        async fn credit(&self, key: &IdempotencyKey, amount: Tokens) -> Result<Tokens, LedgerError> {
            self.trip()?;
            self.inner.credit(key, amount).await
        }
    }

    fn win() -> SettlementInstruction {
        SettlementInstruction::credit(UserId::new("alice"), 1, SettlementAction::Cashout, Tokens::whole(3))
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(500));
        assert_eq!(policy.backoff(40), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_recover() {
        let store = FlakyStore::failing(2);
        let balance = apply_with_retry(&store, &win(), &RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(balance, Tokens::whole(3));
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let store = FlakyStore::failing(10);
        let err = apply_with_retry(&store, &win(), &RetryPolicy::default())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_permanent_errors_not_retried() {
        let store = FlakyStore::default();
        let bet = SettlementInstruction::debit(UserId::new("bob"), 1, SettlementAction::Bet, Tokens::whole(1));
        let err = apply_with_retry(&store, &bet, &RetryPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }
}
