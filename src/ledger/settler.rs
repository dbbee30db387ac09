//! Settlement Worker
//!
//! ```text
//!  RoundOwner ──apply()/submit()──> apply_with_retry ──> BalanceStore
//!                                        │ credit still failing
//!                                        v
//!                          parked credits ──every `redelivery`──> apply again
//! ```
//!
//! Balance-store I/O never runs on the round owner task; the owner hands
//! instructions to a `Settler` and goes back to ticking. Credits that
//! exhaust their retries are parked and re-applied until they land. The
//! idempotency key makes every repeat safe. Debits are never replayed: a
//! bet whose debit failed has already been rejected.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::core::units::Tokens;
use crate::game::settlement::{SettlementInstruction, SettlementKind};
use crate::ledger::{apply_with_retry, BalanceStore, LedgerError, RetryPolicy};

/// Cloneable front of the settlement worker.
#[derive(Clone)]
pub struct Settler {
    ledger: Arc<dyn BalanceStore>,
    policy: RetryPolicy,
    parked: mpsc::UnboundedSender<SettlementInstruction>,
}

impl Settler {
    /// Start the redelivery worker. It exits once every `Settler` clone is
    /// dropped and its last pass over the parked credits is done.
    pub fn spawn(
        ledger: Arc<dyn BalanceStore>,
        policy: RetryPolicy,
        redelivery: Duration,
    ) -> (Self, JoinHandle<()>) {
        let (parked, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(redeliver(ledger.clone(), policy, redelivery, rx));
        (
            Self {
                ledger,
                policy,
                parked,
            },
            worker,
        )
    }

    /// Apply `instruction` under the retry policy.
    ///
    /// A credit that still fails on a transient error is parked for
    /// redelivery before the error is returned.
    pub async fn apply(&self, instruction: &SettlementInstruction) -> Result<Tokens, LedgerError> {
        let result = apply_with_retry(self.ledger.as_ref(), instruction, &self.policy).await;
        if let Err(e) = &result {
            if e.is_transient() && instruction.kind == SettlementKind::Credit {
                self.park(instruction.clone(), e);
            }
        }
        result
    }

    /// Apply in the background. Only the outcome is logged.
    pub fn submit(&self, instruction: SettlementInstruction) {
        let settler = self.clone();
        tokio::spawn(async move {
            if let Err(e) = settler.apply(&instruction).await {
                error!(key = %instruction.key, "Settlement failed: {}", e);
            }
        });
    }

    fn park(&self, instruction: SettlementInstruction, err: &LedgerError) {
        warn!(
            key = %instruction.key,
            amount = %instruction.amount,
            "Credit parked for redelivery: {}",
            err
        );
        if let Err(mpsc::error::SendError(lost)) = self.parked.send(instruction) {
            error!(key = %lost.key, amount = %lost.amount, "Redelivery worker stopped, credit not retried");
        }
    }
}

async fn redeliver(
    ledger: Arc<dyn BalanceStore>,
    policy: RetryPolicy,
    every: Duration,
    mut parked: mpsc::UnboundedReceiver<SettlementInstruction>,
) {
    let mut backlog: Vec<SettlementInstruction> = Vec::new();
    let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            item = parked.recv() => match item {
                Some(instruction) => {
                    if backlog.is_empty() {
                        ticker.reset();
                    }
                    backlog.push(instruction);
                }
                None => break,
            },
            _ = ticker.tick(), if !backlog.is_empty() => {
                backlog = drain(ledger.as_ref(), &policy, std::mem::take(&mut backlog)).await;
            }
        }
    }

    if !backlog.is_empty() {
        backlog = drain(ledger.as_ref(), &policy, backlog).await;
    }
    for instruction in &backlog {
        error!(
            key = %instruction.key,
            amount = %instruction.amount,
            "Credit still unsettled at shutdown"
        );
    }
}

/// One pass over the backlog. Returns what is still failing.
async fn drain(
    ledger: &dyn BalanceStore,
    policy: &RetryPolicy,
    backlog: Vec<SettlementInstruction>,
) -> Vec<SettlementInstruction> {
    let mut still_failing = Vec::new();
    for instruction in backlog {
        match apply_with_retry(ledger, &instruction, policy).await {
            Ok(balance) => info!(key = %instruction.key, %balance, "Parked credit applied"),
            Err(e) if e.is_transient() => still_failing.push(instruction),
            Err(e) => error!(key = %instruction.key, "Parked credit rejected: {}", e),
        }
    }
    still_failing
}
