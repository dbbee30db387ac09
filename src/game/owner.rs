//! Round Owner
//!
//! ```text
//!  RoundHandle ──mpsc<RoundCommand>──> RoundOwner task ──> RoundEngine
//!  (cloneable)   <──oneshot reply───   │  ticker + crash deadline sleep
//!                                      ├─> Settler ──> BalanceStore (spawned)
//!                                      ├─> AuditWriter ──> AuditStore
//!                                      └─> RoundBroadcaster (best effort)
//! ```
//!
//! Exactly one task mutates the round, and it never awaits balance-store
//! or audit I/O. A bet is validated and reserved on the owner, its debit
//! runs in a spawned task, and the result comes back over an internal
//! channel to be committed. Credits are handed to the `Settler` and the
//! crash keeps its deadline however slow the store is.
//!
//! Every command and every debit completion first advances the engine to
//! the current clock reading, which makes that reading the single
//! tie-break between a cashout and the crash.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::core::clock::{Clock, Millis};
use crate::core::units::{Multiplier, Tokens};
use crate::fairness::audit::{AuditStore, AuditWriter};
use crate::fairness::seed::SeedCommitment;
use crate::game::bet::{Bet, UserId};
use crate::game::engine::{BetRequest, BetTicket, RoundEngine, RoundSnapshot, TickOutcome};
use crate::game::error::GameError;
use crate::game::events::{BroadcastError, RoundBroadcaster, RoundEvent};
use crate::game::round::RoundId;
use crate::game::settlement::{SettlementAction, SettlementInstruction};
use crate::ledger::{BalanceStore, LedgerError, RetryPolicy, Settler};

/// Owner task settings.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnerConfig {
    /// Multiplier tick period.
    pub tick_interval: Duration,
    /// Delay before retrying a round that failed to start.
    pub restart_backoff: Duration,
    /// Balance-store retry policy.
    pub retry: RetryPolicy,
    /// Period between redelivery passes over parked credits.
    pub settlement_redelivery: Duration,
    /// Command queue depth.
    pub command_capacity: usize,
}

impl Default for OwnerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            restart_backoff: Duration::from_secs(1),
            retry: RetryPolicy::default(),
            settlement_redelivery: Duration::from_secs(1),
            command_capacity: 256,
        }
    }
}

/// Successful cashout as seen by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct CashoutReceipt {
    /// Round.
    pub round_id: RoundId,
    /// Settlement multiplier.
    pub multiplier: Multiplier,
    /// Amount credited.
    pub win_amount: Tokens,
}

/// Requests handled by the owner task.
#[derive(Debug)]
pub enum RoundCommand {
    /// Place a bet.
    PlaceBet {
        /// Bet request.
        request: BetRequest,
        /// Reply channel.
        reply: oneshot::Sender<Result<Bet, GameError>>,
    },
    /// Cash out the caller's open bet.
    Cashout {
        /// Bettor.
        user_id: UserId,
        /// Reply channel.
        reply: oneshot::Sender<Result<CashoutReceipt, GameError>>,
    },
    /// Contribute a client seed to the next round.
    ContributeSeed {
        /// Contributor.
        user_id: UserId,
        /// Submitted seed text.
        client_seed: String,
        /// Reply channel: next round id and its server seed commitment.
        reply: oneshot::Sender<Result<(RoundId, SeedCommitment), GameError>>,
    },
    /// Read the current round.
    Snapshot {
        /// Reply channel.
        reply: oneshot::Sender<Option<RoundSnapshot>>,
    },
}

/// Cloneable client side of the owner task.
#[derive(Debug, Clone)]
pub struct RoundHandle {
    commands: mpsc::Sender<RoundCommand>,
}

impl RoundHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RoundCommand,
    ) -> Result<T, GameError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| GameError::OwnerStopped)?;
        rx.await.map_err(|_| GameError::OwnerStopped)
    }

    /// Place a bet in the live round.
    pub async fn place_bet(&self, request: BetRequest) -> Result<Bet, GameError> {
        self.request(|reply| RoundCommand::PlaceBet { request, reply })
            .await?
    }

    /// Cash out at the current multiplier.
    pub async fn cashout(&self, user_id: UserId) -> Result<CashoutReceipt, GameError> {
        self.request(|reply| RoundCommand::Cashout { user_id, reply })
            .await?
    }

    /// Add a client seed to the next round.
    pub async fn contribute_client_seed(
        &self,
        user_id: UserId,
        client_seed: String,
    ) -> Result<(RoundId, SeedCommitment), GameError> {
        self.request(|reply| RoundCommand::ContributeSeed {
            user_id,
            client_seed,
            reply,
        })
        .await?
    }

    /// Current round, if any.
    pub async fn snapshot(&self) -> Result<Option<RoundSnapshot>, GameError> {
        self.request(|reply| RoundCommand::Snapshot { reply }).await
    }

    /// Has the owner task exited?
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// A bet debit that finished off the owner task.
#[derive(Debug)]
struct DebitSettled {
    ticket: BetTicket,
    result: Result<Tokens, LedgerError>,
    reply: oneshot::Sender<Result<Bet, GameError>>,
}

/// The task that owns the round engine.
pub struct RoundOwner {
    engine: RoundEngine,
    clock: Arc<dyn Clock>,
    settler: Settler,
    audit: AuditWriter,
    broadcaster: Arc<dyn RoundBroadcaster>,
    config: OwnerConfig,
    /// When the next round start is due (set after a crash or a failed start).
    start_at: Option<Millis>,
    /// Bets whose debit is in flight.
    pending_bets: BTreeSet<(RoundId, UserId)>,
    debits: mpsc::Sender<DebitSettled>,
    workers: Vec<JoinHandle<()>>,
}

impl RoundOwner {
    /// Spawn the owner task. It runs until every handle is dropped, then
    /// waits for queued audit records and parked credits to be flushed.
    pub fn spawn(
        engine: RoundEngine,
        clock: Arc<dyn Clock>,
        ledger: Arc<dyn BalanceStore>,
        audit: Arc<dyn AuditStore>,
        broadcaster: Arc<dyn RoundBroadcaster>,
        config: OwnerConfig,
    ) -> (RoundHandle, JoinHandle<()>) {
        let capacity = config.command_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let (debits, debits_rx) = mpsc::channel(capacity);
        let (settler, settle_worker) =
            Settler::spawn(ledger, config.retry, config.settlement_redelivery);
        let (audit, audit_worker) = AuditWriter::spawn(audit);

        let start_at = Some(clock.now_ms());
        let owner = Self {
            engine,
            clock,
            settler,
            audit,
            broadcaster,
            config,
            start_at,
            pending_bets: BTreeSet::new(),
            debits,
            workers: vec![settle_worker, audit_worker],
        };
        let task = tokio::spawn(owner.run(rx, debits_rx));
        (RoundHandle { commands: tx }, task)
    }

    #[instrument(skip_all)]
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<RoundCommand>,
        mut debits: mpsc::Receiver<DebitSettled>,
    ) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Round owner started");

        loop {
            self.start_round_if_due();

            let wake = self.next_wake();
            let sleep = tokio::time::sleep_until(wake.unwrap_or_else(Instant::now));

            tokio::select! {
                cmd = commands.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => break,
                    }
                }
                Some(done) = debits.recv() => {
                    self.finish_bet(done);
                }
                _ = ticker.tick() => {
                    self.advance();
                }
                _ = sleep, if wake.is_some() => {
                    self.advance();
                }
            }
        }

        let Self {
            settler,
            audit,
            workers,
            ..
        } = self;
        drop(settler);
        drop(audit);
        for worker in workers {
            if let Err(e) = worker.await {
                error!("Owner worker failed: {}", e);
            }
        }

        info!("Round owner stopped");
    }

    /// Tokio instant of the next crash, auto-cashout or restart.
    fn next_wake(&self) -> Option<Instant> {
        let target = match (self.engine.next_deadline(), self.start_at) {
            (Some(a), Some(b)) => a.min(b),
            (a, b) => a.or(b)?,
        };
        let now = self.clock.now_ms();
        Some(Instant::now() + Duration::from_millis(target.saturating_sub(now)))
    }

    fn start_round_if_due(&mut self) {
        let now = self.clock.now_ms();
        match self.start_at {
            Some(at) if now >= at => {}
            _ => return,
        }

        match self.engine.start_round(now) {
            Ok(event) => {
                self.start_at = None;
                self.publish(event);
            }
            Err(GameError::RoundInProgress) => {
                self.start_at = None;
            }
            Err(e) => {
                let backoff = self.config.restart_backoff.as_millis() as Millis;
                error!(
                    "Round failed to start, retrying in {}ms: {}",
                    backoff, e
                );
                self.start_at = Some(now.saturating_add(backoff.max(1)));
            }
        }
    }

    /// Run the engine up to the current clock reading and settle the result.
    fn advance(&mut self) {
        let now = self.clock.now_ms();
        let outcome = self.engine.tick(now);
        if !outcome.is_empty() {
            self.settle(outcome, now);
        }
    }

    fn settle(&mut self, outcome: TickOutcome, now: Millis) {
        let TickOutcome {
            events,
            settlements,
            audit,
        } = outcome;

        for instruction in settlements {
            self.settler.submit(instruction);
        }

        if let Some(record) = audit {
            self.audit.append(record);
            self.start_at = Some(now);
        }

        for event in events {
            self.publish(event);
        }
    }

    fn publish(&self, event: RoundEvent) {
        match self.broadcaster.publish(event) {
            Ok(()) => {}
            Err(BroadcastError::NoSubscribers) => debug!("Round event dropped, no subscribers"),
            Err(e) => warn!("Round event broadcast failed: {}", e),
        }
    }

    fn handle_command(&mut self, cmd: RoundCommand) {
        self.advance();

        match cmd {
            RoundCommand::PlaceBet { request, reply } => self.place_bet(request, reply),
            RoundCommand::Cashout { user_id, reply } => self.cashout(user_id, reply),
            RoundCommand::ContributeSeed {
                user_id,
                client_seed,
                reply,
            } => {
                let result = self.engine.contribute_client_seed(user_id, client_seed);
                respond(reply, "Client seed", result);
            }
            RoundCommand::Snapshot { reply } => {
                let _ = reply.send(self.engine.snapshot(self.clock.now_ms()));
            }
        }
    }

    /// Validate and reserve, then debit off the owner task.
    fn place_bet(&mut self, request: BetRequest, reply: oneshot::Sender<Result<Bet, GameError>>) {
        let ticket = match self.engine.prepare_bet(request, self.clock.now_ms()) {
            Ok(ticket) => ticket,
            Err(e) => return respond(reply, "Bet", Err(e)),
        };
        let reservation = (ticket.round_id, ticket.request.user_id.clone());
        if !self.pending_bets.insert(reservation) {
            return respond(reply, "Bet", Err(GameError::DuplicateBet));
        }

        let settler = self.settler.clone();
        let done = self.debits.clone();
        tokio::spawn(async move {
            let result = settler.apply(&ticket.debit).await;
            let settled = DebitSettled {
                ticket,
                result,
                reply,
            };
            if let Err(mpsc::error::SendError(orphan)) = done.send(settled).await {
                if orphan.result.is_ok() {
                    warn!(key = %orphan.ticket.debit.key, "Owner stopped during debit, refunding");
                    settler.submit(refund_for(&orphan.ticket));
                }
            }
        });
    }

    /// Commit a bet whose debit finished, or refund it.
    fn finish_bet(&mut self, done: DebitSettled) {
        let DebitSettled {
            ticket,
            result,
            reply,
        } = done;
        self.pending_bets
            .remove(&(ticket.round_id, ticket.request.user_id.clone()));

        let result = match result {
            Ok(_) => {
                // Time passed while the debit was in flight.
                self.advance();
                let refund = refund_for(&ticket);
                match self.engine.commit_bet(ticket, self.clock.now_ms()) {
                    Ok(bet) => Ok(bet),
                    Err(e) => {
                        info!(key = %refund.key, "Bet missed its round, refunding: {}", e);
                        self.settler.submit(refund);
                        Err(e)
                    }
                }
            }
            Err(LedgerError::InsufficientFunds {
                available,
                requested,
            }) => Err(GameError::InvalidAmount(format!(
                "bet {} exceeds balance {}",
                requested, available
            ))),
            Err(e) => Err(e.into()),
        };
        respond(reply, "Bet", result);
    }

    /// Settle the bet on the engine now and credit it off the owner task.
    fn cashout(
        &mut self,
        user_id: UserId,
        reply: oneshot::Sender<Result<CashoutReceipt, GameError>>,
    ) {
        let outcome = match self.engine.cashout(&user_id, self.clock.now_ms()) {
            Ok(outcome) => outcome,
            Err(e) => return respond(reply, "Cashout", Err(e)),
        };

        let receipt = CashoutReceipt {
            round_id: outcome.settlement.key.round_id,
            multiplier: outcome.multiplier,
            win_amount: outcome.win_amount,
        };
        self.publish(outcome.event);

        let settler = self.settler.clone();
        let credit = outcome.settlement;
        tokio::spawn(async move {
            let result = match settler.apply(&credit).await {
                Ok(_) => Ok(receipt),
                Err(e) if e.is_transient() => {
                    error!(key = %credit.key, "Cashout credit failed, queued for redelivery: {}", e);
                    Err(GameError::BalanceStoreUnavailable(format!(
                        "{}; credit queued for redelivery",
                        e
                    )))
                }
                Err(e) => {
                    error!(key = %credit.key, "Cashout credit failed: {}", e);
                    Err(e.into())
                }
            };
            respond(reply, "Cashout", result);
        });
    }
}

fn refund_for(ticket: &BetTicket) -> SettlementInstruction {
    SettlementInstruction::credit(
        ticket.request.user_id.clone(),
        ticket.round_id,
        SettlementAction::Refund,
        ticket.request.amount,
    )
}

fn respond<T>(reply: oneshot::Sender<Result<T, GameError>>, what: &str, result: Result<T, GameError>) {
    if let Err(e) = &result {
        debug!("{} rejected: {}", what, e);
    }
    let _ = reply.send(result);
}

// =============================================================================
// TESTS
// =============================================================================
