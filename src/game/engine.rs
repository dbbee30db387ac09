//! Round Engine
//!
//! Synchronous state machine for the single global round. It owns the
//! round and its bet book, takes `now` as an argument and returns events
//! plus settlement instructions. It never sleeps, never touches balances
//! and never talks to the network; the round owner does all of that.
//!
//! ## Tick order
//!
//! 1. Auto-cashouts whose target was reached (and lies below the crash point)
//! 2. Crash check: multiplier >= crash point
//! 3. Every still-open bet becomes Lost, audit record produced
//!
//! ## Seed schedule
//!
//! The server seed of round `n + 1` is drawn when round `n` starts and its
//! commitment is published with round `n`. Client seed contributions made
//! during round `n` are folded into round `n + 1`, whose seed is already
//! fixed.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::clock::Millis;
use crate::core::units::{CrashPoint, Multiplier, Tokens};
use crate::fairness::audit::RoundAuditRecord;
use crate::fairness::client_seed::{combine_client_seed, ClientSeedPool};
use crate::fairness::seed::{SeedCommitment, SeedSource, ServerSeed, DEFAULT_CLIENT_SEED};
use crate::game::bet::{Bet, BetBook, BetStatus, UserId};
use crate::game::error::GameError;
use crate::game::events::RoundEvent;
use crate::game::round::{Round, RoundId, RoundStatus};
use crate::game::settlement::{SettlementAction, SettlementInstruction};

/// Engine tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Client seed mixed into every crash point.
    pub client_seed: String,
    /// Smallest accepted stake.
    pub min_bet: Tokens,
    /// Largest accepted stake.
    pub max_bet: Option<Tokens>,
    /// Refuse new bets once the live multiplier reaches this value.
    pub late_bet_cutoff: Option<Multiplier>,
    /// Id of the first round.
    pub first_round_id: RoundId,
    /// Nonce of the first round.
    pub first_nonce: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            client_seed: DEFAULT_CLIENT_SEED.to_string(),
            min_bet: Tokens::from_cents(1),
            max_bet: None,
            late_bet_cutoff: None,
            first_round_id: 1,
            first_nonce: 0,
        }
    }
}

/// Inbound bet request.
#[derive(Debug, Clone, PartialEq)]
pub struct BetRequest {
    /// Bettor.
    pub user_id: UserId,
    /// Round the client believes is live. `None` means "current".
    pub round_id: Option<RoundId>,
    /// Stake.
    pub amount: Tokens,
    /// Optional auto-cashout target.
    pub auto_cashout: Option<Multiplier>,
}

/// A validated bet waiting for its debit.
#[derive(Debug, Clone, PartialEq)]
pub struct BetTicket {
    /// Validated request.
    pub request: BetRequest,
    /// Round the bet goes into.
    pub round_id: RoundId,
    /// Debit to apply before committing.
    pub debit: SettlementInstruction,
}

/// Result of a successful cashout.
#[derive(Debug, Clone, PartialEq)]
pub struct CashoutOutcome {
    /// Multiplier the bet settled at.
    pub multiplier: Multiplier,
    /// Amount to credit.
    pub win_amount: Tokens,
    /// Credit instruction.
    pub settlement: SettlementInstruction,
    /// Event to publish.
    pub event: RoundEvent,
}

/// Everything one tick produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutcome {
    /// Events in emission order.
    pub events: Vec<RoundEvent>,
    /// Credits for auto-cashouts.
    pub settlements: Vec<SettlementInstruction>,
    /// Present when the round crashed during this tick.
    pub audit: Option<RoundAuditRecord>,
}

impl TickOutcome {
    /// Did the round crash on this tick?
    pub fn crashed(&self) -> bool {
        self.audit.is_some()
    }

    /// Nothing happened.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.settlements.is_empty() && self.audit.is_none()
    }
}

/// Public view of the current round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSnapshot {
    /// Round id.
    pub round_id: RoundId,
    /// Status.
    pub status: RoundStatus,
    /// Live multiplier at the snapshot instant.
    pub multiplier: Multiplier,
    /// Seed commitment.
    pub seed_hash: SeedCommitment,
    /// Start instant.
    pub start_time: Option<Millis>,
    /// Bets still riding.
    pub open_bets: usize,
    /// Bets placed this round.
    pub total_bets: usize,
    /// Revealed only after the crash.
    pub crash_point: Option<CrashPoint>,
    /// Commitment of the next round's server seed, once drawn.
    pub next_seed_hash: Option<SeedCommitment>,
}

/// The round state machine.
#[derive(Debug)]
pub struct RoundEngine {
    config: EngineConfig,
    seeds: Box<dyn SeedSource>,
    round: Option<Round>,
    bets: BetBook,
    next_round_id: RoundId,
    next_nonce: u64,
    /// Seed of the next round, committed before contributions arrive.
    upcoming: Option<ServerSeed>,
    /// Contributions for the next round.
    contributions: ClientSeedPool,
}

impl RoundEngine {
    /// Create an idle engine. Call `start_round` to begin.
    pub fn new(config: EngineConfig, seeds: Box<dyn SeedSource>) -> Self {
        let next_round_id = config.first_round_id;
        let next_nonce = config.first_nonce;
        Self {
            config,
            seeds,
            round: None,
            bets: BetBook::new(),
            next_round_id,
            next_nonce,
            upcoming: None,
            contributions: ClientSeedPool::new(),
        }
    }

    /// Engine settings.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current (or last crashed) round.
    pub fn current_round(&self) -> Option<&Round> {
        self.round.as_ref()
    }

    /// Bets of the current round.
    pub fn bets(&self) -> &BetBook {
        &self.bets
    }

    /// Is a round accepting bets?
    pub fn is_live(&self) -> bool {
        self.round.as_ref().map_or(false, Round::is_live)
    }

    /// Id and nonce the next round will use.
    pub fn next_round(&self) -> (RoundId, u64) {
        (self.next_round_id, self.next_nonce)
    }

    /// Continue numbering after a persisted round (process restart).
    pub fn resume_after(&mut self, record: &RoundAuditRecord) {
        self.next_round_id = self.next_round_id.max(record.round_id + 1);
        self.next_nonce = self.next_nonce.max(record.nonce + 1);
    }

    /// Create the next round and start it at `now`.
    ///
    /// Round id and nonce only advance when the crash point derived, so a
    /// failed seed is retried under the same numbers.
    pub fn start_round(&mut self, now: Millis) -> Result<RoundEvent, GameError> {
        if self.is_live() {
            return Err(GameError::RoundInProgress);
        }

        let seed = match self.upcoming.take() {
            Some(seed) => seed,
            None => self.seeds.next_seed()?,
        };
        let contributions = self.contributions.contributions();
        let client_seed = combine_client_seed(&self.config.client_seed, &contributions);
        let mut round = Round::new(self.next_round_id, seed, client_seed, self.next_nonce)?;
        round.start(now);

        self.next_round_id += 1;
        self.next_nonce += 1;
        self.bets.clear();
        self.contributions.clear();
        self.upcoming = self.draw_upcoming();

        info!(
            round_id = round.id(),
            nonce = round.nonce(),
            seed_hash = %round.commitment(),
            contributors = contributions.len(),
            "Round started"
        );

        let event = RoundEvent::RoundStarted {
            round_id: round.id(),
            seed_hash: round.commitment().clone(),
            client_seed: round.client_seed().to_string(),
            contributions,
            next_seed_hash: self.upcoming_commitment(),
            start_time: now,
        };
        self.round = Some(round);
        Ok(event)
    }

    fn draw_upcoming(&mut self) -> Option<ServerSeed> {
        match self.seeds.next_seed() {
            Ok(seed) => Some(seed),
            Err(e) => {
                warn!("Next server seed not committed, will draw at round start: {}", e);
                None
            }
        }
    }

    /// Commitment of the next round's server seed.
    pub fn upcoming_commitment(&self) -> Option<SeedCommitment> {
        self.upcoming.as_ref().map(ServerSeed::commitment)
    }

    /// Add `user_id`'s client seed to the next round.
    ///
    /// Returns that round's id and the commitment its server seed is already
    /// bound to. Draws the seed now if it was not committed yet.
    pub fn contribute_client_seed(
        &mut self,
        user_id: UserId,
        client_seed: String,
    ) -> Result<(RoundId, SeedCommitment), GameError> {
        let commitment = match self.upcoming_commitment() {
            Some(commitment) => commitment,
            None => {
                let seed = self.seeds.next_seed()?;
                let commitment = seed.commitment();
                self.upcoming = Some(seed);
                commitment
            }
        };
        self.contributions.contribute(user_id.clone(), client_seed)?;

        debug!(
            round_id = self.next_round_id,
            user = %user_id,
            contributors = self.contributions.len(),
            "Client seed contributed"
        );
        Ok((self.next_round_id, commitment))
    }

    fn live_round(&self, now: Millis) -> Result<&Round, GameError> {
        match &self.round {
            Some(round) if round.is_live() && !round.is_crash_due(now) => Ok(round),
            _ => Err(GameError::RoundNotRunning),
        }
    }

    /// Validate a bet without recording it.
    pub fn prepare_bet(&self, request: BetRequest, now: Millis) -> Result<BetTicket, GameError> {
        let round = self.live_round(now)?;
        if request.round_id.map_or(false, |id| id != round.id()) {
            return Err(GameError::RoundNotRunning);
        }

        self.check_entry_time(round, &request, now)?;

        if self.bets.contains(&request.user_id) {
            return Err(GameError::DuplicateBet);
        }

        if request.amount.is_zero() {
            return Err(GameError::InvalidAmount("bet amount must be positive".into()));
        }
        if request.amount < self.config.min_bet {
            return Err(GameError::InvalidAmount(format!(
                "bet amount below minimum {}",
                self.config.min_bet
            )));
        }
        if let Some(max) = self.config.max_bet {
            if request.amount > max {
                return Err(GameError::InvalidAmount(format!("bet amount above maximum {}", max)));
            }
        }

        let debit = SettlementInstruction::debit(
            request.user_id.clone(),
            round.id(),
            SettlementAction::Bet,
            request.amount,
        );
        Ok(BetTicket {
            round_id: round.id(),
            request,
            debit,
        })
    }

    /// Late-bet cutoff and auto-cashout target against the multiplier at `now`.
    fn check_entry_time(
        &self,
        round: &Round,
        request: &BetRequest,
        now: Millis,
    ) -> Result<(), GameError> {
        let current = round.multiplier_at(now);
        if let Some(cutoff) = self.config.late_bet_cutoff {
            if current >= cutoff {
                return Err(GameError::RoundNotRunning);
            }
        }

        if let Some(target) = request.auto_cashout {
            if target < Multiplier::ONE {
                return Err(GameError::InvalidAmount("auto cashout below 1.00x".into()));
            }
            if round.start_time().is_some() && target <= current {
                return Err(GameError::InvalidAmount(format!(
                    "auto cashout {} already reached",
                    target
                )));
            }
        }
        Ok(())
    }

    /// Record a bet whose debit has been applied.
    ///
    /// Re-validates against the round state at `now`, which may be well
    /// after `prepare_bet`; on error the caller owns the refund.
    pub fn commit_bet(&mut self, ticket: BetTicket, now: Millis) -> Result<Bet, GameError> {
        let round = self.live_round(now)?;
        let round_id = round.id();
        if round_id != ticket.round_id {
            return Err(GameError::RoundNotRunning);
        }
        self.check_entry_time(round, &ticket.request, now)?;

        let bet = Bet {
            user_id: ticket.request.user_id,
            round_id,
            amount: ticket.request.amount,
            auto_cashout: ticket.request.auto_cashout,
            status: BetStatus::Placed,
            placed_at: now,
        };
        self.bets.insert(bet.clone())?;

        debug!(
            round_id,
            user = %bet.user_id,
            amount = %bet.amount,
            "Bet placed"
        );
        Ok(bet)
    }

    /// Validate and record in one step (no balance involved).
    pub fn place_bet(
        &mut self,
        request: BetRequest,
        now: Millis,
    ) -> Result<(Bet, SettlementInstruction), GameError> {
        let ticket = self.prepare_bet(request, now)?;
        let debit = ticket.debit.clone();
        let bet = self.commit_bet(ticket, now)?;
        Ok((bet, debit))
    }

    /// Cash out `user_id` at the multiplier of `now`.
    pub fn cashout(&mut self, user_id: &UserId, now: Millis) -> Result<CashoutOutcome, GameError> {
        let round = match &self.round {
            Some(round) if round.is_live() => round,
            _ => return Err(GameError::RoundNotRunning),
        };

        let bet = match self.bets.get_mut(user_id) {
            Some(bet) if bet.is_open() => bet,
            _ => return Err(GameError::NoOpenBet),
        };

        let multiplier = round.multiplier_at(now);
        if !round.beats_crash(multiplier) {
            return Err(GameError::RoundNotRunning);
        }

        let win_amount = bet.cash_out(multiplier).ok_or(GameError::NoOpenBet)?;
        let round_id = round.id();

        debug!(round_id, user = %user_id, %multiplier, win = %win_amount, "Cashed out");

        Ok(CashoutOutcome {
            multiplier,
            win_amount,
            settlement: SettlementInstruction::credit(
                user_id.clone(),
                round_id,
                SettlementAction::Cashout,
                win_amount,
            ),
            event: RoundEvent::CashedOut {
                user_id: user_id.clone(),
                round_id,
                multiplier,
                win_amount,
                auto: false,
            },
        })
    }

    /// Advance to `now`: auto-cashouts first, then the crash check.
    pub fn tick(&mut self, now: Millis) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        let round = match &mut self.round {
            Some(round) if round.status() == RoundStatus::Running => round,
            _ => return outcome,
        };
        let round_id = round.id();
        let current = round.multiplier_at(now);

        for bet in self.bets.open_bets_mut() {
            let target = match bet.auto_cashout_due(current) {
                Some(target) if round.beats_crash(target) => target,
                _ => continue,
            };
            if let Some(win_amount) = bet.cash_out(target) {
                outcome.settlements.push(SettlementInstruction::credit(
                    bet.user_id.clone(),
                    round_id,
                    SettlementAction::Cashout,
                    win_amount,
                ));
                outcome.events.push(RoundEvent::CashedOut {
                    user_id: bet.user_id.clone(),
                    round_id,
                    multiplier: target,
                    win_amount,
                    auto: true,
                });
            }
        }

        if !round.is_crash_due(now) {
            return outcome;
        }

        let end_time = round.crash_deadline().unwrap_or(now);
        if !round.crash(end_time) {
            return outcome;
        }

        info!(
            round_id,
            crash_point = %round.crash_point(),
            bets = self.bets.len(),
            "Round crashed"
        );

        outcome.events.push(RoundEvent::RoundCrashed {
            round_id,
            crash_point: round.crash_point(),
            server_seed: round.revealed_seed().unwrap_or_default().to_string(),
            client_seed: round.client_seed().to_string(),
            nonce: round.nonce(),
            end_time,
        });

        for bet in self.bets.open_bets_mut() {
            if bet.lose() {
                outcome.events.push(RoundEvent::BetLost {
                    user_id: bet.user_id.clone(),
                    round_id,
                    amount: bet.amount,
                });
            }
        }

        outcome.audit = round.audit_record();
        outcome
    }

    /// Next instant at which `tick` has work to do.
    pub fn next_deadline(&self) -> Option<Millis> {
        let round = self.round.as_ref()?;
        if round.status() != RoundStatus::Running {
            return None;
        }
        let crash = round.crash_deadline()?;
        let auto = self
            .bets
            .next_auto_cashout()
            .and_then(|target| round.time_of(target));
        Some(auto.map_or(crash, |t| t.min(crash)))
    }

    /// Public view at `now`.
    pub fn snapshot(&self, now: Millis) -> Option<RoundSnapshot> {
        let round = self.round.as_ref()?;
        let multiplier = match round.status() {
            RoundStatus::Crashed => round.crash_point().to_multiplier(),
            _ => round.multiplier_at(now).min(round.crash_point().to_multiplier()),
        };
        Some(RoundSnapshot {
            round_id: round.id(),
            status: round.status(),
            multiplier,
            seed_hash: round.commitment().clone(),
            start_time: round.start_time(),
            open_bets: self.bets.open_count(),
            total_bets: self.bets.len(),
            crash_point: match round.status() {
                RoundStatus::Crashed => Some(round.crash_point()),
                _ => None,
            },
            next_seed_hash: self.upcoming_commitment(),
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fairness::seed::FixedSeedSource;

    const START: Millis = 1_000;

    fn zero_seed() -> String {
        "0".repeat(64)
    }

    /// Engine whose first round uses ("0"*64, "abc", `nonce`).
    fn engine_with_nonce(nonce: u64) -> RoundEngine {
        engine_with_seeds(nonce, 3)
    }

    fn engine_with_seeds(nonce: u64, seeds: usize) -> RoundEngine {
        let config = EngineConfig {
            client_seed: "abc".into(),
            first_nonce: nonce,
            ..EngineConfig::default()
        };
        let seeds = FixedSeedSource::new(vec![zero_seed(); seeds]);
        RoundEngine::new(config, Box::new(seeds))
    }

    fn request(user: &str, cents: u64, auto: Option<u64>) -> BetRequest {
        BetRequest {
            user_id: UserId::new(user),
            round_id: None,
            amount: Tokens::from_cents(cents),
            auto_cashout: auto.map(Multiplier::from_thousandths),
        }
    }

    #[test]
    fn test_start_round_emits_commitment() {
        let mut engine = engine_with_nonce(0);
        let event = engine.start_round(START).unwrap();

        match event {
            RoundEvent::RoundStarted {
                round_id,
                seed_hash,
                client_seed,
                contributions,
                next_seed_hash,
                start_time,
            } => {
                assert_eq!(round_id, 1);
                assert!(seed_hash.matches(&zero_seed()));
                assert_eq!(client_seed, "abc");
                assert!(contributions.is_empty());
                assert!(next_seed_hash.map_or(false, |h| h.matches(&zero_seed())));
                assert_eq!(start_time, START);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(engine.current_round().unwrap().crash_point().hundredths(), 112);
        assert_eq!(engine.start_round(START), Err(GameError::RoundInProgress));
    }

    #[test]
    fn test_cashout_boundary_on_golden_round() {
        // crash point 1.12x => deadline START + 120ms
        let mut engine = engine_with_nonce(0);
        engine.start_round(START).unwrap();
        engine.place_bet(request("alice", 1000, None), START).unwrap();
        engine.place_bet(request("bob", 1000, None), START).unwrap();

        let won = engine.cashout(&UserId::new("alice"), START + 119).unwrap();
        assert_eq!(won.multiplier.thousandths(), 1119);
        assert_eq!(won.win_amount, Tokens::from_cents(1119));
        assert_eq!(won.settlement.key.action, SettlementAction::Cashout);

        assert_eq!(
            engine.cashout(&UserId::new("bob"), START + 120).unwrap_err(),
            GameError::RoundNotRunning
        );
    }

    #[test]
    fn test_auto_cashout_before_crash() {
        // nonce 1 => crash point 3.88x
        let mut engine = engine_with_nonce(1);
        engine.start_round(START).unwrap();
        engine.place_bet(request("alice", 1000, Some(2000)), START).unwrap();

        assert!(engine.tick(START + 999).is_empty());

        let outcome = engine.tick(START + 1_000);
        assert!(!outcome.crashed());
        assert_eq!(
            outcome.events,
            vec![RoundEvent::CashedOut {
                user_id: UserId::new("alice"),
                round_id: 1,
                multiplier: Multiplier::from_thousandths(2000),
                win_amount: Tokens::from_cents(2000),
                auto: true,
            }]
        );
        assert_eq!(outcome.settlements.len(), 1);

        let crash = engine.tick(START + 2_880);
        assert!(crash.crashed());
        assert!(crash
            .events
            .iter()
            .all(|e| !matches!(e, RoundEvent::BetLost { .. })));
    }

    #[test]
    fn test_auto_cashout_priority_within_one_tick() {
        let mut engine = engine_with_nonce(1);
        engine.start_round(START).unwrap();
        engine.place_bet(request("alice", 1000, Some(2000)), START).unwrap();
        engine.place_bet(request("bob", 1000, Some(3880)), START).unwrap();

        // one late tick past the crash: alice still cashes at 2.00x,
        // bob's target equals the crash point and loses
        let outcome = engine.tick(START + 10_000);
        assert!(outcome.crashed());
        assert!(matches!(
            outcome.events[0],
            RoundEvent::CashedOut { auto: true, multiplier, .. } if multiplier.thousandths() == 2000
        ));
        assert!(matches!(outcome.events[1], RoundEvent::RoundCrashed { .. }));
        assert!(matches!(
            &outcome.events[2],
            RoundEvent::BetLost { user_id, .. } if user_id.as_str() == "bob"
        ));
        assert_eq!(outcome.events.len(), 3);
    }

    #[test]
    fn test_losses_resolved_exactly_once() {
        let mut engine = engine_with_nonce(0);
        engine.start_round(START).unwrap();
        engine.place_bet(request("alice", 500, None), START).unwrap();
        engine.place_bet(request("bob", 700, None), START).unwrap();

        let outcome = engine.tick(START + 120);
        let lost = outcome
            .events
            .iter()
            .filter(|e| matches!(e, RoundEvent::BetLost { .. }))
            .count();
        assert_eq!(lost, 2);
        assert!(outcome.settlements.is_empty());

        let audit = outcome.audit.unwrap();
        assert_eq!(audit.end_time_ms, START + 120);
        assert_eq!(audit.server_seed, zero_seed());

        assert!(engine.tick(START + 500).is_empty());
        assert!(engine.bets().get(&UserId::new("alice")).map_or(false, |b| b.status == BetStatus::Lost));
    }

    #[test]
    fn test_nonce_and_round_id_advance() {
        let mut engine = engine_with_nonce(0);
        engine.start_round(START).unwrap();
        engine.tick(START + 120);

        engine.start_round(START + 120).unwrap();
        let round = engine.current_round().unwrap();
        assert_eq!(round.id(), 2);
        assert_eq!(round.nonce(), 1);
        assert_eq!(round.crash_point().hundredths(), 388);
        assert_eq!(engine.next_round(), (3, 2));
        assert!(engine.bets().is_empty());
    }

    #[test]
    fn test_bet_validation() {
        let mut engine = engine_with_nonce(1);
        assert_eq!(
            engine.place_bet(request("alice", 100, None), START).unwrap_err(),
            GameError::RoundNotRunning
        );

        engine.start_round(START).unwrap();
        engine.place_bet(request("alice", 100, None), START).unwrap();

        assert_eq!(
            engine.place_bet(request("alice", 100, None), START).unwrap_err(),
            GameError::DuplicateBet
        );
        assert!(matches!(
            engine.place_bet(request("bob", 0, None), START),
            Err(GameError::InvalidAmount(_))
        ));
        assert!(matches!(
            engine.place_bet(request("bob", 100, Some(999)), START),
            Err(GameError::InvalidAmount(_))
        ));
        // target already passed
        assert!(matches!(
            engine.place_bet(request("bob", 100, Some(1500)), START + 600),
            Err(GameError::InvalidAmount(_))
        ));

        let mut wrong_round = request("carol", 100, None);
        wrong_round.round_id = Some(7);
        assert_eq!(
            engine.place_bet(wrong_round, START).unwrap_err(),
            GameError::RoundNotRunning
        );
    }

    #[test]
    fn test_bet_limits_and_cutoff() {
        let config = EngineConfig {
            client_seed: "abc".into(),
            first_nonce: 1,
            min_bet: Tokens::whole(1),
            max_bet: Some(Tokens::whole(100)),
            late_bet_cutoff: Some(Multiplier::from_thousandths(1500)),
            ..EngineConfig::default()
        };
        let mut engine = RoundEngine::new(config, Box::new(FixedSeedSource::new(vec![zero_seed()])));
        engine.start_round(START).unwrap();

        assert!(matches!(
            engine.place_bet(request("a", 50, None), START),
            Err(GameError::InvalidAmount(_))
        ));
        assert!(matches!(
            engine.place_bet(request("a", 10_001, None), START),
            Err(GameError::InvalidAmount(_))
        ));
        assert_eq!(
            engine.place_bet(request("a", 500, None), START + 500).unwrap_err(),
            GameError::RoundNotRunning
        );
        assert!(engine.place_bet(request("a", 500, None), START + 499).is_ok());
    }

    #[test]
    fn test_cashout_errors() {
        let mut engine = engine_with_nonce(1);
        assert_eq!(
            engine.cashout(&UserId::new("alice"), START).unwrap_err(),
            GameError::RoundNotRunning
        );

        engine.start_round(START).unwrap();
        assert_eq!(
            engine.cashout(&UserId::new("alice"), START).unwrap_err(),
            GameError::NoOpenBet
        );

        engine.place_bet(request("alice", 100, None), START).unwrap();
        engine.cashout(&UserId::new("alice"), START + 10).unwrap();
        assert_eq!(
            engine.cashout(&UserId::new("alice"), START + 20).unwrap_err(),
            GameError::NoOpenBet
        );
    }

    #[test]
    fn test_invalid_seed_blocks_start() {
        let mut engine = RoundEngine::new(
            EngineConfig::default(),
            Box::new(FixedSeedSource::new(vec!["abcd"])),
        );
        assert!(matches!(engine.start_round(START), Err(GameError::InvalidSeed(_))));
        assert!(matches!(engine.start_round(START), Err(GameError::InvalidSeed(_))));
        assert!(!engine.is_live());
        assert_eq!(engine.next_round(), (1, 0));
    }

    #[test]
    fn test_next_deadline_prefers_auto_cashout() {
        let mut engine = engine_with_nonce(1);
        assert_eq!(engine.next_deadline(), None);

        engine.start_round(START).unwrap();
        assert_eq!(engine.next_deadline(), Some(START + 2_880));

        engine.place_bet(request("alice", 100, Some(1250)), START).unwrap();
        assert_eq!(engine.next_deadline(), Some(START + 250));
    }

    #[test]
    fn test_snapshot_hides_crash_point_until_crash() {
        let mut engine = engine_with_nonce(0);
        engine.start_round(START).unwrap();

        let live = engine.snapshot(START + 50).unwrap();
        assert_eq!(live.status, RoundStatus::Running);
        assert_eq!(live.multiplier.thousandths(), 1050);
        assert_eq!(live.crash_point, None);

        engine.tick(START + 120);
        let done = engine.snapshot(START + 500).unwrap();
        assert_eq!(done.status, RoundStatus::Crashed);
        assert_eq!(done.crash_point.map(|c| c.hundredths()), Some(112));
    }

    #[test]
    fn test_contributions_fold_into_next_round() {
        let mut engine = engine_with_seeds(0, 4);
        let (round_id, committed) = engine
            .contribute_client_seed(UserId::new("alice"), "lucky".into())
            .unwrap();
        assert_eq!(round_id, 1);

        let event = engine.start_round(START).unwrap();
        let combined = match event {
            RoundEvent::RoundStarted { seed_hash, client_seed, contributions, .. } => {
                assert_eq!(seed_hash, committed);
                assert_eq!(contributions.len(), 1);
                assert_eq!(client_seed, combine_client_seed("abc", &contributions));
                client_seed
            }
            other => panic!("unexpected event {:?}", other),
        };
        let expected = crate::fairness::crash_point::derive_crash_point(&zero_seed(), &combined, 0).unwrap();
        assert_eq!(engine.current_round().unwrap().crash_point(), expected);

        // contributions made during round 1 land in round 2, under the seed
        // committed when round 1 started
        let next_hash = engine.upcoming_commitment().unwrap();
        let (round_id, committed) = engine
            .contribute_client_seed(UserId::new("bob"), "7".into())
            .unwrap();
        assert_eq!((round_id, &committed), (2, &next_hash));

        engine.tick(START + 10_000);
        engine.start_round(START + 10_000).unwrap();
        assert_ne!(engine.current_round().unwrap().client_seed(), "abc");
        assert_eq!(engine.current_round().unwrap().commitment(), &next_hash);

        // pool cleared after use (round 2 runs to 18.48x)
        engine.tick(START + 40_000);
        engine.start_round(START + 40_000).unwrap();
        assert_eq!(engine.current_round().unwrap().client_seed(), "abc");
    }

    #[test]
    fn test_bad_contribution_rejected() {
        let mut engine = engine_with_nonce(0);
        assert!(matches!(
            engine.contribute_client_seed(UserId::new("alice"), String::new()),
            Err(GameError::InvalidClientSeed(_))
        ));
    }

    #[test]
    fn test_commit_rechecks_auto_cashout_after_slow_debit() {
        let mut engine = engine_with_nonce(1);
        engine.start_round(START).unwrap();

        let ticket = engine.prepare_bet(request("alice", 100, Some(1500)), START).unwrap();
        // debit took 600ms; the 1.50x target went by in the meantime
        assert!(matches!(
            engine.commit_bet(ticket.clone(), START + 600),
            Err(GameError::InvalidAmount(_))
        ));
        assert!(engine.commit_bet(ticket, START + 100).is_ok());
    }

    #[test]
    fn test_resume_after_audit_record() {
        let mut first = engine_with_nonce(0);
        first.start_round(START).unwrap();
        let record = first.tick(START + 120).audit.unwrap();

        let mut resumed = engine_with_nonce(0);
        resumed.resume_after(&record);
        assert_eq!(resumed.next_round(), (2, 1));
    }
}
