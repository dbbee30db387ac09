//! Round State
//!
//! ```text
//!   new() ──> Pending ──start(now)──> Running ──crash()──> Crashed
//!              │                        │
//!              crash point fixed        multiplier(t) = 1 + (t - start)/1000ms
//! ```
//!
//! The crash point is derived in `new()` and never changes. The multiplier
//! is a pure function of the clock, so any party can recompute it.

use serde::{Deserialize, Serialize};

use crate::core::clock::Millis;
use crate::core::units::{CrashPoint, Multiplier};
use crate::fairness::audit::{utc_from_millis, RoundAuditRecord};
use crate::fairness::crash_point::derive_crash_point;
use crate::fairness::seed::{SeedCommitment, ServerSeed};
use crate::fairness::FairnessError;

/// Monotonic round identifier.
pub type RoundId = u64;

/// Round lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    /// Crash point fixed, not yet started.
    Pending,
    /// Multiplier climbing.
    Running,
    /// Finished; seed may be revealed.
    Crashed,
}

/// The single live round.
#[derive(Debug, Clone)]
pub struct Round {
    id: RoundId,
    server_seed: ServerSeed,
    commitment: SeedCommitment,
    client_seed: String,
    nonce: u64,
    crash_point: CrashPoint,
    status: RoundStatus,
    start_time: Option<Millis>,
    end_time: Option<Millis>,
}

impl Round {
    /// Create a Pending round, deriving its crash point.
    pub fn new(
        id: RoundId,
        server_seed: ServerSeed,
        client_seed: impl Into<String>,
        nonce: u64,
    ) -> Result<Self, FairnessError> {
        let client_seed = client_seed.into();
        let crash_point = derive_crash_point(server_seed.as_str(), &client_seed, nonce)?;
        let commitment = server_seed.commitment();

        Ok(Self {
            id,
            server_seed,
            commitment,
            client_seed,
            nonce,
            crash_point,
            status: RoundStatus::Pending,
            start_time: None,
            end_time: None,
        })
    }

    /// Round id.
    pub fn id(&self) -> RoundId {
        self.id
    }

    /// Current status.
    pub fn status(&self) -> RoundStatus {
        self.status
    }

    /// Public commitment to the server seed.
    pub fn commitment(&self) -> &SeedCommitment {
        &self.commitment
    }

    /// Client seed mixed into the hash.
    pub fn client_seed(&self) -> &str {
        &self.client_seed
    }

    /// Nonce mixed into the hash.
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Secret crash point. Server side only until the crash.
    pub fn crash_point(&self) -> CrashPoint {
        self.crash_point
    }

    /// Start time, once running.
    pub fn start_time(&self) -> Option<Millis> {
        self.start_time
    }

    /// Server seed, only after the crash.
    pub fn revealed_seed(&self) -> Option<&str> {
        match self.status {
            RoundStatus::Crashed => Some(self.server_seed.as_str()),
            _ => None,
        }
    }

    /// Pending -> Running. Returns false if the round was not Pending.
    pub fn start(&mut self, now: Millis) -> bool {
        if self.status != RoundStatus::Pending {
            return false;
        }
        self.status = RoundStatus::Running;
        self.start_time = Some(now);
        true
    }

    /// Is the round accepting bets and cashouts?
    pub fn is_live(&self) -> bool {
        matches!(self.status, RoundStatus::Pending | RoundStatus::Running)
    }

    /// Live multiplier at `now` (1.00x before start).
    pub fn multiplier_at(&self, now: Millis) -> Multiplier {
        match self.start_time {
            Some(start) => Multiplier::from_elapsed_ms(now.saturating_sub(start)),
            None => Multiplier::ONE,
        }
    }

    /// Instant the multiplier reaches the crash point.
    pub fn crash_deadline(&self) -> Option<Millis> {
        self.start_time
            .map(|start| start + self.crash_point.run_duration_ms())
    }

    /// When `target` will be reached, if the round is running.
    pub fn time_of(&self, target: Multiplier) -> Option<Millis> {
        self.start_time.map(|start| start + target.elapsed_ms())
    }

    /// Has the multiplier reached the crash point at `now`?
    pub fn is_crash_due(&self, now: Millis) -> bool {
        self.status == RoundStatus::Running
            && self.multiplier_at(now) >= self.crash_point.to_multiplier()
    }

    /// Would a cashout at `multiplier` beat the crash? Ties lose.
    pub fn beats_crash(&self, multiplier: Multiplier) -> bool {
        multiplier < self.crash_point.to_multiplier()
    }

    /// Running -> Crashed. Returns false if not Running, so a second crash
    /// (timer and tick racing) is a no-op.
    pub fn crash(&mut self, at: Millis) -> bool {
        if self.status != RoundStatus::Running {
            return false;
        }
        self.status = RoundStatus::Crashed;
        self.end_time = Some(at);
        true
    }

    /// Audit record, available once crashed.
    pub fn audit_record(&self) -> Option<RoundAuditRecord> {
        if self.status != RoundStatus::Crashed {
            return None;
        }
        let start_time_ms = self.start_time.unwrap_or_default();
        let end_time_ms = self.end_time.unwrap_or_default();
        Some(RoundAuditRecord {
            round_id: self.id,
            server_seed: self.server_seed.as_str().to_string(),
            seed_hash: self.commitment.clone(),
            client_seed: self.client_seed.clone(),
            nonce: self.nonce,
            crash_point: self.crash_point,
            start_time_ms,
            end_time_ms,
            started_at: utc_from_millis(start_time_ms),
            ended_at: utc_from_millis(end_time_ms),
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
