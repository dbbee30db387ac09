//! Verification API
//!
//! Anyone holding a revealed seed can recompute the crash point and check
//! it against the commitment published at round start.

use crate::core::units::CrashPoint;
use crate::fairness::audit::RoundAuditRecord;
use crate::fairness::crash_point::derive_crash_point;
use crate::fairness::seed::SeedCommitment;
use crate::fairness::FairnessError;

/// Errors that can occur during verification.
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationError {
    /// Revealed seed is malformed.
    Seed(FairnessError),

    /// Revealed seed does not hash to the published commitment.
    CommitmentMismatch {
        /// Commitment published at round start.
        expected: SeedCommitment,
        /// Hash of the revealed seed.
        computed: SeedCommitment,
    },

    /// Recomputed crash point differs from the recorded one.
    CrashPointMismatch {
        /// Recorded crash point.
        recorded: CrashPoint,
        /// Recomputed crash point.
        computed: CrashPoint,
    },
}

impl std::fmt::Display for VerificationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Seed(err) => write!(f, "{}", err),
            Self::CommitmentMismatch { expected, computed } => {
                write!(f, "Commitment mismatch: expected {}, got {}", expected, computed)
            }
            Self::CrashPointMismatch { recorded, computed } => {
                write!(f, "Crash point mismatch: recorded {}, computed {}", recorded, computed)
            }
        }
    }
}

impl std::error::Error for VerificationError {}

impl From<FairnessError> for VerificationError {
    fn from(err: FairnessError) -> Self {
        Self::Seed(err)
    }
}

/// Recompute a crash point from public inputs.
pub fn verify_crash_point(
    server_seed: &str,
    client_seed: &str,
    nonce: u64,
    recorded: CrashPoint,
) -> Result<(), VerificationError> {
    let computed = derive_crash_point(server_seed, client_seed, nonce)?;
    if computed != recorded {
        return Err(VerificationError::CrashPointMismatch { recorded, computed });
    }
    Ok(())
}

/// Verify a full audit record: commitment first, then the crash point.
pub fn verify_record(record: &RoundAuditRecord) -> Result<(), VerificationError> {
    if !record.seed_hash.matches(&record.server_seed) {
        let computed = crate::fairness::seed::ServerSeed::from_hex(record.server_seed.clone())?
            .commitment();
        return Err(VerificationError::CommitmentMismatch {
            expected: record.seed_hash.clone(),
            computed,
        });
    }

    verify_crash_point(
        &record.server_seed,
        &record.client_seed,
        record.nonce,
        record.crash_point,
    )
}
