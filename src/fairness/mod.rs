//! Provably Fair Crash Points
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    FAIRNESS                                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  seed.rs        - Server seeds, commitments, seed sources    │
//! │  client_seed.rs - Player contributions to the client seed    │
//! │  crash_point.rs - SHA-256 → 52-bit outcome → crash point     │
//! │  audit.rs       - Per-round audit records and stores         │
//! │  verify.rs      - Recompute and check a revealed round       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! `crash = max(1.00, floor(100 / (1 - H / 2^52)) / 100)` where `H` is the
//! first 13 hex digits of `SHA-256(server_seed ‖ client_seed ‖ nonce)`.

use thiserror::Error;

pub mod audit;
pub mod client_seed;
pub mod crash_point;
pub mod seed;
pub mod verify;

pub use audit::{
    utc_from_millis, AuditError, AuditStore, AuditWriter, JsonLinesAuditStore, MemoryAuditStore,
    RoundAuditRecord,
};
pub use client_seed::{
    combine_client_seed, validate_client_seed, ClientSeedPool, SeedContribution,
    MAX_CLIENT_SEED_LEN, MAX_CONTRIBUTIONS,
};
pub use crash_point::{
    crash_point_from_bits, derive_crash_point, fairness_digest, outcome_bits, OUTCOME_BITS,
};
pub use seed::{
    validate_server_seed, FixedSeedSource, OsSeedSource, SeedCommitment, SeedSource, ServerSeed,
    DEFAULT_CLIENT_SEED, MIN_SEED_BYTES,
};
pub use verify::{verify_crash_point, verify_record, VerificationError};

/// Seed and derivation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FairnessError {
    /// Seed empty, not hex, too short, or the seed source failed.
    #[error("invalid seed: {0}")]
    InvalidSeed(String),

    /// Client seed contribution rejected (empty, too long, not printable,
    /// or the round is full).
    #[error("invalid client seed: {0}")]
    InvalidClientSeed(String),
}
