//! Crash Point Derivation
//!
//! ```text
//! digest = SHA-256(server_seed ‖ client_seed ‖ nonce)      (UTF-8 text, nonce in decimal)
//! H      = first 13 hex chars of digest                    (52 bits)
//! crash  = floor(100 / (1 - H / 2^52)) / 100,  min 1.00
//! ```
//!
//! 52 bits is the f64 mantissa width, so `H / 2^52` is exact in every
//! language and anyone can recompute the result from the revealed seed.

use crate::core::hash::{Digest256, TextHasher};
use crate::core::units::{CrashPoint, CRASH_POINT_SCALE};
use crate::fairness::seed::{validate_server_seed, MIN_SEED_BYTES};
use crate::fairness::FairnessError;

/// Number of digest bits used for the outcome.
pub const OUTCOME_BITS: u32 = 52;

/// Hash the three fairness inputs.
pub fn fairness_digest(server_seed: &str, client_seed: &str, nonce: u64) -> Digest256 {
    let mut hasher = TextHasher::new();
    hasher.update_str(server_seed);
    hasher.update_str(client_seed);
    hasher.update_decimal(nonce);
    hasher.finalize()
}

/// Leading 52 bits of a digest (the first 13 hex characters).
#[inline]
pub fn outcome_bits(digest: &Digest256) -> u64 {
    let mut head = [0u8; 8];
    head[1..8].copy_from_slice(&digest[..7]);
    u64::from_be_bytes(head) >> 4
}

/// Map 52 uniform bits onto the crash-point curve.
pub fn crash_point_from_bits(h: u64) -> CrashPoint {
    let h = h & ((1u64 << OUTCOME_BITS) - 1);
    let ratio = h as f64 / (1u64 << OUTCOME_BITS) as f64;
    let hundredths = (CRASH_POINT_SCALE as f64 / (1.0 - ratio)).floor();
    CrashPoint::from_hundredths(hundredths as u64)
}

/// Derive the crash point for one round.
///
/// Fails with `InvalidSeed` when the server seed is empty, not hex, or
/// shorter than `MIN_SEED_BYTES`.
pub fn derive_crash_point(
    server_seed: &str,
    client_seed: &str,
    nonce: u64,
) -> Result<CrashPoint, FairnessError> {
    validate_server_seed(server_seed, MIN_SEED_BYTES)?;
    let digest = fairness_digest(server_seed, client_seed, nonce);
    Ok(crash_point_from_bits(outcome_bits(&digest)))
}

// =============================================================================
// TESTS
// =============================================================================
