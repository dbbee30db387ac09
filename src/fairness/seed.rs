//! Round Seeds
//!
//! Server seeds are 32 bytes from the OS CSPRNG, carried as lowercase hex.
//! The seed stays secret until its round crashes; only its SHA-256
//! commitment is published at round start.

use std::collections::VecDeque;
use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::core::hash::sha256_hex;
use crate::fairness::FairnessError;

/// Minimum server seed entropy in bytes.
pub const MIN_SEED_BYTES: usize = 32;

/// Client seed used when no client seed is configured.
///
/// A constant client seed means players contribute nothing to the outcome;
/// the server logs a warning when it falls back to this value.
pub const DEFAULT_CLIENT_SEED: &str = "crash-round-public-seed";

/// Secret per-round server seed (hex text).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerSeed(String);

impl ServerSeed {
    /// Parse and validate a hex seed of at least `MIN_SEED_BYTES` bytes.
    pub fn from_hex(hex_seed: impl Into<String>) -> Result<Self, FairnessError> {
        let hex_seed = hex_seed.into();
        validate_server_seed(&hex_seed, MIN_SEED_BYTES)?;
        Ok(Self(hex_seed))
    }

    /// Seed text exactly as it enters the hash.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Commitment published before the round runs.
    pub fn commitment(&self) -> SeedCommitment {
        SeedCommitment(sha256_hex(self.0.as_bytes()))
    }

    /// Reveal the seed (consumes it).
    pub fn reveal(self) -> String {
        self.0
    }
}

// Never print the secret by accident.
impl fmt::Debug for ServerSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServerSeed(<{} hex chars>)", self.0.len())
    }
}

/// Check that `seed` is non-empty hex carrying at least `min_bytes` bytes.
pub fn validate_server_seed(seed: &str, min_bytes: usize) -> Result<(), FairnessError> {
    if seed.is_empty() {
        return Err(FairnessError::InvalidSeed("server seed is empty".into()));
    }
    let bytes = hex::decode(seed)
        .map_err(|e| FairnessError::InvalidSeed(format!("server seed is not hex: {}", e)))?;
    if bytes.len() < min_bytes {
        return Err(FairnessError::InvalidSeed(format!(
            "server seed has {} bytes, need at least {}",
            bytes.len(),
            min_bytes
        )));
    }
    Ok(())
}

/// SHA-256 of the server seed text, hex encoded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeedCommitment(String);

impl SeedCommitment {
    /// Wrap an existing hex digest.
    pub fn from_hex(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }

    /// Hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Does `seed` open this commitment?
    pub fn matches(&self, seed: &str) -> bool {
        sha256_hex(seed.as_bytes()) == self.0
    }
}

impl fmt::Display for SeedCommitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// SEED SOURCES
// =============================================================================

/// Supplies one fresh server seed per round.
///
/// The engine lives inside the round owner task, which is shared across
/// await points, so sources must be `Sync` as well as `Send`.
pub trait SeedSource: Send + Sync + fmt::Debug {
    /// Produce the next seed.
    fn next_seed(&mut self) -> Result<ServerSeed, FairnessError>;
}

/// Seeds from the operating system CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsSeedSource;

impl SeedSource for OsSeedSource {
    fn next_seed(&mut self) -> Result<ServerSeed, FairnessError> {
        let mut bytes = [0u8; MIN_SEED_BYTES];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| FairnessError::InvalidSeed(format!("entropy source failed: {}", e)))?;
        ServerSeed::from_hex(hex::encode(bytes))
    }
}

/// Replays a fixed list of seeds, then fails.
///
/// Used by tests and by offline replays of audited rounds.
#[derive(Debug, Default, Clone)]
pub struct FixedSeedSource {
    seeds: VecDeque<String>,
}

impl FixedSeedSource {
    /// Create from hex seed strings (validated lazily, one per round).
    pub fn new<I, S>(seeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            seeds: seeds.into_iter().map(Into::into).collect(),
        }
    }

    /// Seeds left.
    pub fn remaining(&self) -> usize {
        self.seeds.len()
    }
}

impl SeedSource for FixedSeedSource {
    fn next_seed(&mut self) -> Result<ServerSeed, FairnessError> {
        let seed = self
            .seeds
            .pop_front()
            .ok_or_else(|| FairnessError::InvalidSeed("seed source exhausted".into()))?;
        ServerSeed::from_hex(seed)
    }
}
