//! Client Seed Contributions
//!
//! Players may submit a client seed for the next round. Contributions are
//! collected while the current round runs and folded into one client seed
//! when the next round starts:
//!
//! ```text
//! client_seed = SHA-256(base ‖ "\n" user_1 ":" seed_1 ‖ ... ‖ "\n" user_n ":" seed_n)
//! ```
//!
//! Users are taken in ascending order. With no contributions the base seed
//! is used unchanged, so rounds without players still verify against the
//! configured value.
//!
//! The server seed of that next round is drawn and committed before any of
//! these contributions arrive, so the server cannot pick a seed after seeing
//! them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::hash::TextHasher;
use crate::fairness::FairnessError;
use crate::game::bet::UserId;

/// Longest accepted contribution, in bytes.
pub const MAX_CLIENT_SEED_LEN: usize = 64;

/// Distinct contributors accepted per round.
pub const MAX_CONTRIBUTIONS: usize = 256;

/// One player's contribution, as published at round start.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedContribution {
    /// Contributor.
    pub user_id: UserId,
    /// Submitted text.
    pub client_seed: String,
}

/// Non-empty printable ASCII, at most `MAX_CLIENT_SEED_LEN` bytes.
pub fn validate_client_seed(seed: &str) -> Result<(), FairnessError> {
    if seed.is_empty() {
        return Err(FairnessError::InvalidClientSeed("client seed is empty".into()));
    }
    if seed.len() > MAX_CLIENT_SEED_LEN {
        return Err(FairnessError::InvalidClientSeed(format!(
            "client seed has {} bytes, limit is {}",
            seed.len(),
            MAX_CLIENT_SEED_LEN
        )));
    }
    if !seed.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(FairnessError::InvalidClientSeed(
            "client seed must be printable ASCII without spaces".into(),
        ));
    }
    Ok(())
}

/// Fold contributions into the client seed of a round.
pub fn combine_client_seed(base: &str, contributions: &[SeedContribution]) -> String {
    if contributions.is_empty() {
        return base.to_string();
    }
    let mut hasher = TextHasher::new();
    hasher.update_str(base);
    for c in contributions {
        hasher.update_str("\n");
        hasher.update_str(c.user_id.as_str());
        hasher.update_str(":");
        hasher.update_str(&c.client_seed);
    }
    hex::encode(hasher.finalize())
}

/// Contributions waiting for the next round. Latest submission per user wins.
#[derive(Debug, Default, Clone)]
pub struct ClientSeedPool {
    entries: BTreeMap<UserId, String>,
}

impl ClientSeedPool {
    /// Empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace `user_id`'s contribution.
    pub fn contribute(&mut self, user_id: UserId, seed: String) -> Result<(), FairnessError> {
        validate_client_seed(&seed)?;
        if !self.entries.contains_key(&user_id) && self.entries.len() >= MAX_CONTRIBUTIONS {
            return Err(FairnessError::InvalidClientSeed(format!(
                "round already has {} contributions",
                MAX_CONTRIBUTIONS
            )));
        }
        self.entries.insert(user_id, seed);
        Ok(())
    }

    /// Number of contributors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No contributions yet?
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Contributions in user order.
    pub fn contributions(&self) -> Vec<SeedContribution> {
        self.entries
            .iter()
            .map(|(user_id, client_seed)| SeedContribution {
                user_id: user_id.clone(),
                client_seed: client_seed.clone(),
            })
            .collect()
    }

    /// Forget everything (after a round started with these).
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
