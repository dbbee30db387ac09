//! Game configuration.
//!
//! Defaults suit a local server; every field can be overridden through a
//! `CRASH_*` environment variable.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::core::units::{Multiplier, Tokens};
use crate::fairness::seed::DEFAULT_CLIENT_SEED;
use crate::game::engine::EngineConfig;
use crate::game::owner::OwnerConfig;
use crate::ledger::RetryPolicy;

/// Round, settlement and persistence settings.
#[derive(Debug, Clone, PartialEq)]
pub struct GameConfig {
    /// Multiplier tick period.
    pub tick_interval: Duration,
    /// Client seed; `None` falls back to the public placeholder.
    pub client_seed: Option<String>,
    /// Delay before retrying a round whose seed failed.
    pub restart_backoff: Duration,
    /// Balance-store retry policy.
    pub retry: RetryPolicy,
    /// Period between redelivery passes over failed credits.
    pub settlement_redelivery: Duration,
    /// Smallest stake.
    pub min_bet: Tokens,
    /// Largest stake.
    pub max_bet: Option<Tokens>,
    /// Stop accepting bets at this multiplier.
    pub late_bet_cutoff: Option<Multiplier>,
    /// Command queue depth of the round owner.
    pub command_capacity: usize,
    /// Event fan-out buffer.
    pub event_capacity: usize,
    /// JSON-lines audit log; `None` keeps records in memory.
    pub audit_log: Option<PathBuf>,
}

impl Default for GameConfig {
    fn default() -> Self {
        let owner = OwnerConfig::default();
        Self {
            tick_interval: owner.tick_interval,
            client_seed: None,
            restart_backoff: owner.restart_backoff,
            retry: owner.retry,
            settlement_redelivery: owner.settlement_redelivery,
            min_bet: Tokens::from_cents(1),
            max_bet: None,
            late_bet_cutoff: None,
            command_capacity: owner.command_capacity,
            event_capacity: 1024,
            audit_log: None,
        }
    }
}

impl GameConfig {
    /// Load from environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            tick_interval: env_parse::<u64>("CRASH_TICK_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.tick_interval),
            client_seed: std::env::var("CRASH_CLIENT_SEED")
                .ok()
                .filter(|s| !s.is_empty()),
            restart_backoff: env_parse::<u64>("CRASH_RESTART_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.restart_backoff),
            retry: RetryPolicy {
                max_attempts: env_parse("CRASH_RETRY_ATTEMPTS")
                    .unwrap_or(defaults.retry.max_attempts),
                initial_backoff: env_parse::<u64>("CRASH_RETRY_BACKOFF_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.initial_backoff),
                max_backoff: defaults.retry.max_backoff,
            },
            settlement_redelivery: env_parse::<u64>("CRASH_SETTLEMENT_REDELIVERY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.settlement_redelivery),
            min_bet: env_parse::<f64>("CRASH_MIN_BET")
                .and_then(|v| Tokens::try_from(v).ok())
                .unwrap_or(defaults.min_bet),
            max_bet: env_parse::<f64>("CRASH_MAX_BET").and_then(|v| Tokens::try_from(v).ok()),
            late_bet_cutoff: env_parse::<f64>("CRASH_LATE_BET_CUTOFF")
                .and_then(|v| Multiplier::try_from(v).ok()),
            command_capacity: env_parse("CRASH_COMMAND_CAPACITY")
                .unwrap_or(defaults.command_capacity),
            event_capacity: env_parse("CRASH_EVENT_CAPACITY").unwrap_or(defaults.event_capacity),
            audit_log: std::env::var("CRASH_AUDIT_LOG").ok().map(PathBuf::from),
        }
    }

    /// Client seed in effect.
    pub fn client_seed(&self) -> &str {
        self.client_seed.as_deref().unwrap_or(DEFAULT_CLIENT_SEED)
    }

    /// Settings for the round engine.
    pub fn engine_config(&self) -> EngineConfig {
        if self.client_seed.is_none() {
            warn!(
                "No client seed configured, using the public placeholder {:?}; \
                 rounds without player contributions carry no client entropy. \
                 Set CRASH_CLIENT_SEED",
                DEFAULT_CLIENT_SEED
            );
        }
        EngineConfig {
            client_seed: self.client_seed().to_string(),
            min_bet: self.min_bet,
            max_bet: self.max_bet,
            late_bet_cutoff: self.late_bet_cutoff,
            ..EngineConfig::default()
        }
    }

    /// Settings for the round owner task.
    pub fn owner_config(&self) -> OwnerConfig {
        OwnerConfig {
            tick_interval: self.tick_interval,
            restart_backoff: self.restart_backoff,
            retry: self.retry,
            settlement_redelivery: self.settlement_redelivery,
            command_capacity: self.command_capacity,
        }
    }
}

/// Parse an environment variable, warning on malformed values.
pub(crate) fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring malformed {}={:?}", key, raw);
            None
        }
    }
}
