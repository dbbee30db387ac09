//! # Crash Round Server
//!
//! Provably-fair crash game: one global round whose multiplier climbs from
//! 1.00x until a crash point fixed by a committed server seed.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    CRASH ROUND SERVER                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Primitives                                │
//! │  ├── units.rs    - Fixed-point multiplier, crash point, tokens│
//! │  ├── hash.rs     - SHA-256 helpers                           │
//! │  └── clock.rs    - Injectable millisecond clock              │
//! │                                                              │
//! │  fairness/       - Provable fairness                         │
//! │  ├── seed.rs     - Server seeds and commitments              │
//! │  ├── crash_point.rs - Crash point derivation                 │
//! │  ├── client_seed.rs - Player client seed contributions       │
//! │  ├── audit.rs    - Per-round audit records                   │
//! │  └── verify.rs   - Recompute a revealed round                │
//! │                                                              │
//! │  game/           - Round lifecycle                           │
//! │  ├── round.rs    - Pending → Running → Crashed               │
//! │  ├── bet.rs      - Bets and the per-round bet book           │
//! │  ├── engine.rs   - Synchronous round state machine           │
//! │  ├── settlement.rs - Debit/credit instructions               │
//! │  ├── events.rs   - Round events and broadcaster seam         │
//! │  └── owner.rs    - Single task owning the engine             │
//! │                                                              │
//! │  ledger/         - Balance store seam, retries, faucet       │
//! │  network/        - WebSocket server and JSON protocol        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Fairness Guarantee
//!
//! `crash = max(1.00, floor(100 / (1 - H / 2^52)) / 100)` where `H` is the
//! first 52 bits of `SHA-256(server_seed ‖ client_seed ‖ nonce)`. The seed
//! hash is published when the round starts and the seed itself when it
//! crashes, so anyone can recompute every round.
//!
//! Game logic has no floating point outside that formula: multipliers are
//! thousandths, crash points hundredths, token amounts hundredths.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod fairness;
pub mod game;
pub mod ledger;
pub mod network;

// Re-export commonly used types
pub use crate::config::GameConfig;
pub use crate::core::clock::{Clock, Millis, SystemClock, TokioClock};
pub use crate::core::units::{CrashPoint, Multiplier, Tokens};
pub use fairness::crash_point::derive_crash_point;
pub use fairness::FairnessError;
pub use game::engine::{EngineConfig, RoundEngine};
pub use game::error::GameError;
pub use game::owner::{RoundHandle, RoundOwner};
pub use ledger::{BalanceStore, InMemoryBalanceStore, LedgerError};
pub use network::{GameServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
