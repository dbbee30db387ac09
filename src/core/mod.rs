//! Core primitives.
//!
//! Fixed-point units, hashing and the injectable clock. Nothing here knows
//! about rounds or bets.

pub mod clock;
pub mod hash;
pub mod units;

// Re-export core types
pub use clock::{Clock, ManualClock, Millis, SystemClock, TokioClock};
pub use hash::{hash_bytes, sha256_hex, Digest256, TextHasher};
pub use units::{CrashPoint, Multiplier, Tokens, UnitError};
