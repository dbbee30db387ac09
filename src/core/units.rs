//! Fixed-Point Game Units
//!
//! Integer representations for everything the round logic compares or pays
//! out. Floats only appear at the edges (wire format, audit JSON) and in the
//! crash-point formula itself.
//!
//! ```text
//! ┌──────────────┬──────────────┬─────────────────────────────┐
//! │ Type         │ Resolution   │ Example                     │
//! ├──────────────┼──────────────┼─────────────────────────────┤
//! │ Multiplier   │ 1/1000 x     │ 2500 = 2.500x               │
//! │ CrashPoint   │ 1/100 x      │ 312  = 3.12x                │
//! │ Tokens       │ 1/100 token  │ 1050 = 10.50 tokens         │
//! └──────────────┴──────────────┴─────────────────────────────┘
//! ```
//!
//! The live multiplier grows by exactly 1.000x per second, so one
//! thousandth of a multiplier is one millisecond of round time.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Multiplier scale (thousandths).
pub const MULTIPLIER_SCALE: u64 = 1000;

/// Crash point scale (hundredths).
pub const CRASH_POINT_SCALE: u64 = 100;

/// Token scale (hundredths).
pub const TOKEN_SCALE: u64 = 100;

/// Errors converting external decimal values into game units.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UnitError {
    /// Value is NaN or infinite.
    #[error("value is not a finite number")]
    NotFinite,
    /// Value is negative.
    #[error("value {0} is negative")]
    Negative(f64),
    /// Multiplier below 1.00x.
    #[error("multiplier {0} is below 1.00x")]
    BelowOne(f64),
    /// Value does not fit the fixed-point range.
    #[error("value {0} is out of range")]
    OutOfRange(f64),
}

fn scale_f64(value: f64, scale: u64) -> Result<u64, UnitError> {
    if !value.is_finite() {
        return Err(UnitError::NotFinite);
    }
    if value < 0.0 {
        return Err(UnitError::Negative(value));
    }
    let scaled = (value * scale as f64).round();
    if scaled > u64::MAX as f64 {
        return Err(UnitError::OutOfRange(value));
    }
    Ok(scaled as u64)
}

// =============================================================================
// MULTIPLIER
// =============================================================================

/// Payout multiplier in thousandths.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "f64", try_from = "f64")]
pub struct Multiplier(u64);

impl Multiplier {
    /// 1.000x, the value at the instant a round starts.
    pub const ONE: Multiplier = Multiplier(MULTIPLIER_SCALE);

    /// Create from raw thousandths.
    pub const fn from_thousandths(value: u64) -> Self {
        Self(value)
    }

    /// Live multiplier after `elapsed_ms` of running time.
    #[inline]
    pub const fn from_elapsed_ms(elapsed_ms: u64) -> Self {
        Self(MULTIPLIER_SCALE.saturating_add(elapsed_ms))
    }

    /// Raw thousandths.
    pub const fn thousandths(self) -> u64 {
        self.0
    }

    /// Milliseconds of running time needed to reach this multiplier.
    #[inline]
    pub const fn elapsed_ms(self) -> u64 {
        self.0.saturating_sub(MULTIPLIER_SCALE)
    }

    /// Lossy float view for display and wire encoding.
    pub fn as_f64(self) -> f64 {
        self.0 as f64 / MULTIPLIER_SCALE as f64
    }
}

impl From<Multiplier> for f64 {
    fn from(m: Multiplier) -> f64 {
        m.as_f64()
    }
}

impl TryFrom<f64> for Multiplier {
    type Error = UnitError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        let raw = scale_f64(value, MULTIPLIER_SCALE)?;
        if raw < MULTIPLIER_SCALE {
            return Err(UnitError::BelowOne(value));
        }
        Ok(Self(raw))
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}x", self.as_f64())
    }
}

// =============================================================================
// CRASH POINT
// =============================================================================

/// Crash point in hundredths, never below 1.00x.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "f64", try_from = "f64")]
pub struct CrashPoint(u64);

impl CrashPoint {
    /// Lowest possible crash point (1.00x, instant crash).
    pub const MIN: CrashPoint = CrashPoint(CRASH_POINT_SCALE);

    /// Create from hundredths, clamping to 1.00x.
    pub const fn from_hundredths(value: u64) -> Self {
        if value < CRASH_POINT_SCALE {
            Self::MIN
        } else {
            Self(value)
        }
    }

    /// Raw hundredths.
    pub const fn hundredths(self) -> u64 {
        self.0
    }

    /// Same value as a live multiplier.
    pub const fn to_multiplier(self) -> Multiplier {
        Multiplier::from_thousandths(self.0 * (MULTIPLIER_SCALE / CRASH_POINT_SCALE))
    }

    /// Running time before the round crashes, `(crash_point - 1)` seconds.
    pub const fn run_duration_ms(self) -> u64 {
        self.to_multiplier().elapsed_ms()
    }

    /// Lossy float view for display and wire encoding.
    pub fn as_f64(self) -> f64 {
        self.0 as f64 / CRASH_POINT_SCALE as f64
    }
}

impl From<CrashPoint> for f64 {
    fn from(c: CrashPoint) -> f64 {
        c.as_f64()
    }
}

impl TryFrom<f64> for CrashPoint {
    type Error = UnitError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        let raw = scale_f64(value, CRASH_POINT_SCALE)?;
        if raw < CRASH_POINT_SCALE {
            return Err(UnitError::BelowOne(value));
        }
        Ok(Self(raw))
    }
}

impl fmt::Display for CrashPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}x", self.0 / CRASH_POINT_SCALE, self.0 % CRASH_POINT_SCALE)
    }
}

// =============================================================================
// TOKENS
// =============================================================================

/// Token amount in hundredths.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "f64", try_from = "f64")]
pub struct Tokens(u64);

impl Tokens {
    /// Zero tokens.
    pub const ZERO: Tokens = Tokens(0);

    /// Create from hundredths.
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Create from whole tokens.
    pub const fn whole(tokens: u64) -> Self {
        Self(tokens * TOKEN_SCALE)
    }

    /// Raw hundredths.
    pub const fn cents(self) -> u64 {
        self.0
    }

    /// True for a zero amount.
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Checked addition.
    pub fn checked_add(self, other: Tokens) -> Option<Tokens> {
        self.0.checked_add(other.0).map(Tokens)
    }

    /// Checked subtraction.
    pub fn checked_sub(self, other: Tokens) -> Option<Tokens> {
        self.0.checked_sub(other.0).map(Tokens)
    }

    /// Payout for this stake at `multiplier`, rounded down to the cent.
    pub fn payout(self, multiplier: Multiplier) -> Tokens {
        let raw = self.0 as u128 * multiplier.thousandths() as u128 / MULTIPLIER_SCALE as u128;
        Tokens(u64::try_from(raw).unwrap_or(u64::MAX))
    }

    /// Lossy float view for the wire.
    pub fn as_f64(self) -> f64 {
        self.0 as f64 / TOKEN_SCALE as f64
    }
}

impl From<Tokens> for f64 {
    fn from(t: Tokens) -> f64 {
        t.as_f64()
    }
}

impl TryFrom<f64> for Tokens {
    type Error = UnitError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        scale_f64(value, TOKEN_SCALE).map(Tokens)
    }
}

impl fmt::Display for Tokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / TOKEN_SCALE, self.0 % TOKEN_SCALE)
    }
}

// =============================================================================
// TESTS
// =============================================================================
