//! Round lifecycle and settlement.
//!
//! `round`, `bet`, `settlement` and `engine` are synchronous and take the
//! clock reading as an argument. `owner` is the only async piece: it runs
//! the engine inside a single task and hands settlements to the ledger's
//! `Settler`.

pub mod bet;
pub mod engine;
pub mod error;
pub mod events;
pub mod owner;
pub mod round;
pub mod settlement;

pub use bet::{Bet, BetBook, BetStatus, UserId};
pub use engine::{
    BetRequest, BetTicket, CashoutOutcome, EngineConfig, RoundEngine, RoundSnapshot, TickOutcome,
};
pub use error::GameError;
pub use events::{BroadcastError, RoundBroadcaster, RoundEvent};
pub use owner::{CashoutReceipt, OwnerConfig, RoundCommand, RoundHandle, RoundOwner};
pub use round::{Round, RoundId, RoundStatus};
pub use settlement::{IdempotencyKey, SettlementAction, SettlementInstruction, SettlementKind};
