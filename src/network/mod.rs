//! Network Layer
//!
//! WebSocket transport for bets, cashouts and round broadcasts.
//! No game rules live here; everything goes through the round owner.

pub mod protocol;
pub mod server;

pub use protocol::{ClientMessage, ErrorCode, PlaceBet, RoundState, ServerError, ServerMessage};
pub use server::{GameServer, GameServerError, ServerConfig};
