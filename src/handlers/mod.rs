//! Command Handlers module
//!
//! Handlers that orchestrate reservation and settlement.
//! Each handler coordinates the ticket store, capability codec and gateway.

mod commands;
mod payment_method;
mod reservation_handler;
mod settlement_handler;

#[cfg(test)]
mod tests;

pub use commands::*;
pub use payment_method::{resolve_payment_method, ResolvedPaymentMethod};
pub use reservation_handler::{BookingInfo, ReservationHandler, ReservationSettings};
pub use settlement_handler::{SettlementHandler, SettlementSettings};
