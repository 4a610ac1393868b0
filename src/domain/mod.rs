//! Domain module
//!
//! Core domain types and business rules for reservation and settlement.

pub mod action;
pub mod buyer;
pub mod context;
pub mod error;
pub mod event;
pub mod ticket;

pub use action::{ActionKind, ActionRecord, ChargeSource, SettlementAttempt, SettlementOutcome};
pub use buyer::{BuyerRecord, CompanyRecord, GuestName, UserRole};
pub use context::OperationContext;
pub use error::DomainError;
pub use event::{EventRecord, EventStatus};
pub use ticket::{
    plan_settlement, SettlementBlocked, SettlementPlan, TicketExtra, TicketRecord, TicketStatus,
    TransitionError,
};
