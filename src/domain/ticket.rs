//! Ticket lifecycle
//!
//! Ticket status is a closed set of states; every status change in the
//! stores goes through [`TicketStatus::transition`] so that the rules below
//! hold regardless of backend.
//!
//! ```text
//! reserved ──► payment_pending ──► paid
//!    │   ▲            │
//!    │   └────────────┤
//!    │                ▼
//!    │         payment_failed ──► expired / cancelled
//!    ▼
//! expired / cancelled
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::action::SettlementAttempt;

/// Ticket status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Reserved,
    PaymentPending,
    Paid,
    PaymentFailed,
    Expired,
    Cancelled,
}

/// Statuses that count against an event's capacity.
pub const CAPACITY_HOLDING: [TicketStatus; 4] = [
    TicketStatus::Reserved,
    TicketStatus::PaymentPending,
    TicketStatus::Paid,
    TicketStatus::PaymentFailed,
];

/// A status change that the lifecycle does not allow
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid ticket transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: TicketStatus,
    pub to: TicketStatus,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Reserved => "reserved",
            TicketStatus::PaymentPending => "payment_pending",
            TicketStatus::Paid => "paid",
            TicketStatus::PaymentFailed => "payment_failed",
            TicketStatus::Expired => "expired",
            TicketStatus::Cancelled => "cancelled",
        }
    }

    /// No transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TicketStatus::Paid | TicketStatus::Expired | TicketStatus::Cancelled
        )
    }

    pub fn holds_capacity(&self) -> bool {
        CAPACITY_HOLDING.contains(self)
    }

    pub fn can_transition_to(&self, next: TicketStatus) -> bool {
        use TicketStatus::*;
        matches!(
            (self, next),
            (Reserved, PaymentPending)
                | (PaymentPending, Paid)
                | (PaymentPending, PaymentFailed)
                | (PaymentFailed, PaymentPending)
                | (Reserved, Expired)
                | (PaymentFailed, Expired)
                | (Reserved, Cancelled)
                | (PaymentFailed, Cancelled)
        )
    }

    /// Validate and perform a transition.
    pub fn transition(self, next: TicketStatus) -> Result<TicketStatus, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reserved" => Ok(TicketStatus::Reserved),
            "payment_pending" => Ok(TicketStatus::PaymentPending),
            "paid" => Ok(TicketStatus::Paid),
            "payment_failed" => Ok(TicketStatus::PaymentFailed),
            "expired" => Ok(TicketStatus::Expired),
            "cancelled" => Ok(TicketStatus::Cancelled),
            other => Err(format!("unknown ticket status '{}'", other)),
        }
    }
}

/// Per-ticket buyer-supplied metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketExtra {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dietary_req: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_info: Option<String>,
}

/// Ticket row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketRecord {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: Option<Uuid>,
    pub status: TicketStatus,
    pub reserve_action_id: Uuid,
    pub paid_action_id: Option<Uuid>,
    pub extra: TicketExtra,
}

// =========================================================================
// Settlement planning
// =========================================================================

/// What a settlement call may do with a reservation's tickets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementPlan {
    /// Every ticket is already paid; nothing to charge
    AlreadySettled,
    /// Open a new attempt: new settlement action, tickets to payment_pending
    Start { attempt: u32 },
    /// Take over a stale or unresolved pending attempt, keeping its number
    Resume { settlement_action_id: Uuid, attempt: u32 },
}

/// Why a settlement call cannot proceed
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SettlementBlocked {
    #[error("reservation has no tickets")]
    NoTickets,

    #[error("settlement already in progress")]
    InProgress,

    #[error("reservation is {0}")]
    Closed(TicketStatus),

    #[error("reservation tickets disagree on status")]
    Inconsistent,
}

/// Decide how a settlement call proceeds.
///
/// `current` is the settlement attempt referenced by the tickets' paid
/// action, if any.
pub fn plan_settlement(
    statuses: &[TicketStatus],
    current: Option<(Uuid, &SettlementAttempt)>,
    now: DateTime<Utc>,
    stale_after: Duration,
) -> Result<SettlementPlan, SettlementBlocked> {
    let status = *statuses.first().ok_or(SettlementBlocked::NoTickets)?;
    if statuses.iter().any(|s| *s != status) {
        return Err(SettlementBlocked::Inconsistent);
    }

    match status {
        TicketStatus::Paid => Ok(SettlementPlan::AlreadySettled),
        TicketStatus::Reserved | TicketStatus::PaymentFailed => Ok(SettlementPlan::Start {
            attempt: current.map(|(_, a)| a.attempt + 1).unwrap_or(1),
        }),
        TicketStatus::PaymentPending => match current {
            Some((id, attempt)) if attempt.is_resumable(now, stale_after) => {
                Ok(SettlementPlan::Resume {
                    settlement_action_id: id,
                    attempt: attempt.attempt,
                })
            }
            _ => Err(SettlementBlocked::InProgress),
        },
        closed @ (TicketStatus::Expired | TicketStatus::Cancelled) => {
            Err(SettlementBlocked::Closed(closed))
        }
    }
}
