//! Ticket store
//!
//! Persistence seam for reservation and settlement. Every trait method is
//! one transaction on the backing store; no method ever spans a gateway call.
//!
//! Two implementations:
//! - [`PgTicketStore`]: PostgreSQL, capacity enforced by a deferred
//!   constraint trigger evaluated at commit.
//! - [`MemoryTicketStore`]: in-process, same rules under a mutex. Used by
//!   tests and local development.

mod memory;
mod postgres;

pub use memory::MemoryTicketStore;
pub use postgres::{cancel_tickets, expire_tickets, PgTicketStore};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::domain::{
    BuyerRecord, ChargeSource, CompanyRecord, EventRecord, SettlementAttempt, SettlementBlocked,
    SettlementOutcome, TicketExtra, TicketRecord, TransitionError,
};
use crate::inventory::Capacity;

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Transient isolation conflict; the transaction may be retried
    #[error("Serialization conflict")]
    SerializationConflict,

    /// The commit-time capacity constraint rejected the transaction
    #[error("Event capacity exceeded")]
    CapacityExceeded,

    #[error("Settlement blocked: {0}")]
    Blocked(#[from] SettlementBlocked),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// A stored row could not be mapped to a domain record
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::SerializationConflict)
    }
}

// =========================================================================
// Reservation
// =========================================================================

/// Guest user to resolve by email within the reservation transaction.
///
/// Existing users keep their names; only missing name fields are filled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestDraft {
    /// Lower-cased
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketDraft {
    /// Index into [`ReservationDraft::guests`]
    pub guest: Option<usize>,
    pub extra: TicketExtra,
}

/// Everything written by one reservation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationDraft {
    pub company_id: Uuid,
    pub event_id: Uuid,
    pub acting_user_id: Option<Uuid>,
    pub guests: Vec<GuestDraft>,
    pub tickets: Vec<TicketDraft>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedReservation {
    pub reservation_action_id: Uuid,
    pub reserved_at: DateTime<Utc>,
    pub ticket_ids: Vec<Uuid>,
}

// =========================================================================
// Settlement
// =========================================================================

/// Request to open (or take over) a settlement attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementStart {
    pub company_id: Uuid,
    pub buyer_id: Uuid,
    pub reservation_action_id: Uuid,
    /// Card for a new attempt. `None` when the caller expects to resume; a
    /// new attempt is then refused as [`SettlementBlocked::InProgress`].
    pub source: Option<ChargeSource>,
    pub new_customer: bool,
    pub new_card: bool,
    pub stale_after: Duration,
}

/// Result of [`TicketStore::begin_settlement`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementCheckpoint {
    /// Tickets are already paid
    AlreadySettled { charge_id: Option<String> },
    /// Tickets are `payment_pending` under this attempt
    Claimed {
        settlement_action_id: Uuid,
        attempt: u32,
        /// What to charge; for a resumed attempt, the card it was opened with
        source: ChargeSource,
        /// An earlier stale or unresolved checkpoint was taken over
        resumed: bool,
    },
}

/// Final write of a settlement attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementCompletion {
    pub settlement_action_id: Uuid,
    pub reservation_action_id: Uuid,
    pub buyer_id: Uuid,
    /// Set when the gateway customer was newly created; saved on the buyer
    /// whatever the outcome
    pub customer_id: Option<String>,
    /// `Succeeded`, `Failed` or `Unresolved`
    pub outcome: SettlementOutcome,
    pub charge_id: Option<String>,
    pub failure: Option<String>,
}

impl SettlementCompletion {
    /// JSON merged into the settlement action's `extra`
    pub(crate) fn extra_patch(&self) -> serde_json::Value {
        let mut patch = serde_json::json!({ "outcome": self.outcome });
        if let Some(charge_id) = &self.charge_id {
            patch["charge_id"] = serde_json::Value::from(charge_id.as_str());
        }
        if let Some(failure) = &self.failure {
            patch["failure"] = serde_json::Value::from(failure.as_str());
        }
        patch
    }
}

// =========================================================================
// TicketStore trait
// =========================================================================

#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Event owned by `company_id`
    async fn find_event(
        &self,
        company_id: Uuid,
        event_id: Uuid,
    ) -> Result<Option<EventRecord>, StoreError>;

    async fn find_company(&self, company_id: Uuid) -> Result<Option<CompanyRecord>, StoreError>;

    /// User belonging to `company_id`
    async fn find_buyer(
        &self,
        company_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<BuyerRecord>, StoreError>;

    /// Uncommitted read, informational only
    async fn remaining_capacity(&self, event_id: Uuid) -> Result<Capacity, StoreError>;

    /// Insert guests, the reservation action and `reserved` tickets atomically.
    /// Fails with [`StoreError::CapacityExceeded`] when the commit would
    /// oversell the event.
    async fn commit_reservation(
        &self,
        draft: &ReservationDraft,
    ) -> Result<CommittedReservation, StoreError>;

    async fn reservation_tickets(
        &self,
        reservation_action_id: Uuid,
    ) -> Result<Vec<TicketRecord>, StoreError>;

    async fn find_settlement_attempt(
        &self,
        settlement_action_id: Uuid,
    ) -> Result<Option<SettlementAttempt>, StoreError>;

    /// Move the reservation's tickets to `payment_pending` under a settlement
    /// action, or report that they are already paid.
    async fn begin_settlement(
        &self,
        start: &SettlementStart,
    ) -> Result<SettlementCheckpoint, StoreError>;

    /// Record the gateway outcome and move tickets to `paid` or
    /// `payment_failed`. `Unresolved` leaves them `payment_pending`.
    async fn complete_settlement(&self, completion: &SettlementCompletion)
        -> Result<(), StoreError>;

    /// Expire `reserved` and `payment_failed` tickets whose reservation was
    /// made before `cutoff`. Returns the number of tickets expired.
    async fn expire_reservations(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Cancel an unpaid reservation. Returns the number of tickets cancelled.
    async fn cancel_reservation(&self, reservation_action_id: Uuid) -> Result<u64, StoreError>;
}
