//! Reservation Handler
//!
//! Claims inventory for a list of tickets and issues the capability token
//! that later pays for them.

use chrono::Duration;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::capability::{CapabilityCodec, ReservationCapability};
use crate::domain::{DomainError, EventRecord, GuestName, OperationContext};
use crate::error::AppError;
use crate::inventory::InventoryLedger;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::store::{GuestDraft, ReservationDraft, StoreError, TicketDraft, TicketStore};

use super::{ReservationResult, ReserveTicketsCommand, TicketSpec};

/// Reservation tuning
#[derive(Debug, Clone)]
pub struct ReservationSettings {
    /// Lifetime embedded in issued tokens
    pub token_ttl: Duration,
    /// Retries of the commit on serialization conflicts
    pub commit_retry: RetryPolicy,
}

impl Default for ReservationSettings {
    fn default() -> Self {
        Self {
            token_ttl: Duration::seconds(3600),
            commit_retry: RetryPolicy::default(),
        }
    }
}

/// Public availability of an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingInfo {
    pub event_id: Uuid,
    pub event_name: String,
    pub item_price_cents: i64,
    /// `None` when unlimited
    pub tickets_remaining: Option<u32>,
}

/// Build the store draft: one guest per distinct email, names taken from
/// the first ticket that supplies them.
fn build_draft(
    company_id: Uuid,
    event_id: Uuid,
    acting_user_id: Option<Uuid>,
    specs: &[TicketSpec],
) -> ReservationDraft {
    let mut guests: Vec<GuestDraft> = Vec::new();
    let mut by_email: HashMap<String, usize> = HashMap::new();
    let mut tickets = Vec::with_capacity(specs.len());

    for spec in specs {
        let extra = spec.normalized();
        let guest = extra.email.as_ref().map(|email| {
            let name = GuestName::parse(extra.name.as_deref());
            match by_email.get(email) {
                Some(&index) => {
                    let existing = &mut guests[index];
                    if existing.first_name.is_none() {
                        existing.first_name = name.first_name;
                    }
                    if existing.last_name.is_none() {
                        existing.last_name = name.last_name;
                    }
                    index
                }
                None => {
                    guests.push(GuestDraft {
                        email: email.clone(),
                        first_name: name.first_name,
                        last_name: name.last_name,
                    });
                    by_email.insert(email.clone(), guests.len() - 1);
                    guests.len() - 1
                }
            }
        });
        tickets.push(TicketDraft { guest, extra });
    }

    ReservationDraft {
        company_id,
        event_id,
        acting_user_id,
        guests,
        tickets,
    }
}

fn validate(specs: &[TicketSpec]) -> Result<u32, DomainError> {
    if specs.is_empty() {
        return Err(DomainError::validation("at least one ticket must be purchased"));
    }
    for spec in specs {
        if let Some(email) = spec.normalized().email {
            if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
                return Err(DomainError::validation(format!("invalid email '{}'", email)));
            }
        }
    }
    u32::try_from(specs.len()).map_err(|_| DomainError::validation("too many tickets"))
}

/// Handler for ticket reservations
pub struct ReservationHandler {
    store: Arc<dyn TicketStore>,
    ledger: InventoryLedger,
    codec: CapabilityCodec,
    settings: ReservationSettings,
}

impl ReservationHandler {
    pub fn new(
        store: Arc<dyn TicketStore>,
        codec: CapabilityCodec,
        settings: ReservationSettings,
    ) -> Self {
        Self {
            ledger: InventoryLedger::new(store.clone()),
            store,
            codec,
            settings,
        }
    }

    async fn published_event(
        &self,
        company_id: Uuid,
        event_id: Uuid,
    ) -> Result<EventRecord, AppError> {
        let event = self
            .store
            .find_event(company_id, event_id)
            .await?
            .ok_or(DomainError::EventNotFound(event_id))?;

        if !event.is_published() {
            return Err(DomainError::EventNotPublished.into());
        }
        Ok(event)
    }

    /// Availability summary shown before booking
    pub async fn booking_info(
        &self,
        event_id: Uuid,
        context: &OperationContext,
    ) -> Result<BookingInfo, AppError> {
        let company_id = context.company()?;

        let event = self.published_event(company_id, event_id).await?;
        let capacity = self.ledger.remaining_capacity(event.id).await?;

        Ok(BookingInfo {
            event_id: event.id,
            event_name: event.name,
            item_price_cents: event.price_cents,
            tickets_remaining: capacity.remaining(),
        })
    }

    /// Execute the reservation command
    pub async fn execute(
        &self,
        command: ReserveTicketsCommand,
        context: &OperationContext,
    ) -> Result<ReservationResult, AppError> {
        let company_id = context.company()?;

        let ticket_count = validate(&command.tickets)?;
        let event = self.published_event(company_id, command.event_id).await?;

        // Fail fast with a friendly count; the commit below is authoritative
        let capacity = self.ledger.remaining_capacity(event.id).await?;
        if !capacity.admits(ticket_count) {
            return Err(DomainError::InsufficientCapacity {
                remaining: capacity.remaining(),
            }
            .into());
        }

        let total_price_cents = event
            .total_price_cents(ticket_count)
            .ok_or_else(|| DomainError::validation("order total is too large"))?;

        let draft = build_draft(
            company_id,
            event.id,
            context.request_user_id,
            &command.tickets,
        );

        let committed = retry_with_backoff(
            &self.settings.commit_retry,
            StoreError::is_retryable,
            |_| self.store.commit_reservation(&draft),
        )
        .await;

        let committed = match committed {
            Ok(committed) => committed,
            Err(StoreError::CapacityExceeded) | Err(StoreError::SerializationConflict) => {
                let remaining = self
                    .ledger
                    .remaining_capacity(event.id)
                    .await
                    .ok()
                    .and_then(|c| c.remaining());
                tracing::info!(
                    event_id = %event.id,
                    ticket_count,
                    remaining = ?remaining,
                    correlation_id = ?context.correlation_id,
                    "Reservation lost capacity race"
                );
                return Err(DomainError::InsufficientCapacity { remaining }.into());
            }
            Err(e) => return Err(e.into()),
        };

        let capability = ReservationCapability {
            reservation_action_id: committed.reservation_action_id,
            event_id: event.id,
            price_cents: total_price_cents,
            ticket_count,
            event_name: event.name.clone(),
            issued_at: committed.reserved_at,
        };
        let booking_token = self.codec.encode(&capability, self.settings.token_ttl)?;

        tracing::info!(
            event_id = %event.id,
            reservation_action_id = %committed.reservation_action_id,
            ticket_count,
            total_price_cents,
            correlation_id = ?context.correlation_id,
            "Tickets reserved"
        );

        Ok(ReservationResult {
            booking_token,
            reservation_action_id: committed.reservation_action_id,
            ticket_count,
            item_price_cents: event.price_cents,
            total_price_cents,
            reserve_time: committed.reserved_at,
        })
    }
}
