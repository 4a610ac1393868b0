//! Command definitions
//!
//! Commands represent intentions to change the system state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::TicketExtra;

// =========================================================================
// Reservation
// =========================================================================

/// One requested ticket
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketSpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub dietary_req: Option<String>,
    #[serde(default)]
    pub extra_info: Option<String>,
}

impl TicketSpec {
    pub fn named(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            email: Some(email.into()),
            ..Self::default()
        }
    }

    /// Trimmed, with blank strings dropped and the email lower-cased
    pub fn normalized(&self) -> TicketExtra {
        fn clean(value: &Option<String>) -> Option<String> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        }

        TicketExtra {
            name: clean(&self.name),
            email: clean(&self.email).map(|e| e.to_lowercase()),
            dietary_req: clean(&self.dietary_req),
            extra_info: clean(&self.extra_info),
        }
    }
}

/// Command to reserve tickets for an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveTicketsCommand {
    pub event_id: Uuid,
    pub tickets: Vec<TicketSpec>,
}

impl ReserveTicketsCommand {
    pub fn new(event_id: Uuid, tickets: Vec<TicketSpec>) -> Self {
        Self { event_id, tickets }
    }
}

/// Successful reservation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationResult {
    pub booking_token: String,
    pub reservation_action_id: Uuid,
    pub ticket_count: u32,
    pub item_price_cents: i64,
    pub total_price_cents: i64,
    pub reserve_time: DateTime<Utc>,
}

// =========================================================================
// Settlement
// =========================================================================

/// Command to pay for a reservation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyTicketsCommand {
    pub event_id: Uuid,
    pub booking_token: String,
    /// Card token produced client-side by the gateway's JS library
    pub payment_token: String,
    /// `"{last4}-{exp_year}-{exp_month}"` of the card behind `payment_token`
    pub card_ref: String,
    /// Client IP as seen by the gateway's JS library
    #[serde(default)]
    pub client_ip: Option<String>,
}

impl BuyTicketsCommand {
    pub fn new(
        event_id: Uuid,
        booking_token: String,
        payment_token: String,
        card_ref: String,
    ) -> Self {
        Self {
            event_id,
            booking_token,
            payment_token,
            card_ref,
            client_ip: None,
        }
    }

    pub fn with_client_ip(mut self, client_ip: String) -> Self {
        self.client_ip = Some(client_ip);
        self
    }
}

/// Successful settlement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementReceipt {
    pub reservation_action_id: Uuid,
    /// `None` when the tickets were settled before charge ids were recorded
    pub charge_id: Option<String>,
    /// The reservation had already been paid; no charge was made
    pub already_settled: bool,
}
