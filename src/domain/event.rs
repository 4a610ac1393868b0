//! Event records
//!
//! Events are owned by the surrounding CRUD subsystem; this crate only reads
//! them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Event publication status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Published,
    Suspended,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Published => "published",
            EventStatus::Suspended => "suspended",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EventStatus::Pending),
            "published" => Ok(EventStatus::Published),
            "suspended" => Ok(EventStatus::Suspended),
            other => Err(format!("unknown event status '{}'", other)),
        }
    }
}

/// Event row as seen by reservation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    /// Ticket price in minor currency units
    pub price_cents: i64,
    /// `None` means unlimited
    pub ticket_limit: Option<u32>,
    pub status: EventStatus,
}

impl EventRecord {
    pub fn is_published(&self) -> bool {
        self.status == EventStatus::Published
    }

    /// Total price for `ticket_count` tickets, `None` on overflow.
    pub fn total_price_cents(&self, ticket_count: u32) -> Option<i64> {
        self.price_cents.checked_mul(i64::from(ticket_count))
    }
}
