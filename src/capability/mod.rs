//! Reservation capability tokens
//!
//! A capability is the only state that crosses from the reserve call to the
//! buy call. It is sealed with AES-256-GCM so the holder can neither read nor
//! alter the price, ticket count or reservation id.
//!
//! Wire format (URL-safe base64, no padding):
//!
//! ```text
//! [version (1 byte)][nonce (12 bytes)][ciphertext + tag]
//! ```
//!
//! The plaintext is the JSON form of [`ReservationCapability`] plus an
//! absolute `expires_at`.

mod codec;

pub use codec::{CapabilityCodec, CodecError, MIN_SECRET_LEN};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload proving that a reservation exists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationCapability {
    pub reservation_action_id: Uuid,
    pub event_id: Uuid,
    /// Total price for all tickets, minor currency units
    pub price_cents: i64,
    pub ticket_count: u32,
    pub event_name: String,
    pub issued_at: DateTime<Utc>,
}
