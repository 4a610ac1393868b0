//! Idempotency module
//!
//! Keys handed to the payment gateway so that repeated charge requests for
//! the same settlement attempt are deduplicated on the gateway side.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Gateway idempotency key for one settlement attempt.
///
/// Derived only from the reservation action id and the attempt number, so
/// every re-entry of an attempt (client resubmission, in-process retry,
/// recovery of a stale checkpoint) presents the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChargeKey(String);

impl ChargeKey {
    pub fn for_attempt(reservation_action_id: Uuid, attempt: u32) -> Self {
        Self(format!("charge-{}-{}", reservation_action_id, attempt))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChargeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charge_key_is_deterministic() {
        let id = Uuid::new_v4();
        assert_eq!(ChargeKey::for_attempt(id, 1), ChargeKey::for_attempt(id, 1));
        assert_eq!(
            ChargeKey::for_attempt(id, 1).as_str(),
            format!("charge-{}-1", id)
        );
    }

    #[test]
    fn test_charge_key_differs_per_attempt_and_reservation() {
        let id = Uuid::new_v4();
        assert_ne!(ChargeKey::for_attempt(id, 1), ChargeKey::for_attempt(id, 2));
        assert_ne!(
            ChargeKey::for_attempt(id, 1),
            ChargeKey::for_attempt(Uuid::new_v4(), 1)
        );
    }
}
