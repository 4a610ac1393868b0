//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use thiserror::Error;
use uuid::Uuid;

/// Business-level failures of reservation and settlement.
///
/// Messages are safe to show to the buyer: they never carry storage or
/// gateway detail.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed request
    #[error("{0}")]
    Validation(String),

    /// Event does not exist for this tenant
    #[error("event not found")]
    EventNotFound(Uuid),

    /// Event exists but is not open for booking
    #[error("event not published")]
    EventNotPublished,

    /// Reservation referenced by a capability no longer has tickets
    #[error("reservation not found")]
    ReservationNotFound(Uuid),

    /// Buyer or tenant record missing
    #[error("{entity} not found")]
    RecordNotFound { entity: &'static str, id: Uuid },

    /// Not enough tickets left; `remaining` is included when known
    #[error("{}", insufficient_capacity_message(.remaining))]
    InsufficientCapacity { remaining: Option<u32> },

    /// Capability token lapsed or failed authentication
    #[error("payment window expired, please reserve again")]
    PaymentWindowExpired,

    /// The gateway refused the payment method or charge
    #[error("{message}")]
    PaymentDeclined { message: String },

    /// Another settlement attempt for this reservation is running
    #[error("payment already in progress for this reservation")]
    SettlementInProgress,

    /// Gateway unreachable or outcome unknown after retries
    #[error("payment service temporarily unavailable, please retry")]
    ServiceUnavailable,
}

fn insufficient_capacity_message(remaining: &Option<u32>) -> String {
    match remaining {
        Some(n) => format!("only {} tickets remaining", n),
        None => "insufficient tickets remaining".to_string(),
    }
}

impl DomainError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a declined-payment error
    pub fn declined(message: impl Into<String>) -> Self {
        Self::PaymentDeclined {
            message: message.into(),
        }
    }

    /// Check if this is a client error (buyer can fix it)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::EventNotPublished
                | Self::InsufficientCapacity { .. }
                | Self::PaymentWindowExpired
                | Self::PaymentDeclined { .. }
        )
    }

    /// Check if resubmitting the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ServiceUnavailable | Self::SettlementInProgress)
    }

    /// Stable machine-readable status code
    pub fn status_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::EventNotFound(_) | Self::ReservationNotFound(_) | Self::RecordNotFound { .. } => {
                "not_found"
            }
            Self::EventNotPublished => "event_not_published",
            Self::InsufficientCapacity { .. } => "insufficient_capacity",
            Self::PaymentWindowExpired => "payment_window_expired",
            Self::PaymentDeclined { .. } => "payment_declined",
            Self::SettlementInProgress => "settlement_in_progress",
            Self::ServiceUnavailable => "service_unavailable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_capacity_message() {
        let err = DomainError::InsufficientCapacity { remaining: Some(3) };
        assert_eq!(err.to_string(), "only 3 tickets remaining");
        assert!(err.is_client_error());
        assert!(!err.is_retryable());

        let err = DomainError::InsufficientCapacity { remaining: None };
        assert_eq!(err.to_string(), "insufficient tickets remaining");
    }

    #[test]
    fn test_service_unavailable_is_retryable() {
        let err = DomainError::ServiceUnavailable;
        assert!(err.is_retryable());
        assert!(!err.is_client_error());
        assert_eq!(err.status_code(), "service_unavailable");
    }

    #[test]
    fn test_declined_is_client_error() {
        let err = DomainError::declined("card declined");
        assert!(err.is_client_error());
        assert_eq!(err.to_string(), "card declined");
    }

    #[test]
    fn test_not_found_does_not_leak_ids() {
        let id = Uuid::new_v4();
        let err = DomainError::RecordNotFound { entity: "user", id };
        assert_eq!(err.to_string(), "user not found");
        assert!(!err.to_string().contains(&id.to_string()));
    }
}
