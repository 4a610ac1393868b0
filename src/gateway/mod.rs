//! Payment gateway
//!
//! The external card processor as seen by settlement: stored payment
//! methods per customer, customer creation and idempotent charges. Every
//! call carries the tenant's own credentials.

mod mock;
mod stripe;

pub use mock::MockGateway;
pub use stripe::{StripeGateway, DEFAULT_BASE_URL};

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;

use crate::domain::BuyerRecord;
use crate::idempotency::ChargeKey;

/// Per-tenant gateway credentials
#[derive(Clone, PartialEq, Eq)]
pub struct GatewayCredentials {
    secret_key: String,
}

impl GatewayCredentials {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
        }
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }
}

impl fmt::Debug for GatewayCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GatewayCredentials([REDACTED])")
    }
}

/// A card stored on a gateway customer
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct StoredCard {
    pub id: String,
    pub last4: String,
    pub exp_month: u32,
    pub exp_year: u32,
}

impl StoredCard {
    /// Fingerprint the client sends alongside a new card token
    pub fn card_ref(&self) -> String {
        format!("{}-{}-{}", self.last4, self.exp_year, self.exp_month)
    }
}

/// Details attached to a newly created gateway customer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerProfile {
    pub email: Option<String>,
    pub description: String,
    pub metadata: BTreeMap<String, String>,
}

impl CustomerProfile {
    pub fn for_buyer(buyer: &BuyerRecord) -> Self {
        let name = buyer.full_name();
        let email = match (&name, &buyer.email) {
            (Some(name), Some(email)) => Some(format!("{} <{}>", name, email)),
            (None, Some(email)) => Some(email.clone()),
            (_, None) => None,
        };
        let label = name
            .or_else(|| buyer.email.clone())
            .unwrap_or_else(|| buyer.id.to_string());

        let mut metadata = BTreeMap::new();
        metadata.insert("role".to_string(), buyer.role.to_string());
        metadata.insert("user_id".to_string(), buyer.id.to_string());

        Self {
            email,
            description: format!("{} ({})", label, buyer.role),
            metadata,
        }
    }
}

/// Result of creating a customer with its first card
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCustomer {
    pub customer_id: String,
    pub source_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    pub idempotency_key: ChargeKey,
    pub amount_cents: i64,
    pub currency: String,
    pub customer_id: String,
    pub source_id: String,
    pub description: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct Charge {
    pub id: String,
}

/// Gateway errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Non-success HTTP status
    #[error("response {status} from \"{path}\"")]
    Status { status: u16, path: String },

    #[error("timeout calling \"{path}\"")]
    Timeout { path: String },

    #[error("transport error calling \"{path}\": {message}")]
    Transport { path: String, message: String },

    /// Success status with a body we could not read
    #[error("unreadable response from \"{path}\": {message}")]
    Decode { path: String, message: String },
}

impl GatewayError {
    /// Whether repeating the call may give a different answer.
    ///
    /// Rate limiting, idempotency-key contention and server errors are
    /// transient. Every other status is a definitive answer about the card
    /// or the request. Timeouts, transport failures and unreadable bodies
    /// leave the outcome unknown, so they are retried under the same key.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Status { status, .. } => {
                *status == 409 || *status == 429 || *status >= 500
            }
            GatewayError::Timeout { .. }
            | GatewayError::Transport { .. }
            | GatewayError::Decode { .. } => true,
        }
    }

    /// A 402: the card was refused
    pub fn is_card_declined(&self) -> bool {
        matches!(self, GatewayError::Status { status: 402, .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::Status { status: 404, .. })
    }

    /// Short label recorded on the settlement action
    pub fn class(&self) -> &'static str {
        match self {
            GatewayError::Status { status: 402, .. } => "card_declined",
            GatewayError::Status { status: 429, .. } => "rate_limited",
            GatewayError::Status { status, .. } if *status >= 500 => "gateway_error",
            GatewayError::Status { .. } => "request_rejected",
            GatewayError::Timeout { .. } => "timeout",
            GatewayError::Transport { .. } => "transport",
            GatewayError::Decode { .. } => "decode",
        }
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn list_payment_methods(
        &self,
        creds: &GatewayCredentials,
        customer_id: &str,
    ) -> Result<Vec<StoredCard>, GatewayError>;

    /// Attach a tokenized card to an existing customer, returning its source id
    async fn attach_payment_method(
        &self,
        creds: &GatewayCredentials,
        customer_id: &str,
        token: &str,
    ) -> Result<String, GatewayError>;

    async fn create_customer(
        &self,
        creds: &GatewayCredentials,
        token: &str,
        profile: &CustomerProfile,
    ) -> Result<NewCustomer, GatewayError>;

    /// Charge a stored source. Repeating a request with the same
    /// idempotency key returns the first result.
    async fn create_charge(
        &self,
        creds: &GatewayCredentials,
        request: &ChargeRequest,
    ) -> Result<Charge, GatewayError>;
}
