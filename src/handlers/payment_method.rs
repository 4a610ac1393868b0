//! Payment method resolution
//!
//! Turns a client-side card token into a chargeable (customer, source) pair,
//! reusing the buyer's gateway customer and stored cards where possible.

use crate::domain::BuyerRecord;
use crate::gateway::{CustomerProfile, GatewayCredentials, GatewayError, PaymentGateway};
use crate::retry::{retry_with_backoff, RetryPolicy};

/// Customer and card a charge will be made against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaymentMethod {
    pub customer_id: String,
    pub source_id: String,
    /// The gateway customer was created by this call
    pub new_customer: bool,
    /// The card was attached by this call
    pub new_card: bool,
}

/// Find or create the gateway customer and card for `buyer`.
///
/// A stored card whose `card_ref` matches is reused; otherwise the token is
/// attached. A customer id the gateway no longer knows is replaced by a new
/// customer. Listing is retried on transient failures; attach and create
/// are not, since they are not idempotent on the gateway side.
pub async fn resolve_payment_method(
    gateway: &dyn PaymentGateway,
    creds: &GatewayCredentials,
    buyer: &BuyerRecord,
    payment_token: &str,
    card_ref: &str,
    retry: &RetryPolicy,
) -> Result<ResolvedPaymentMethod, GatewayError> {
    if let Some(customer_id) = buyer.gateway_customer_id.as_deref() {
        let listed = retry_with_backoff(retry, GatewayError::is_retryable, |_| {
            gateway.list_payment_methods(creds, customer_id)
        })
        .await;

        match listed {
            Ok(cards) => {
                if let Some(card) = cards.iter().find(|c| c.card_ref() == card_ref) {
                    tracing::debug!(customer_id, card_ref, "Reusing stored card");
                    return Ok(ResolvedPaymentMethod {
                        customer_id: customer_id.to_string(),
                        source_id: card.id.clone(),
                        new_customer: false,
                        new_card: false,
                    });
                }

                let source_id = gateway
                    .attach_payment_method(creds, customer_id, payment_token)
                    .await?;
                tracing::debug!(customer_id, card_ref, "Attached new card");
                return Ok(ResolvedPaymentMethod {
                    customer_id: customer_id.to_string(),
                    source_id,
                    new_customer: false,
                    new_card: true,
                });
            }
            Err(e) if e.is_not_found() => {
                tracing::warn!(
                    customer_id,
                    buyer_id = %buyer.id,
                    "Stored gateway customer not found, creating a new one"
                );
            }
            Err(e) => return Err(e),
        }
    }

    let profile = CustomerProfile::for_buyer(buyer);
    let created = gateway
        .create_customer(creds, payment_token, &profile)
        .await?;
    tracing::debug!(
        customer_id = %created.customer_id,
        buyer_id = %buyer.id,
        "Created gateway customer"
    );

    Ok(ResolvedPaymentMethod {
        customer_id: created.customer_id,
        source_id: created.source_id,
        new_customer: true,
        new_card: true,
    })
}
