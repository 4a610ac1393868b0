//! Settlement Handler
//!
//! Pays for a reservation exactly once. The flow is split so that no
//! database transaction is open while the gateway is being called:
//!
//! 1. Open the capability and pre-check the reservation's tickets
//! 2. Resolve the buyer's gateway customer and card
//! 3. Checkpoint: tickets to `payment_pending` under a settlement action
//! 4. Charge with an idempotency key derived from the attempt
//! 5. Record the outcome: tickets to `paid` or `payment_failed`
//!
//! A crash between 3 and 5 leaves tickets `payment_pending`; a later call
//! takes the attempt over once it is stale and repeats the charge under the
//! same key with the card the attempt was opened with, so the gateway
//! replays instead of charging twice. The card sent with the later call is
//! not used.

use chrono::{Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::capability::{CapabilityCodec, ReservationCapability};
use crate::domain::{
    plan_settlement, ChargeSource, DomainError, OperationContext, SettlementBlocked,
    SettlementOutcome, SettlementPlan,
};
use crate::error::AppError;
use crate::gateway::{ChargeRequest, GatewayCredentials, GatewayError, PaymentGateway};
use crate::idempotency::ChargeKey;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::store::{
    SettlementCheckpoint, SettlementCompletion, SettlementStart, StoreError, TicketStore,
};

use super::payment_method::{resolve_payment_method, ResolvedPaymentMethod};
use super::{BuyTicketsCommand, SettlementReceipt};

/// Settlement tuning
#[derive(Debug, Clone)]
pub struct SettlementSettings {
    /// Maximum token age accepted at settlement
    pub token_ttl: Duration,
    /// Retries of gateway calls on transient failures
    pub gateway_retry: RetryPolicy,
    /// Retries of store writes on serialization conflicts
    pub store_retry: RetryPolicy,
    /// Age after which a pending attempt may be taken over
    pub stale_after: Duration,
}

impl Default for SettlementSettings {
    fn default() -> Self {
        Self {
            token_ttl: Duration::seconds(590),
            gateway_retry: RetryPolicy::default(),
            store_retry: RetryPolicy::default(),
            stale_after: Duration::seconds(300),
        }
    }
}

fn blocked_to_error(blocked: SettlementBlocked, reservation_action_id: Uuid) -> AppError {
    match blocked {
        SettlementBlocked::NoTickets => DomainError::ReservationNotFound(reservation_action_id).into(),
        SettlementBlocked::InProgress => DomainError::SettlementInProgress.into(),
        SettlementBlocked::Closed(_) => DomainError::PaymentWindowExpired.into(),
        SettlementBlocked::Inconsistent => AppError::Internal(format!(
            "tickets of reservation {} disagree on status",
            reservation_action_id
        )),
    }
}

/// Map a payment-method failure: transient ones ask the buyer to retry,
/// definitive ones are shown as a decline.
fn payment_method_error(error: &GatewayError) -> DomainError {
    if error.is_retryable() {
        DomainError::ServiceUnavailable
    } else if error.is_card_declined() {
        DomainError::declined("card declined")
    } else {
        DomainError::declined("payment method rejected by the payment gateway")
    }
}

/// Outcome of checking a reservation before any gateway call
enum Precheck {
    Settled(SettlementReceipt),
    /// Open a new attempt with the card sent by this call
    Start,
    /// Take over a stale or unresolved attempt, charging its own card
    Resume,
}

fn warn_unused_customer(
    method: Option<&ResolvedPaymentMethod>,
    buyer_id: Uuid,
    reservation_action_id: Uuid,
) {
    if let Some(method) = method.filter(|m| m.new_customer) {
        tracing::warn!(
            buyer_id = %buyer_id,
            customer_id = %method.customer_id,
            reservation_action_id = %reservation_action_id,
            "Reservation claimed concurrently; created customer left unused"
        );
    }
}

fn charge_description(capability: &ReservationCapability) -> String {
    let noun = if capability.ticket_count == 1 { "ticket" } else { "tickets" };
    format!(
        "{} {} for {} ({})",
        capability.ticket_count, noun, capability.event_name, capability.event_id
    )
}

/// Handler for ticket settlement
pub struct SettlementHandler {
    store: Arc<dyn TicketStore>,
    gateway: Arc<dyn PaymentGateway>,
    codec: CapabilityCodec,
    settings: SettlementSettings,
}

impl SettlementHandler {
    pub fn new(
        store: Arc<dyn TicketStore>,
        gateway: Arc<dyn PaymentGateway>,
        codec: CapabilityCodec,
        settings: SettlementSettings,
    ) -> Self {
        Self {
            store,
            gateway,
            codec,
            settings,
        }
    }

    /// Execute the settlement command
    pub async fn execute(
        &self,
        command: BuyTicketsCommand,
        context: &OperationContext,
    ) -> Result<SettlementReceipt, AppError> {
        let company_id = context.company()?;
        let buyer_id = context.buyer()?;

        if command.payment_token.trim().is_empty() {
            return Err(DomainError::validation("payment token is required").into());
        }

        let capability = self
            .codec
            .decode(&command.booking_token, self.settings.token_ttl)
            .map_err(|e| {
                tracing::info!(
                    error = %e,
                    correlation_id = ?context.correlation_id,
                    "Rejected booking token"
                );
                DomainError::PaymentWindowExpired
            })?;

        if capability.event_id != command.event_id {
            return Err(DomainError::validation("booking token is for a different event").into());
        }
        let reservation_action_id = capability.reservation_action_id;

        // Pre-check without a transaction so that settled or blocked
        // reservations never reach the gateway
        let resume = match self.precheck(reservation_action_id).await? {
            Precheck::Settled(receipt) => return Ok(receipt),
            Precheck::Start => false,
            Precheck::Resume => true,
        };

        let company = self
            .store
            .find_company(company_id)
            .await?
            .ok_or(DomainError::RecordNotFound {
                entity: "company",
                id: company_id,
            })?;
        let buyer = self
            .store
            .find_buyer(company_id, buyer_id)
            .await?
            .ok_or(DomainError::RecordNotFound {
                entity: "user",
                id: buyer_id,
            })?;
        let creds = GatewayCredentials::new(company.gateway_secret_key.clone());

        // A resumed attempt charges the card it was opened with
        let method = if resume {
            None
        } else {
            let resolved = resolve_payment_method(
                self.gateway.as_ref(),
                &creds,
                &buyer,
                command.payment_token.trim(),
                command.card_ref.trim(),
                &self.settings.gateway_retry,
            )
            .await
            .map_err(|e| {
                tracing::warn!(
                    error = %e,
                    buyer_id = %buyer.id,
                    correlation_id = ?context.correlation_id,
                    "Payment method resolution failed"
                );
                payment_method_error(&e)
            })?;
            Some(resolved)
        };

        let start = SettlementStart {
            company_id,
            buyer_id: buyer.id,
            reservation_action_id,
            source: method.as_ref().map(|m| ChargeSource {
                customer_id: m.customer_id.clone(),
                source_id: m.source_id.clone(),
            }),
            new_customer: method.as_ref().map_or(false, |m| m.new_customer),
            new_card: method.as_ref().map_or(false, |m| m.new_card),
            stale_after: self.settings.stale_after,
        };
        let checkpoint = retry_with_backoff(
            &self.settings.store_retry,
            StoreError::is_retryable,
            |_| self.store.begin_settlement(&start),
        )
        .await;

        let (settlement_action_id, attempt, source, resumed) = match checkpoint {
            Ok(SettlementCheckpoint::Claimed {
                settlement_action_id,
                attempt,
                source,
                resumed,
            }) => (settlement_action_id, attempt, source, resumed),
            Ok(SettlementCheckpoint::AlreadySettled { charge_id }) => {
                warn_unused_customer(method.as_ref(), buyer.id, reservation_action_id);
                return Ok(SettlementReceipt {
                    reservation_action_id,
                    charge_id,
                    already_settled: true,
                });
            }
            Err(StoreError::Blocked(blocked)) => {
                return Err(blocked_to_error(blocked, reservation_action_id))
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            reservation_action_id = %reservation_action_id,
            settlement_action_id = %settlement_action_id,
            attempt,
            resumed,
            client_ip = ?command.client_ip,
            correlation_id = ?context.correlation_id,
            "Settlement checkpoint written"
        );
        if resumed {
            warn_unused_customer(method.as_ref(), buyer.id, reservation_action_id);
        }

        let request = ChargeRequest {
            idempotency_key: ChargeKey::for_attempt(reservation_action_id, attempt),
            amount_cents: capability.price_cents,
            currency: company.currency.clone(),
            customer_id: source.customer_id.clone(),
            source_id: source.source_id.clone(),
            description: charge_description(&capability),
            metadata: Self::charge_metadata(&capability, settlement_action_id),
        };

        let charged = retry_with_backoff(
            &self.settings.gateway_retry,
            GatewayError::is_retryable,
            |_| self.gateway.create_charge(&creds, &request),
        )
        .await;

        // A resumed attempt may already have been charged, so only a decline
        // ends it; any other refusal leaves the outcome open
        let unresolved = |e: &GatewayError| e.is_retryable() || (resumed && !e.is_card_declined());

        let (outcome, charge_id, failure) = match &charged {
            Ok(charge) => (SettlementOutcome::Succeeded, Some(charge.id.clone()), None),
            Err(e) if unresolved(e) => {
                (SettlementOutcome::Unresolved, None, Some(e.class().to_string()))
            }
            Err(e) => (SettlementOutcome::Failed, None, Some(e.class().to_string())),
        };

        let completion = SettlementCompletion {
            settlement_action_id,
            reservation_action_id,
            buyer_id: buyer.id,
            customer_id: method
                .as_ref()
                .filter(|m| m.new_customer && !resumed)
                .map(|m| m.customer_id.clone()),
            outcome,
            charge_id: charge_id.clone(),
            failure,
        };

        let recorded = retry_with_backoff(
            &self.settings.store_retry,
            StoreError::is_retryable,
            |_| self.store.complete_settlement(&completion),
        )
        .await;

        if let Err(e) = recorded {
            // The charge may have gone through; the pending checkpoint lets a
            // later call replay it under the same key once it goes stale
            tracing::error!(
                error = %e,
                reservation_action_id = %reservation_action_id,
                settlement_action_id = %settlement_action_id,
                outcome = ?outcome,
                charge_id = ?charge_id,
                correlation_id = ?context.correlation_id,
                "Failed to record settlement outcome"
            );
            return Err(DomainError::ServiceUnavailable.into());
        }

        match charged {
            Ok(charge) => {
                tracing::info!(
                    reservation_action_id = %reservation_action_id,
                    settlement_action_id = %settlement_action_id,
                    charge_id = %charge.id,
                    amount_cents = capability.price_cents,
                    correlation_id = ?context.correlation_id,
                    "Tickets paid"
                );
                Ok(SettlementReceipt {
                    reservation_action_id,
                    charge_id: Some(charge.id),
                    already_settled: false,
                })
            }
            Err(e) if unresolved(&e) => {
                tracing::warn!(
                    error = %e,
                    reservation_action_id = %reservation_action_id,
                    settlement_action_id = %settlement_action_id,
                    correlation_id = ?context.correlation_id,
                    "Charge outcome unresolved"
                );
                Err(DomainError::ServiceUnavailable.into())
            }
            Err(e) => {
                tracing::info!(
                    error = %e,
                    reservation_action_id = %reservation_action_id,
                    settlement_action_id = %settlement_action_id,
                    correlation_id = ?context.correlation_id,
                    "Charge declined"
                );
                Err(payment_method_error(&e).into())
            }
        }
    }

    /// Errors when the reservation cannot be settled.
    async fn precheck(&self, reservation_action_id: Uuid) -> Result<Precheck, AppError> {
        let tickets = self.store.reservation_tickets(reservation_action_id).await?;
        let statuses: Vec<_> = tickets.iter().map(|t| t.status).collect();

        let current_id = tickets.first().and_then(|t| t.paid_action_id);
        let current = match current_id {
            Some(id) => self.store.find_settlement_attempt(id).await?.map(|a| (id, a)),
            None => None,
        };

        let plan = plan_settlement(
            &statuses,
            current.as_ref().map(|(id, a)| (*id, a)),
            Utc::now(),
            self.settings.stale_after,
        )
        .map_err(|blocked| blocked_to_error(blocked, reservation_action_id))?;

        match plan {
            SettlementPlan::AlreadySettled => Ok(Precheck::Settled(SettlementReceipt {
                reservation_action_id,
                charge_id: current.and_then(|(_, a)| a.charge_id),
                already_settled: true,
            })),
            SettlementPlan::Start { .. } => Ok(Precheck::Start),
            SettlementPlan::Resume { .. } => Ok(Precheck::Resume),
        }
    }

    fn charge_metadata(
        capability: &ReservationCapability,
        settlement_action_id: Uuid,
    ) -> BTreeMap<String, String> {
        let mut metadata = BTreeMap::new();
        metadata.insert("event".to_string(), capability.event_id.to_string());
        metadata.insert(
            "tickets_bought".to_string(),
            capability.ticket_count.to_string(),
        );
        metadata.insert("paid_action".to_string(), settlement_action_id.to_string());
        metadata.insert(
            "reserve_action".to_string(),
            capability.reservation_action_id.to_string(),
        );
        metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(status: u16) -> GatewayError {
        GatewayError::Status {
            status,
            path: "charges".to_string(),
        }
    }

    #[test]
    fn test_payment_method_error_mapping() {
        assert_eq!(
            payment_method_error(&status(402)),
            DomainError::declined("card declined")
        );
        assert!(matches!(
            payment_method_error(&status(400)),
            DomainError::PaymentDeclined { .. }
        ));
        assert_eq!(
            payment_method_error(&status(503)),
            DomainError::ServiceUnavailable
        );
    }

    #[test]
    fn test_charge_description() {
        let capability = ReservationCapability {
            reservation_action_id: Uuid::nil(),
            event_id: Uuid::nil(),
            price_cents: 2000,
            ticket_count: 2,
            event_name: "Spring Ball".to_string(),
            issued_at: Utc::now(),
        };
        assert_eq!(
            charge_description(&capability),
            format!("2 tickets for Spring Ball ({})", Uuid::nil())
        );
    }
}
