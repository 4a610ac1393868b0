//! Scenario tests for handlers
//!
//! Run reservation and settlement end to end against the in-memory store
//! and the mock gateway.

#[cfg(test)]
mod tests {
    use crate::capability::{CapabilityCodec, ReservationCapability};
    use crate::domain::{
        BuyerRecord, ChargeSource, CompanyRecord, DomainError, EventRecord, EventStatus, OperationContext,
        SettlementOutcome, TicketStatus, UserRole,
    };
    use crate::error::AppError;
    use crate::gateway::{GatewayError, MockGateway, PaymentGateway};
    use crate::handlers::{
        BuyTicketsCommand, ReservationHandler, ReservationResult, ReservationSettings,
        ReserveTicketsCommand, SettlementHandler, SettlementSettings, TicketSpec,
    };
    use crate::idempotency::ChargeKey;
    use crate::retry::RetryPolicy;
    use crate::store::{MemoryTicketStore, SettlementStart, TicketStore};
    use chrono::{Duration, Utc};
    use std::sync::Arc;
    use uuid::Uuid;

    const SECRET: &str = "test-capability-secret-0123456789abcdef";

    struct Fixture {
        store: Arc<MemoryTicketStore>,
        gateway: Arc<MockGateway>,
        codec: CapabilityCodec,
        reservations: ReservationHandler,
        settlements: SettlementHandler,
        company_id: Uuid,
        event_id: Uuid,
        buyer_id: Uuid,
    }

    impl Fixture {
        fn new(price_cents: i64, limit: Option<u32>) -> Self {
            Self::with_settings(price_cents, limit, Self::settlement_settings())
        }

        fn settlement_settings() -> SettlementSettings {
            SettlementSettings {
                token_ttl: Duration::seconds(590),
                gateway_retry: RetryPolicy::immediate(3),
                store_retry: RetryPolicy::immediate(3),
                stale_after: Duration::minutes(5),
            }
        }

        fn with_settings(price_cents: i64, limit: Option<u32>, settings: SettlementSettings) -> Self {
            let store = Arc::new(MemoryTicketStore::new());
            let gateway = Arc::new(MockGateway::new());
            let codec = CapabilityCodec::new(SECRET).unwrap();

            let company_id = Uuid::new_v4();
            let event_id = Uuid::new_v4();
            let buyer_id = Uuid::new_v4();

            store.insert_company(CompanyRecord {
                id: company_id,
                name: "Harbour Supper Club".to_string(),
                currency: "gbp".to_string(),
                gateway_secret_key: "sk_test_harbour".to_string(),
            });
            store.insert_user(BuyerRecord {
                id: buyer_id,
                company_id,
                role: UserRole::Host,
                first_name: Some("Ada".to_string()),
                last_name: Some("Lovelace".to_string()),
                email: Some("ada@example.com".to_string()),
                gateway_customer_id: None,
            });
            store.insert_event(EventRecord {
                id: event_id,
                company_id,
                name: "Midsummer Feast".to_string(),
                price_cents,
                ticket_limit: limit,
                status: EventStatus::Published,
            });

            let reservations = ReservationHandler::new(
                store.clone(),
                codec.clone(),
                ReservationSettings {
                    token_ttl: Duration::seconds(3600),
                    commit_retry: RetryPolicy::immediate(3),
                },
            );
            let settlements =
                SettlementHandler::new(store.clone(), gateway.clone(), codec.clone(), settings);

            Self {
                store,
                gateway,
                codec,
                reservations,
                settlements,
                company_id,
                event_id,
                buyer_id,
            }
        }

        fn context(&self) -> OperationContext {
            OperationContext::new()
                .with_company(self.company_id)
                .with_request_user(self.buyer_id)
                .with_correlation_id(Uuid::new_v4())
        }

        async fn reserve(&self, count: usize) -> Result<ReservationResult, AppError> {
            let tickets = (0..count)
                .map(|i| TicketSpec::named(format!("Guest {}", i), format!("guest{}@example.com", i)))
                .collect();
            self.reservations
                .execute(ReserveTicketsCommand::new(self.event_id, tickets), &self.context())
                .await
        }

        fn buy_command(&self, booking_token: &str, token: &str, card_ref: &str) -> BuyTicketsCommand {
            BuyTicketsCommand::new(
                self.event_id,
                booking_token.to_string(),
                token.to_string(),
                card_ref.to_string(),
            )
        }

        fn statuses(&self) -> Vec<TicketStatus> {
            self.store
                .event_tickets(self.event_id)
                .iter()
                .map(|t| t.status)
                .collect()
        }
    }

    fn domain_error(err: AppError) -> DomainError {
        match err {
            AppError::Domain(e) => e,
            other => panic!("expected a domain error, got {:?}", other),
        }
    }

    // =========================================================================
    // Reservation
    // =========================================================================

    #[tokio::test]
    async fn test_reservation_prices_and_holds_tickets() {
        let fx = Fixture::new(1000, Some(10));

        let result = fx.reserve(2).await.unwrap();

        assert_eq!(result.ticket_count, 2);
        assert_eq!(result.item_price_cents, 1000);
        assert_eq!(result.total_price_cents, 2000);
        assert_eq!(fx.statuses(), vec![TicketStatus::Reserved; 2]);

        let capability = fx
            .codec
            .decode(&result.booking_token, Duration::seconds(590))
            .unwrap();
        assert_eq!(capability.price_cents, 2000);
        assert_eq!(capability.reservation_action_id, result.reservation_action_id);
    }

    #[tokio::test]
    async fn test_reservation_creates_guest_users() {
        let fx = Fixture::new(1000, None);
        let tickets = vec![
            TicketSpec::named("Grace Brewster Hopper", "Grace@Navy.MIL"),
            TicketSpec::default(),
        ];
        fx.reservations
            .execute(ReserveTicketsCommand::new(fx.event_id, tickets), &fx.context())
            .await
            .unwrap();

        let guest = fx.store.user_by_email(fx.company_id, "grace@navy.mil").unwrap();
        assert_eq!(guest.role, UserRole::Guest);
        assert_eq!(guest.first_name.as_deref(), Some("Grace"));
        assert_eq!(guest.last_name.as_deref(), Some("Brewster Hopper"));

        let tickets = fx.store.event_tickets(fx.event_id);
        assert_eq!(tickets[0].user_id, Some(guest.id));
        assert_eq!(tickets[1].user_id, None);
    }

    #[tokio::test]
    async fn test_reservation_rejects_over_capacity() {
        let fx = Fixture::new(1000, Some(3));
        fx.reserve(2).await.unwrap();

        let err = domain_error(fx.reserve(2).await.unwrap_err());
        assert_eq!(err, DomainError::InsufficientCapacity { remaining: Some(1) });
        assert_eq!(fx.statuses().len(), 2);
    }

    #[tokio::test]
    async fn test_reservation_validation() {
        let fx = Fixture::new(1000, None);

        let err = domain_error(
            fx.reservations
                .execute(ReserveTicketsCommand::new(fx.event_id, vec![]), &fx.context())
                .await
                .unwrap_err(),
        );
        assert!(matches!(err, DomainError::Validation(_)));

        let err = fx
            .reservations
            .execute(
                ReserveTicketsCommand::new(fx.event_id, vec![TicketSpec::default()]),
                &OperationContext::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::MissingHeader(_)));
    }

    #[tokio::test]
    async fn test_reservation_requires_published_event() {
        let fx = Fixture::new(1000, None);
        let draft_id = Uuid::new_v4();
        fx.store.insert_event(EventRecord {
            id: draft_id,
            company_id: fx.company_id,
            name: "Not Yet".to_string(),
            price_cents: 500,
            ticket_limit: None,
            status: EventStatus::Pending,
        });

        let err = fx
            .reservations
            .execute(
                ReserveTicketsCommand::new(draft_id, vec![TicketSpec::default()]),
                &fx.context(),
            )
            .await
            .unwrap_err();
        assert_eq!(domain_error(err), DomainError::EventNotPublished);

        let err = fx
            .reservations
            .execute(
                ReserveTicketsCommand::new(Uuid::new_v4(), vec![TicketSpec::default()]),
                &fx.context(),
            )
            .await
            .unwrap_err();
        assert!(matches!(domain_error(err), DomainError::EventNotFound(_)));
    }

    #[tokio::test]
    async fn test_event_of_another_company_is_not_found() {
        let fx = Fixture::new(1000, None);
        let context = OperationContext::new().with_company(Uuid::new_v4());

        let err = fx
            .reservations
            .booking_info(fx.event_id, &context)
            .await
            .unwrap_err();
        assert!(matches!(domain_error(err), DomainError::EventNotFound(_)));
    }

    #[tokio::test]
    async fn test_booking_info_reports_remaining() {
        let fx = Fixture::new(1500, Some(5));
        fx.reserve(2).await.unwrap();

        let info = fx
            .reservations
            .booking_info(fx.event_id, &fx.context())
            .await
            .unwrap();
        assert_eq!(info.event_name, "Midsummer Feast");
        assert_eq!(info.item_price_cents, 1500);
        assert_eq!(info.tickets_remaining, Some(3));
    }

    #[tokio::test]
    async fn test_last_ticket_goes_to_exactly_one_buyer() {
        let fx = Fixture::new(1000, Some(1));

        let (a, b) = tokio::join!(fx.reserve(1), fx.reserve(1));

        assert_eq!(a.is_ok() as u32 + b.is_ok() as u32, 1);
        let loser = a.err().or(b.err()).unwrap();
        assert!(matches!(
            domain_error(loser),
            DomainError::InsufficientCapacity { .. }
        ));
        assert_eq!(fx.statuses(), vec![TicketStatus::Reserved]);
    }

    #[tokio::test]
    async fn test_commit_conflicts_are_retried() {
        let fx = Fixture::new(1000, Some(5));
        fx.store.inject_conflicts(2);

        let result = fx.reserve(1).await.unwrap();
        assert_eq!(result.ticket_count, 1);
    }

    #[tokio::test]
    async fn test_persistent_conflicts_become_capacity_error() {
        let fx = Fixture::new(1000, Some(5));
        fx.store.inject_conflicts(10);

        let err = domain_error(fx.reserve(1).await.unwrap_err());
        assert!(matches!(err, DomainError::InsufficientCapacity { .. }));
        assert!(fx.statuses().is_empty());
    }

    // =========================================================================
    // Settlement
    // =========================================================================

    #[tokio::test]
    async fn test_settlement_charges_exact_total_once() {
        let fx = Fixture::new(1000, Some(10));
        let reservation = fx.reserve(2).await.unwrap();

        let receipt = fx
            .settlements
            .execute(
                fx.buy_command(&reservation.booking_token, "tok_visa", "4242-2030-12"),
                &fx.context(),
            )
            .await
            .unwrap();

        assert!(!receipt.already_settled);
        assert!(receipt.charge_id.is_some());
        assert_eq!(fx.statuses(), vec![TicketStatus::Paid; 2]);

        let requests = fx.gateway.charge_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].amount_cents, 2000);
        assert_eq!(requests[0].currency, "gbp");
        assert_eq!(
            requests[0].idempotency_key,
            ChargeKey::for_attempt(reservation.reservation_action_id, 1)
        );
        assert_eq!(requests[0].metadata["tickets_bought"], "2");
        assert!(requests[0].description.contains("Midsummer Feast"));
        assert_eq!(fx.gateway.successful_charges(), 1);

        // The new gateway customer is remembered on the buyer
        let buyer = fx.store.user(fx.buyer_id).unwrap();
        assert_eq!(buyer.gateway_customer_id, Some(requests[0].customer_id.clone()));
    }

    #[tokio::test]
    async fn test_second_settlement_is_already_settled() {
        let fx = Fixture::new(1000, Some(10));
        let reservation = fx.reserve(2).await.unwrap();
        let command = fx.buy_command(&reservation.booking_token, "tok_visa", "4242-2030-12");

        let first = fx
            .settlements
            .execute(command.clone(), &fx.context())
            .await
            .unwrap();
        let second = fx.settlements.execute(command, &fx.context()).await.unwrap();

        assert!(second.already_settled);
        assert_eq!(second.charge_id, first.charge_id);
        assert_eq!(fx.gateway.charge_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_expired_token_is_rejected() {
        let fx = Fixture::new(1000, Some(10));
        let reservation = fx.reserve(1).await.unwrap();

        let stale = ReservationCapability {
            reservation_action_id: reservation.reservation_action_id,
            event_id: fx.event_id,
            price_cents: 1000,
            ticket_count: 1,
            event_name: "Midsummer Feast".to_string(),
            issued_at: Utc::now() - Duration::minutes(20),
        };
        let token = fx.codec.encode(&stale, Duration::hours(1)).unwrap();

        let err = fx
            .settlements
            .execute(fx.buy_command(&token, "tok_visa", "4242-2030-12"), &fx.context())
            .await
            .unwrap_err();
        assert_eq!(domain_error(err), DomainError::PaymentWindowExpired);
        assert!(fx.gateway.charge_requests().is_empty());
        assert_eq!(fx.statuses(), vec![TicketStatus::Reserved]);
    }

    #[tokio::test]
    async fn test_tampered_token_is_rejected() {
        let fx = Fixture::new(1000, Some(10));
        let reservation = fx.reserve(1).await.unwrap();
        let mut token = reservation.booking_token.clone();
        token.replace_range(10..11, if &token[10..11] == "A" { "B" } else { "A" });

        let err = fx
            .settlements
            .execute(fx.buy_command(&token, "tok_visa", "4242-2030-12"), &fx.context())
            .await
            .unwrap_err();
        assert_eq!(domain_error(err), DomainError::PaymentWindowExpired);
    }

    #[tokio::test]
    async fn test_expired_reservation_cannot_be_paid() {
        let fx = Fixture::new(1000, Some(10));
        let reservation = fx.reserve(1).await.unwrap();
        fx.store
            .expire_reservations(Utc::now() + Duration::seconds(1))
            .await
            .unwrap();

        let err = fx
            .settlements
            .execute(
                fx.buy_command(&reservation.booking_token, "tok_visa", "4242-2030-12"),
                &fx.context(),
            )
            .await
            .unwrap_err();
        assert_eq!(domain_error(err), DomainError::PaymentWindowExpired);
        assert!(fx.gateway.charge_requests().is_empty());
    }

    #[tokio::test]
    async fn test_token_for_other_event_is_rejected() {
        let fx = Fixture::new(1000, Some(10));
        let reservation = fx.reserve(1).await.unwrap();
        let mut command = fx.buy_command(&reservation.booking_token, "tok_visa", "4242-2030-12");
        command.event_id = Uuid::new_v4();

        let err = fx.settlements.execute(command, &fx.context()).await.unwrap_err();
        assert!(matches!(domain_error(err), DomainError::Validation(_)));
    }

    #[tokio::test]
    async fn test_settlement_requires_user_header() {
        let fx = Fixture::new(1000, Some(10));
        let reservation = fx.reserve(1).await.unwrap();

        let err = fx
            .settlements
            .execute(
                fx.buy_command(&reservation.booking_token, "tok_visa", "4242-2030-12"),
                &OperationContext::new().with_company(fx.company_id),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::MissingHeader(_)));
    }

    #[tokio::test]
    async fn test_decline_then_retry_with_another_card() {
        let fx = Fixture::new(1000, Some(10));
        fx.gateway.register_token("tok_declined", "0002", 1, 2031);
        fx.gateway.decline_token("tok_declined");
        let reservation = fx.reserve(2).await.unwrap();

        let err = fx
            .settlements
            .execute(
                fx.buy_command(&reservation.booking_token, "tok_declined", "0002-2031-1"),
                &fx.context(),
            )
            .await
            .unwrap_err();
        assert!(matches!(domain_error(err), DomainError::PaymentDeclined { .. }));
        assert_eq!(fx.statuses(), vec![TicketStatus::PaymentFailed; 2]);

        let buyer = fx.store.user(fx.buyer_id).unwrap();
        let customer_id = buyer.gateway_customer_id.clone().unwrap();

        let receipt = fx
            .settlements
            .execute(
                fx.buy_command(&reservation.booking_token, "tok_visa", "4242-2030-12"),
                &fx.context(),
            )
            .await
            .unwrap();
        assert!(!receipt.already_settled);
        assert_eq!(fx.statuses(), vec![TicketStatus::Paid; 2]);

        let requests = fx.gateway.charge_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(
            requests[1].idempotency_key,
            ChargeKey::for_attempt(reservation.reservation_action_id, 2)
        );
        assert_eq!(requests[1].customer_id, customer_id);
        assert_eq!(fx.gateway.customer_cards(&customer_id).len(), 2);
        assert_eq!(fx.gateway.successful_charges(), 1);
    }

    #[tokio::test]
    async fn test_timeouts_are_retried_under_the_same_key() {
        let fx = Fixture::new(1000, Some(10));
        fx.gateway.fail_next_charges([
            GatewayError::Timeout {
                path: "charges".to_string(),
            },
            GatewayError::Status {
                status: 503,
                path: "charges".to_string(),
            },
        ]);
        let reservation = fx.reserve(1).await.unwrap();

        let receipt = fx
            .settlements
            .execute(
                fx.buy_command(&reservation.booking_token, "tok_visa", "4242-2030-12"),
                &fx.context(),
            )
            .await
            .unwrap();
        assert!(receipt.charge_id.is_some());

        let requests = fx.gateway.charge_requests();
        assert_eq!(requests.len(), 3);
        assert!(requests
            .iter()
            .all(|r| r.idempotency_key == requests[0].idempotency_key));
        assert_eq!(fx.gateway.successful_charges(), 1);
    }

    #[tokio::test]
    async fn test_unresolved_charge_is_resumed_by_next_call() {
        let fx = Fixture::new(1000, Some(10));
        let timeouts = (0..3).map(|_| GatewayError::Timeout {
            path: "charges".to_string(),
        });
        fx.gateway.fail_next_charges(timeouts);
        let reservation = fx.reserve(1).await.unwrap();
        let command = fx.buy_command(&reservation.booking_token, "tok_visa", "4242-2030-12");

        let err = fx
            .settlements
            .execute(command.clone(), &fx.context())
            .await
            .unwrap_err();
        assert_eq!(domain_error(err), DomainError::ServiceUnavailable);
        assert_eq!(fx.statuses(), vec![TicketStatus::PaymentPending]);

        let paid_action = fx.store.event_tickets(fx.event_id)[0].paid_action_id.unwrap();
        let attempt = fx
            .store
            .find_settlement_attempt(paid_action)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attempt.outcome, SettlementOutcome::Unresolved);

        let receipt = fx.settlements.execute(command, &fx.context()).await.unwrap();
        assert!(!receipt.already_settled);
        assert_eq!(fx.statuses(), vec![TicketStatus::Paid]);

        let keys: Vec<_> = fx
            .gateway
            .charge_requests()
            .into_iter()
            .map(|r| r.idempotency_key)
            .collect();
        assert_eq!(keys.len(), 4);
        assert!(keys
            .iter()
            .all(|k| *k == ChargeKey::for_attempt(reservation.reservation_action_id, 1)));
    }

    #[tokio::test]
    async fn test_resumed_charge_ignores_newly_submitted_card() {
        let fx = Fixture::new(1000, Some(10));
        fx.gateway.register_token("tok_second", "4444", 1, 2031);
        // The charge goes through but no response reaches us
        fx.gateway.lose_next_responses(3);
        let reservation = fx.reserve(2).await.unwrap();

        let err = fx
            .settlements
            .execute(
                fx.buy_command(&reservation.booking_token, "tok_visa", "4242-2030-12"),
                &fx.context(),
            )
            .await
            .unwrap_err();
        assert_eq!(domain_error(err), DomainError::ServiceUnavailable);
        assert_eq!(fx.statuses(), vec![TicketStatus::PaymentPending; 2]);
        assert_eq!(fx.gateway.successful_charges(), 1);

        // The buyer tries again with a different card, twice
        for _ in 0..2 {
            let receipt = fx
                .settlements
                .execute(
                    fx.buy_command(&reservation.booking_token, "tok_second", "4444-2031-1"),
                    &fx.context(),
                )
                .await
                .unwrap();
            assert!(receipt.charge_id.is_some());
        }

        assert_eq!(fx.statuses(), vec![TicketStatus::Paid; 2]);
        assert_eq!(fx.gateway.successful_charges(), 1);

        let requests = fx.gateway.charge_requests();
        assert_eq!(requests.len(), 4);
        assert!(requests.iter().all(|r| r.idempotency_key == requests[0].idempotency_key
            && r.source_id == requests[0].source_id));

        // The second card was never attached
        let customer_id = fx.store.user(fx.buyer_id).unwrap().gateway_customer_id.unwrap();
        assert_eq!(fx.gateway.customer_cards(&customer_id).len(), 1);
    }

    #[tokio::test]
    async fn test_refused_resume_leaves_attempt_open() {
        let fx = Fixture::new(1000, Some(10));
        let timeouts = (0..3).map(|_| GatewayError::Timeout {
            path: "charges".to_string(),
        });
        fx.gateway.fail_next_charges(timeouts);
        let reservation = fx.reserve(1).await.unwrap();
        let command = fx.buy_command(&reservation.booking_token, "tok_visa", "4242-2030-12");

        let err = fx
            .settlements
            .execute(command.clone(), &fx.context())
            .await
            .unwrap_err();
        assert_eq!(domain_error(err), DomainError::ServiceUnavailable);

        fx.gateway.fail_next_charges([GatewayError::Status {
            status: 400,
            path: "charges".to_string(),
        }]);
        let err = fx
            .settlements
            .execute(command.clone(), &fx.context())
            .await
            .unwrap_err();
        assert_eq!(domain_error(err), DomainError::ServiceUnavailable);
        assert_eq!(fx.statuses(), vec![TicketStatus::PaymentPending]);

        let paid_action = fx.store.event_tickets(fx.event_id)[0].paid_action_id.unwrap();
        let attempt = fx
            .store
            .find_settlement_attempt(paid_action)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attempt.attempt, 1);
        assert_eq!(attempt.outcome, SettlementOutcome::Unresolved);

        fx.settlements.execute(command, &fx.context()).await.unwrap();
        assert_eq!(fx.statuses(), vec![TicketStatus::Paid]);
        assert_eq!(fx.gateway.successful_charges(), 1);
    }

    #[tokio::test]
    async fn test_fresh_pending_settlement_is_in_progress() {
        let fx = Fixture::new(1000, Some(10));
        let reservation = fx.reserve(1).await.unwrap();

        // Another caller holds the checkpoint and has not finished
        fx.store
            .begin_settlement(&SettlementStart {
                company_id: fx.company_id,
                buyer_id: fx.buyer_id,
                reservation_action_id: reservation.reservation_action_id,
                source: Some(ChargeSource {
                    customer_id: "cus_other".to_string(),
                    source_id: "card_other".to_string(),
                }),
                new_customer: false,
                new_card: false,
                stale_after: Duration::minutes(5),
            })
            .await
            .unwrap();

        let err = fx
            .settlements
            .execute(
                fx.buy_command(&reservation.booking_token, "tok_visa", "4242-2030-12"),
                &fx.context(),
            )
            .await
            .unwrap_err();
        assert_eq!(domain_error(err), DomainError::SettlementInProgress);
        assert!(fx.gateway.charge_requests().is_empty());
    }

    #[tokio::test]
    async fn test_stale_pending_settlement_is_taken_over() {
        let settings = SettlementSettings {
            stale_after: Duration::zero(),
            ..Fixture::settlement_settings()
        };
        let fx = Fixture::with_settings(1000, Some(10), settings);
        let reservation = fx.reserve(3).await.unwrap();

        // A caller that crashed after writing its checkpoint
        fx.store
            .begin_settlement(&SettlementStart {
                company_id: fx.company_id,
                buyer_id: fx.buyer_id,
                reservation_action_id: reservation.reservation_action_id,
                source: Some(ChargeSource {
                    customer_id: "cus_other".to_string(),
                    source_id: "card_other".to_string(),
                }),
                new_customer: false,
                new_card: false,
                stale_after: Duration::minutes(5),
            })
            .await
            .unwrap();

        let receipt = fx
            .settlements
            .execute(
                fx.buy_command(&reservation.booking_token, "tok_visa", "4242-2030-12"),
                &fx.context(),
            )
            .await
            .unwrap();

        assert!(receipt.charge_id.is_some());
        assert_eq!(fx.statuses(), vec![TicketStatus::Paid; 3]);
        let requests = fx.gateway.charge_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].amount_cents, 3000);
        assert_eq!(
            requests[0].idempotency_key,
            ChargeKey::for_attempt(reservation.reservation_action_id, 1)
        );
    }

    #[tokio::test]
    async fn test_stored_card_is_reused_for_later_purchase() {
        let fx = Fixture::new(1000, Some(10));
        let first = fx.reserve(1).await.unwrap();
        let second = fx.reserve(1).await.unwrap();

        fx.settlements
            .execute(
                fx.buy_command(&first.booking_token, "tok_visa", "4242-2030-12"),
                &fx.context(),
            )
            .await
            .unwrap();
        fx.settlements
            .execute(
                fx.buy_command(&second.booking_token, "tok_visa_2", "4242-2030-12"),
                &fx.context(),
            )
            .await
            .unwrap();

        let requests = fx.gateway.charge_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].source_id, requests[1].source_id);
        assert_eq!(fx.gateway.customer_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_buyer_is_not_found() {
        let fx = Fixture::new(1000, Some(10));
        let reservation = fx.reserve(1).await.unwrap();
        let context = OperationContext::new()
            .with_company(fx.company_id)
            .with_request_user(Uuid::new_v4());

        let err = fx
            .settlements
            .execute(
                fx.buy_command(&reservation.booking_token, "tok_visa", "4242-2030-12"),
                &context,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            domain_error(err),
            DomainError::RecordNotFound { entity: "user", .. }
        ));
        assert!(fx.gateway.charge_requests().is_empty());
    }

    #[tokio::test]
    async fn test_mock_gateway_is_usable_as_trait_object() {
        let gateway: Arc<dyn PaymentGateway> = Arc::new(MockGateway::new());
        let store: Arc<dyn TicketStore> = Arc::new(MemoryTicketStore::new());
        let codec = CapabilityCodec::new(SECRET).unwrap();
        let _ = SettlementHandler::new(store, gateway, codec, SettlementSettings::default());
    }
}
