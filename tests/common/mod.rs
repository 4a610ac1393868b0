//! Common test utilities
#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use chrono::Duration;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use ticket_settlement::api::{self, AppState};
use ticket_settlement::capability::CapabilityCodec;
use ticket_settlement::domain::{BuyerRecord, CompanyRecord, EventRecord, EventStatus, UserRole};
use ticket_settlement::gateway::MockGateway;
use ticket_settlement::handlers::{
    ReservationHandler, ReservationSettings, SettlementHandler, SettlementSettings,
};
use ticket_settlement::retry::RetryPolicy;
use ticket_settlement::store::MemoryTicketStore;

pub const TOKEN_SECRET: &str = "integration-token-secret-0123456789";

/// Full router over the in-memory store and mock gateway, with one company,
/// one host user and one published event.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryTicketStore>,
    pub gateway: Arc<MockGateway>,
    pub company_id: Uuid,
    pub user_id: Uuid,
    pub event_id: Uuid,
}

pub fn memory_app(price_cents: i64, ticket_limit: Option<u32>) -> TestApp {
    let store = Arc::new(MemoryTicketStore::new());
    let gateway = Arc::new(MockGateway::new());
    let codec = CapabilityCodec::new(TOKEN_SECRET).unwrap();

    let company_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    let event_id = Uuid::new_v4();

    store.insert_company(CompanyRecord {
        id: company_id,
        name: "Quayside Kitchen".to_string(),
        currency: "gbp".to_string(),
        gateway_secret_key: "sk_test_quayside".to_string(),
    });
    store.insert_user(BuyerRecord {
        id: user_id,
        company_id,
        role: UserRole::Host,
        first_name: Some("Grace".to_string()),
        last_name: Some("Hopper".to_string()),
        email: Some("grace@example.com".to_string()),
        gateway_customer_id: None,
    });
    store.insert_event(EventRecord {
        id: event_id,
        company_id,
        name: "Harvest Supper".to_string(),
        price_cents,
        ticket_limit,
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
    let settlements = SettlementHandler::new(
        store.clone(),
        gateway.clone(),
        codec,
        SettlementSettings {
            token_ttl: Duration::seconds(590),
            gateway_retry: RetryPolicy::immediate(3),
            store_retry: RetryPolicy::immediate(3),
            stale_after: Duration::minutes(5),
        },
    );

    TestApp {
        router: api::build_router(AppState::new(reservations, settlements)),
        store,
        gateway,
        company_id,
        user_id,
        event_id,
    }
}

/// Connect to DATABASE_URL and clear every table
pub async fn setup_test_db() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    sqlx::query("TRUNCATE TABLE tickets, actions, events, users, companies CASCADE")
        .execute(&pool)
        .await
        .expect("Failed to clean up DB");

    pool
}

/// Insert a company and a published event, returning `(company_id, event_id)`
pub async fn seed_event(pool: &PgPool, price_cents: i64, ticket_limit: Option<i32>) -> (Uuid, Uuid) {
    let company_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO companies (name, currency, gateway_secret_key)
        VALUES ('Test Company', 'gbp', 'sk_test')
        RETURNING id
        "#,
    )
    .fetch_one(pool)
    .await
    .expect("Failed to seed company");

    let event_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO events (company, name, price_cents, ticket_limit, status)
        VALUES ($1, 'Test Event', $2, $3, 'published')
        RETURNING id
        "#,
    )
    .bind(company_id)
    .bind(price_cents)
    .bind(ticket_limit)
    .fetch_one(pool)
    .await
    .expect("Failed to seed event");

    (company_id, event_id)
}
