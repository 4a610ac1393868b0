//! Maintenance operations
//!
//! Named, registry-listed operations run by `ticketctl` against the
//! database. Each run happens inside one transaction that is committed only
//! in live mode; a dry run rolls everything back.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::db;
use crate::store::{cancel_tickets, expire_tickets, StoreError};

/// Maintenance errors
#[derive(Debug, thiserror::Error)]
pub enum MaintenanceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Schema incomplete, missing: {}", .0.join(", "))]
    SchemaIncomplete(Vec<String>),
}

/// A named maintenance operation
#[async_trait]
pub trait MaintenanceOperation: Send + Sync {
    fn name(&self) -> &'static str;

    /// One line shown in the operation listing
    fn description(&self) -> &'static str;

    /// Run inside the caller's transaction, returning a summary line
    async fn run(&self, conn: &mut PgConnection, args: &[String])
        -> Result<String, MaintenanceError>;
}

// =========================================================================
// Operations
// =========================================================================

pub struct CheckSchema;

#[async_trait]
impl MaintenanceOperation for CheckSchema {
    fn name(&self) -> &'static str {
        "check-schema"
    }

    fn description(&self) -> &'static str {
        "verify that required tables and functions exist"
    }

    async fn run(
        &self,
        conn: &mut PgConnection,
        _args: &[String],
    ) -> Result<String, MaintenanceError> {
        let missing = db::missing_schema_objects(conn).await?;
        if missing.is_empty() {
            Ok(format!("schema ok ({} tables)", db::REQUIRED_TABLES.len()))
        } else {
            Err(MaintenanceError::SchemaIncomplete(missing))
        }
    }
}

/// Default age after which unpaid reservations expire
const DEFAULT_HOLD_SECS: i64 = 900;

pub struct ExpireReservations;

#[async_trait]
impl MaintenanceOperation for ExpireReservations {
    fn name(&self) -> &'static str {
        "expire-reservations"
    }

    fn description(&self) -> &'static str {
        "expire unpaid reservations older than [HOLD_SECS] (default 900)"
    }

    async fn run(
        &self,
        conn: &mut PgConnection,
        args: &[String],
    ) -> Result<String, MaintenanceError> {
        let hold_secs = match args.first() {
            Some(raw) => raw
                .parse::<i64>()
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| {
                    MaintenanceError::InvalidArgs(format!("invalid hold seconds '{}'", raw))
                })?,
            None => DEFAULT_HOLD_SECS,
        };

        let cutoff = Utc::now() - chrono::Duration::seconds(hold_secs);
        let expired = expire_tickets(conn, cutoff).await?;
        Ok(format!("{} tickets expired (reserved before {})", expired, cutoff))
    }
}

pub struct CancelReservation;

#[async_trait]
impl MaintenanceOperation for CancelReservation {
    fn name(&self) -> &'static str {
        "cancel-reservation"
    }

    fn description(&self) -> &'static str {
        "cancel the unpaid tickets of RESERVATION_ACTION_ID"
    }

    async fn run(
        &self,
        conn: &mut PgConnection,
        args: &[String],
    ) -> Result<String, MaintenanceError> {
        let raw = args.first().ok_or_else(|| {
            MaintenanceError::InvalidArgs("reservation action id is required".to_string())
        })?;
        let reservation_action_id = Uuid::parse_str(raw)
            .map_err(|_| MaintenanceError::InvalidArgs(format!("invalid uuid '{}'", raw)))?;

        let cancelled = cancel_tickets(conn, reservation_action_id).await?;
        Ok(format!(
            "{} tickets cancelled for reservation {}",
            cancelled, reservation_action_id
        ))
    }
}

pub struct CreateDemoData;

#[async_trait]
impl MaintenanceOperation for CreateDemoData {
    fn name(&self) -> &'static str {
        "create-demo-data"
    }

    fn description(&self) -> &'static str {
        "create a demo company, host and published event [GATEWAY_SECRET_KEY]"
    }

    async fn run(
        &self,
        conn: &mut PgConnection,
        args: &[String],
    ) -> Result<String, MaintenanceError> {
        let secret_key = args.first().cloned().unwrap_or_default();

        let company_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO companies (name, currency, gateway_secret_key)
            VALUES ('Demo Supper Club', 'gbp', $1)
            RETURNING id
            "#,
        )
        .bind(&secret_key)
        .fetch_one(&mut *conn)
        .await?;

        let host_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO users (company, role, first_name, last_name, email)
            VALUES ($1, 'host', 'Demo', 'Host', 'host@example.com')
            RETURNING id
            "#,
        )
        .bind(company_id)
        .fetch_one(&mut *conn)
        .await?;

        let event_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO events (company, name, price_cents, ticket_limit, status)
            VALUES ($1, 'Demo Dinner', 1000, 40, 'published')
            RETURNING id
            "#,
        )
        .bind(company_id)
        .fetch_one(&mut *conn)
        .await?;

        Ok(format!(
            "company={} host={} event={}",
            company_id, host_id, event_id
        ))
    }
}

// =========================================================================
// Registry
// =========================================================================

/// Explicit list of the operations `ticketctl` can run
pub struct OperationRegistry {
    operations: Vec<Box<dyn MaintenanceOperation>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self {
            operations: Vec::new(),
        }
    }

    /// Registry with every built-in operation
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(CheckSchema));
        registry.register(Box::new(ExpireReservations));
        registry.register(Box::new(CancelReservation));
        registry.register(Box::new(CreateDemoData));
        registry
    }

    /// Add an operation; a later registration replaces one with the same name.
    pub fn register(&mut self, operation: Box<dyn MaintenanceOperation>) {
        self.operations.retain(|op| op.name() != operation.name());
        self.operations.push(operation);
    }

    pub fn get(&self, name: &str) -> Option<&dyn MaintenanceOperation> {
        self.operations
            .iter()
            .find(|op| op.name() == name)
            .map(|op| op.as_ref())
    }

    /// `(name, description)` pairs in registration order
    pub fn list(&self) -> Vec<(&'static str, &'static str)> {
        self.operations
            .iter()
            .map(|op| (op.name(), op.description()))
            .collect()
    }

    /// Run `name` in a transaction, committing only when `live`.
    pub async fn run(
        &self,
        pool: &PgPool,
        name: &str,
        args: &[String],
        live: bool,
    ) -> Result<String, MaintenanceError> {
        let operation = self
            .get(name)
            .ok_or_else(|| MaintenanceError::UnknownOperation(name.to_string()))?;

        let mut tx = pool.begin().await?;
        let summary = operation.run(&mut *tx, args).await?;

        if live {
            tx.commit().await?;
            tracing::info!(operation = name, summary = %summary, "Maintenance operation committed");
        } else {
            tx.rollback().await?;
            tracing::info!(
                operation = name,
                summary = %summary,
                "Maintenance operation rolled back (dry run)"
            );
        }

        Ok(summary)
    }
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
