//! Database module
//!
//! Pool setup and schema verification. Migrations are raw SQL files in
//! migrations/ applied outside the service.

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};

/// Tables the service reads and writes
pub const REQUIRED_TABLES: &[&str] = &["companies", "users", "events", "actions", "tickets"];

/// Open a connection pool
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Simple connectivity check
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Tables from [`REQUIRED_TABLES`] that do not exist, plus the capacity
/// function when it is missing.
pub async fn missing_schema_objects(conn: &mut PgConnection) -> Result<Vec<String>, sqlx::Error> {
    let mut missing = Vec::new();

    for table in REQUIRED_TABLES {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(&mut *conn)
        .await?;

        if !exists {
            missing.push(table.to_string());
        }
    }

    let function_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM pg_proc WHERE proname = 'check_tickets_remaining'
        )
        "#,
    )
    .fetch_one(&mut *conn)
    .await?;

    if !function_exists {
        missing.push("check_tickets_remaining()".to_string());
    }

    Ok(missing)
}

/// Check if required tables exist
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    let mut conn = pool.acquire().await?;
    let missing = missing_schema_objects(&mut conn).await?;

    for object in &missing {
        tracing::error!("Required schema object '{}' does not exist", object);
    }

    Ok(missing.is_empty())
}
