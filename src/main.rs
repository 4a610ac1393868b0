//! ticket_settlement - Ticket reservation and payment settlement API
//!
//! Reserves event tickets against a hard capacity limit and settles them
//! through the payment gateway exactly once.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ticket_settlement::api::{self, AppState};
use ticket_settlement::capability::CapabilityCodec;
use ticket_settlement::db;
use ticket_settlement::gateway::{StripeGateway, DEFAULT_BASE_URL};
use ticket_settlement::handlers::{ReservationHandler, SettlementHandler};
use ticket_settlement::jobs::{JobScheduler, JobSchedulerConfig};
use ticket_settlement::store::{PgTicketStore, TicketStore};
use ticket_settlement::Config;

/// Initialize tracing/logging
fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ticket_settlement=debug,tower_http=debug".into());

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(config.log_format == "json");

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!(environment = %config.environment, "Starting ticket_settlement server");
    tracing::info!("Connecting to database...");

    let pool = db::connect(&config.database_url, config.database_max_connections).await?;
    db::verify_connection(&pool).await?;

    // Verify database schema
    if !db::check_schema(&pool).await? {
        tracing::error!("Database schema is not complete. Please run migrations.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }

    tracing::info!("Database connected successfully");

    if config.is_production() && config.gateway_base_url != DEFAULT_BASE_URL {
        tracing::warn!(
            gateway_base_url = %config.gateway_base_url,
            "Payment gateway base URL overridden in production"
        );
    }

    let store: Arc<dyn TicketStore> = Arc::new(PgTicketStore::new(pool.clone()));
    let gateway = Arc::new(StripeGateway::new(
        &config.gateway_base_url,
        config.gateway_timeout(),
    )?);
    let codec = CapabilityCodec::new(&config.token_secret)?;

    let state = AppState::new(
        ReservationHandler::new(store.clone(), codec.clone(), config.reservation_settings()),
        SettlementHandler::new(store.clone(), gateway, codec, config.settlement_settings()),
    );

    let scheduler = JobScheduler::with_config(
        store,
        JobSchedulerConfig {
            expiry_sweep_interval: std::time::Duration::from_secs(
                config.expiry_sweep_interval_secs,
            ),
            reservation_hold: config.reservation_hold(),
        },
    )
    .start();

    tracing::info!("Listening on http://{}", addr);

    let app = api::build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup
    tracing::info!("Server shutting down...");
    scheduler.abort();
    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
