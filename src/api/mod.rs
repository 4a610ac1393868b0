//! API module
//!
//! HTTP API endpoints and middleware.

pub mod extract;
pub mod middleware;
pub mod routes;

pub use routes::create_router;

use axum::{middleware as axum_middleware, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers::{ReservationHandler, SettlementHandler};

/// Shared state of the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub reservations: Arc<ReservationHandler>,
    pub settlements: Arc<SettlementHandler>,
}

impl AppState {
    pub fn new(reservations: ReservationHandler, settlements: SettlementHandler) -> Self {
        Self {
            reservations: Arc::new(reservations),
            settlements: Arc::new(settlements),
        }
    }
}

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // Layers run last-added first: context -> logging -> handler
    let api_routes = create_router()
        .layer(axum_middleware::from_fn(middleware::logging_middleware))
        .layer(axum_middleware::from_fn(middleware::context_middleware));

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
