//! API Routes
//!
//! HTTP endpoint definitions.

use axum::{
    extract::{Extension, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::OperationContext;
use crate::error::AppError;
use crate::handlers::{BookingInfo, BuyTicketsCommand, ReserveTicketsCommand, TicketSpec};

use super::extract::{AppJson, AppPath};
use super::AppState;

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Deserialize)]
pub struct ReserveRequest {
    pub tickets: Vec<TicketSpec>,
}

#[derive(Debug, Serialize)]
pub struct ReserveResponse {
    pub booking_token: String,
    pub ticket_count: u32,
    pub item_price_cents: i64,
    pub total_price_cents: i64,
    pub reserve_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct BuyRequest {
    pub booking_token: String,
    pub payment_token: String,
    pub card_ref: String,
    #[serde(default)]
    pub client_ip: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BuyResponse {
    pub status: &'static str,
    pub charge_id: Option<String>,
    pub already_settled: bool,
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/events/:event_id/booking-info", get(booking_info))
        .route("/events/:event_id/reserve", post(reserve_tickets))
        .route("/events/:event_id/buy", post(buy_tickets))
}

// =========================================================================
// GET /events/:event_id/booking-info
// =========================================================================

/// Remaining tickets and price for a published event
async fn booking_info(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    AppPath(event_id): AppPath<Uuid>,
) -> Result<Json<BookingInfo>, AppError> {
    let info = state.reservations.booking_info(event_id, &context).await?;
    Ok(Json(info))
}

// =========================================================================
// POST /events/:event_id/reserve
// =========================================================================

/// Reserve tickets and issue a booking token
async fn reserve_tickets(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    AppPath(event_id): AppPath<Uuid>,
    AppJson(request): AppJson<ReserveRequest>,
) -> Result<(StatusCode, Json<ReserveResponse>), AppError> {
    let command = ReserveTicketsCommand::new(event_id, request.tickets);
    let result = state.reservations.execute(command, &context).await?;

    Ok((
        StatusCode::CREATED,
        Json(ReserveResponse {
            booking_token: result.booking_token,
            ticket_count: result.ticket_count,
            item_price_cents: result.item_price_cents,
            total_price_cents: result.total_price_cents,
            reserve_time: result.reserve_time,
        }),
    ))
}

// =========================================================================
// POST /events/:event_id/buy
// =========================================================================

/// Pay for a reservation
async fn buy_tickets(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    AppPath(event_id): AppPath<Uuid>,
    AppJson(request): AppJson<BuyRequest>,
) -> Result<Json<BuyResponse>, AppError> {
    let command = BuyTicketsCommand::new(
        event_id,
        request.booking_token,
        request.payment_token,
        request.card_ref,
    );
    let client_ip = request
        .client_ip
        .or_else(|| context.client_ip.map(|ip| ip.to_string()));
    let command = if let Some(client_ip) = client_ip {
        command.with_client_ip(client_ip)
    } else {
        command
    };

    let receipt = state.settlements.execute(command, &context).await?;

    Ok(Json(BuyResponse {
        status: "ok",
        charge_id: receipt.charge_id,
        already_settled: receipt.already_settled,
    }))
}
