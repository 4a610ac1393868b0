//! API Integration Tests
//!
//! Requests go through the full router: context middleware, logging,
//! handlers and error mapping, over the in-memory store.

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::util::ServiceExt;
use uuid::Uuid;

use ticket_settlement::domain::TicketStatus;

mod common;

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn post(app: &common::TestApp, path: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/api/v1/events/{}/{}", app.event_id, path))
        .header("content-type", "application/json")
        .header("X-Company-Id", app.company_id.to_string())
        .header("X-Request-User-Id", app.user_id.to_string())
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn two_tickets() -> Value {
    json!({
        "tickets": [
            { "name": "Ada Lovelace", "email": "ada@example.com", "dietary_req": "vegan" },
            { "name": "Charles Babbage", "email": "charles@example.com" }
        ]
    })
}

async fn reserve(app: &common::TestApp) -> String {
    let (status, body) = send(&app.router, post(app, "reserve", two_tickets())).await;
    assert_eq!(status, StatusCode::CREATED, "reserve failed: {}", body);
    body["booking_token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health() {
    let app = common::memory_app(1000, Some(10));
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"OK");
}

#[tokio::test]
async fn test_booking_info() {
    let app = common::memory_app(1500, Some(10));
    let request = Request::builder()
        .uri(format!("/api/v1/events/{}/booking-info", app.event_id))
        .header("X-Company-Id", app.company_id.to_string())
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["item_price_cents"], 1500);
    assert_eq!(body["tickets_remaining"], 10);
    assert_eq!(body["event_name"], "Harvest Supper");
}

#[tokio::test]
async fn test_reserve_then_buy() {
    let app = common::memory_app(1000, Some(10));

    let (status, body) = send(&app.router, post(&app, "reserve", two_tickets())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["ticket_count"], 2);
    assert_eq!(body["item_price_cents"], 1000);
    assert_eq!(body["total_price_cents"], 2000);
    let booking_token = body["booking_token"].as_str().unwrap().to_string();

    let buy = json!({
        "booking_token": booking_token,
        "payment_token": "tok_visa",
        "card_ref": "4242-2030-12"
    });
    let (status, body) = send(&app.router, post(&app, "buy", buy.clone())).await;
    assert_eq!(status, StatusCode::OK, "buy failed: {}", body);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["already_settled"], false);
    assert!(body["charge_id"].is_string());

    let statuses: Vec<TicketStatus> = app
        .store
        .event_tickets(app.event_id)
        .iter()
        .map(|t| t.status)
        .collect();
    assert_eq!(statuses, vec![TicketStatus::Paid, TicketStatus::Paid]);

    // Submitting the same booking again does not charge twice
    let (status, body) = send(&app.router, post(&app, "buy", buy)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["already_settled"], true);
    assert_eq!(app.gateway.successful_charges(), 1);
    assert_eq!(app.gateway.charge_requests()[0].amount_cents, 2000);
}

#[tokio::test]
async fn test_over_capacity_is_conflict() {
    let app = common::memory_app(1000, Some(1));

    let (status, body) = send(&app.router, post(&app, "reserve", two_tickets())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status"], "insufficient_capacity");
    assert_eq!(body["message"], "only 1 tickets remaining");
    assert!(app.store.event_tickets(app.event_id).is_empty());
}

#[tokio::test]
async fn test_empty_reservation_is_bad_request() {
    let app = common::memory_app(1000, Some(10));

    let (status, body) = send(&app.router, post(&app, "reserve", json!({ "tickets": [] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "validation_error");
}

#[tokio::test]
async fn test_missing_company_header() {
    let app = common::memory_app(1000, Some(10));
    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/v1/events/{}/reserve", app.event_id))
        .header("content-type", "application/json")
        .body(Body::from(two_tickets().to_string()))
        .unwrap();

    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "missing_header");
}

#[tokio::test]
async fn test_malformed_company_header() {
    let app = common::memory_app(1000, Some(10));
    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/v1/events/{}/reserve", app.event_id))
        .header("content-type", "application/json")
        .header("X-Company-Id", "not-a-uuid")
        .body(Body::from(two_tickets().to_string()))
        .unwrap();

    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "invalid_request");
}

#[tokio::test]
async fn test_unknown_event_is_not_found() {
    let app = common::memory_app(1000, Some(10));
    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/v1/events/{}/reserve", Uuid::new_v4()))
        .header("content-type", "application/json")
        .header("X-Company-Id", app.company_id.to_string())
        .body(Body::from(two_tickets().to_string()))
        .unwrap();

    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "not_found");
}

#[tokio::test]
async fn test_tampered_booking_token_is_gone() {
    let app = common::memory_app(1000, Some(10));
    let mut booking_token = reserve(&app).await;
    booking_token.push('x');

    let buy = json!({
        "booking_token": booking_token,
        "payment_token": "tok_visa",
        "card_ref": "4242-2030-12"
    });
    let (status, body) = send(&app.router, post(&app, "buy", buy)).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["status"], "payment_window_expired");
    assert!(app.gateway.charge_requests().is_empty());
}

#[tokio::test]
async fn test_declined_card_is_payment_required() {
    let app = common::memory_app(1000, Some(10));
    app.gateway.decline_token("tok_declined");
    let booking_token = reserve(&app).await;

    let buy = json!({
        "booking_token": booking_token,
        "payment_token": "tok_declined",
        "card_ref": "0002-2030-12"
    });
    let (status, body) = send(&app.router, post(&app, "buy", buy)).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["status"], "payment_declined");

    let statuses: Vec<TicketStatus> = app
        .store
        .event_tickets(app.event_id)
        .iter()
        .map(|t| t.status)
        .collect();
    assert_eq!(
        statuses,
        vec![TicketStatus::PaymentFailed, TicketStatus::PaymentFailed]
    );
}

#[tokio::test]
async fn test_buy_without_user_header() {
    let app = common::memory_app(1000, Some(10));
    let booking_token = reserve(&app).await;

    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/v1/events/{}/buy", app.event_id))
        .header("content-type", "application/json")
        .header("X-Company-Id", app.company_id.to_string())
        .body(Body::from(
            json!({
                "booking_token": booking_token,
                "payment_token": "tok_visa",
                "card_ref": "4242-2030-12"
            })
            .to_string(),
        ))
        .unwrap();

    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "missing_header");
}

#[tokio::test]
async fn test_malformed_body_is_json_bad_request() {
    let app = common::memory_app(1000, Some(10));

    let (status, body) = send(&app.router, post(&app, "reserve", json!({ "tickets": "nope" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "invalid_request");
    assert_eq!(
        body["message"],
        "Invalid request: body does not match the expected fields"
    );
    assert!(app.store.event_tickets(app.event_id).is_empty());
}

#[tokio::test]
async fn test_buy_without_content_type_is_json_bad_request() {
    let app = common::memory_app(1000, Some(10));
    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/v1/events/{}/buy", app.event_id))
        .header("X-Company-Id", app.company_id.to_string())
        .header("X-Request-User-Id", app.user_id.to_string())
        .body(Body::from("booking_token=abc"))
        .unwrap();

    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "invalid_request");
    assert_eq!(body["message"], "Invalid request: expected a JSON body");
    assert!(app.gateway.charge_requests().is_empty());
}

#[tokio::test]
async fn test_malformed_event_id_is_json_bad_request() {
    let app = common::memory_app(1000, Some(10));
    let request = Request::builder()
        .uri("/api/v1/events/not-a-uuid/booking-info")
        .header("X-Company-Id", app.company_id.to_string())
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "invalid_request");
    assert_eq!(body["message"], "Invalid request: malformed path parameter");
}
