//! Handler and router tests that need Postgres. Ignored by default; run with
//! `DATABASE_URL=postgres://... cargo test -- --ignored`.

use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::prelude::*;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde_json::json;
use sqlx::PgPool;
use tokio::sync::mpsc;
use tower::ServiceExt;

use booking_server::auth::{Authenticated, Identity};
use booking_server::config::{
    Config, EmailConfig, EventDetails, PaymentConfig, SessionConfig,
};
use booking_server::db::{BookingRepository, TicketRepository, UserRepository};
use booking_server::handlers::users::create_user;
use booking_server::models::booking::{BookingDetails, NewBooking, PaymentStatus};
use booking_server::models::ticket::TicketFields;
use booking_server::models::user::UserProfileRequest;
use booking_server::routes::create_routes;
use booking_server::services::{Notification, Notifier};
use booking_server::state::AppState;
use booking_server::utils::error::AppError;
use booking_server::utils::extract::ApiJson;

const WEBHOOK_SECRET: &str = "whsec_test";

fn config(payments: Option<PaymentConfig>) -> Config {
    Config {
        database_url: SecretString::from("postgres://unused".to_string()),
        host: "127.0.0.1".parse().unwrap(),
        port: 0,
        production: false,
        frontend_url: "http://localhost:3000".into(),
        cors_allowed_origins: "http://localhost:3000".into(),
        session: SessionConfig {
            secret: SecretString::from("test-secret-test-secret-test-secret".to_string()),
            ttl: Duration::from_secs(3600),
        },
        firebase_project_id: None,
        payments,
        email: EmailConfig {
            sendgrid_api_key: None,
            from_email: "noreply@example.com".into(),
            from_name: "Prince Group Vista".into(),
        },
        event: EventDetails {
            name: "Rhythm of Kumari".into(),
            date: "14 Feb 2026".into(),
            location: "Kathmandu".into(),
        },
    }
}

fn webhook_only_payments() -> PaymentConfig {
    PaymentConfig {
        client_id: "client".into(),
        client_secret: SecretString::from("secret".to_string()),
        api_url: "http://127.0.0.1:1/pg".into(),
        api_version: "2025-01-01".into(),
        webhook_secret: Some(SecretString::from(WEBHOOK_SECRET.to_string())),
        notify_url: "http://localhost:8000/api/v1/payment/webhook".into(),
        return_url: "http://localhost:3000/payment/return".into(),
        currency: "INR".into(),
    }
}

fn app_state(pool: &PgPool, payments: Option<PaymentConfig>) -> (AppState, mpsc::Receiver<Notification>) {
    let (notifier, outbox) = Notifier::channel(16);
    let state = AppState::new(config(payments), pool.clone(), notifier).unwrap();
    (state, outbox)
}

async fn pending_booking(pool: &PgPool, available: i32, link_id: &str) -> BookingDetails {
    let user = UserRepository::new(pool)
        .find_or_create_by_email("guest@example.com")
        .await
        .unwrap();
    let ticket = TicketRepository::new(pool)
        .create(&TicketFields {
            name: "Gold".into(),
            price: Decimal::new(500, 0),
            ticket_type: "vip".into(),
            description: "Front rows".into(),
            benefits: Vec::new(),
            status: "active".into(),
            total_tickets: available,
            available_tickets: available,
            offer_price_with_referral: Decimal::ZERO,
            offer_price_with_referral_and_youtube: Decimal::ZERO,
        })
        .await
        .unwrap();
    let bookings = BookingRepository::new(pool);
    let details = bookings
        .create(&NewBooking {
            user_id: user.id,
            ticket_id: ticket.id,
            referral_id: None,
            ticket_count: 2,
            payment_method: "cashfree".into(),
        })
        .await
        .unwrap();
    bookings.set_payment_link(details.booking.id, link_id).await.unwrap();
    details
}

async fn callback(router: &Router, query: &str) -> (StatusCode, String) {
    let response = router
        .clone()
        .oneshot(
            Request::get(format!("/api/v1/payment/callback?{query}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let location = response
        .headers()
        .get(header::LOCATION)
        .map(|v| v.to_str().unwrap().to_string())
        .unwrap_or_default();
    (response.status(), location)
}

async fn stored(pool: &PgPool, details: &BookingDetails) -> BookingDetails {
    BookingRepository::new(pool)
        .get_by_id(details.booking.id)
        .await
        .unwrap()
        .unwrap()
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_callback_success_redirects_and_marks_paid(pool: PgPool) {
    let details = pending_booking(&pool, 10, "link-A").await;
    let (state, mut outbox) = app_state(&pool, None);
    let router = create_routes(state);

    let (status, location) = callback(
        &router,
        "order_id=link-A&payment_status=SUCCESS&cf_link_id=cf-1",
    )
    .await;

    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(
        location,
        format!(
            "http://localhost:3000/payment/result?status=success&bookingId={}&orderId=link-A",
            details.booking.booking_number
        )
    );
    let paid = stored(&pool, &details).await;
    assert_eq!(paid.booking.payment_status, PaymentStatus::Success);
    assert_eq!(paid.booking.payment_link_id.as_deref(), Some("cf-1"));
    assert_eq!(outbox.try_recv().unwrap().kind(), "payment_confirmation");

    // Replaying the redirect changes nothing and sends no second email.
    let (status, _) = callback(&router, "order_id=link-A&payment_status=SUCCESS").await;
    assert_eq!(status, StatusCode::FOUND);
    assert!(outbox.try_recv().is_err());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_callback_failure_redirects_and_releases_tickets(pool: PgPool) {
    let details = pending_booking(&pool, 10, "link-F").await;
    let (state, _outbox) = app_state(&pool, None);
    let router = create_routes(state);

    let (status, location) = callback(&router, "order_id=link-F&payment_status=FAILED").await;

    assert_eq!(status, StatusCode::FOUND);
    assert!(location.contains("status=failed"));
    let failed = stored(&pool, &details).await;
    assert_eq!(failed.booking.payment_status, PaymentStatus::Failed);
    assert_eq!(failed.ticket.available_tickets, 10);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_callback_with_other_status_stays_pending(pool: PgPool) {
    let details = pending_booking(&pool, 10, "link-P").await;
    let (state, _outbox) = app_state(&pool, None);
    let router = create_routes(state);

    let (status, location) =
        callback(&router, "order_id=link-P&payment_status=USER_DROPPED").await;

    assert_eq!(status, StatusCode::FOUND);
    assert!(location.contains("status=pending"));
    assert_eq!(
        stored(&pool, &details).await.booking.payment_status,
        PaymentStatus::Pending
    );
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_webhook_for_superseded_link_settles_booking(pool: PgPool) {
    let details = pending_booking(&pool, 10, "link-A").await;
    BookingRepository::new(&pool)
        .set_payment_link(details.booking.id, "link-B")
        .await
        .unwrap();
    let (state, mut outbox) = app_state(&pool, Some(webhook_only_payments()));
    let router = create_routes(state);

    let body = json!({
        "type": "PAYMENT_LINK_EVENT",
        "data": { "link_id": "link-A", "link_status": "PAID" }
    })
    .to_string();
    let timestamp = Utc::now().timestamp().to_string();
    let mut mac = Hmac::<sha2::Sha256>::new_from_slice(WEBHOOK_SECRET.as_bytes()).unwrap();
    mac.update(timestamp.as_bytes());
    mac.update(body.as_bytes());
    let signature = BASE64_STANDARD.encode(mac.finalize().into_bytes());

    let response = router
        .oneshot(
            Request::post("/api/v1/payment/webhook")
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-webhook-timestamp", &timestamp)
                .header("x-webhook-signature", signature)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&bytes));

    assert_eq!(
        stored(&pool, &details).await.booking.payment_status,
        PaymentStatus::Success
    );
    assert_eq!(outbox.try_recv().unwrap().kind(), "payment_confirmation");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_create_booking_answers_200_and_queues_confirmation(pool: PgPool) {
    let existing = pending_booking(&pool, 10, "link-X").await;
    let (state, mut outbox) = app_state(&pool, None);
    let token = state.sessions().issue(&existing.user).unwrap().token;
    let router = create_routes(state);

    let body = json!({
        "ticketId": existing.ticket.id,
        "ticketCount": 3,
        "paymentMethod": "cashfree"
    });
    let response = router
        .oneshot(
            Request::post("/api/v1/booking")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["ticketCount"], 3);
    assert_eq!(outbox.try_recv().unwrap().kind(), "booking_confirmation");
}

fn external(subject: &str, verified_email: Option<&str>) -> Authenticated {
    Authenticated(Identity::External {
        subject: subject.into(),
        email: verified_email.map(str::to_string),
    })
}

fn profile(email: &str) -> ApiJson<UserProfileRequest> {
    ApiJson(UserProfileRequest {
        full_name: "Someone".into(),
        email: Some(email.into()),
        ..Default::default()
    })
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_body_email_cannot_claim_another_account(pool: PgPool) {
    let users = UserRepository::new(&pool);
    let victim = users.find_or_create_by_email("victim@example.com").await.unwrap();
    let (state, _outbox) = app_state(&pool, None);

    let result = create_user(
        State(state.clone()),
        external("attacker-uid", Some("attacker@example.com")),
        profile("victim@example.com"),
    )
    .await;
    let Err(err) = result else {
        panic!("mismatched body email was accepted");
    };
    assert!(matches!(err, AppError::ValidationError { field: Some("email"), .. }));

    let result = create_user(
        State(state),
        external("attacker-uid", None),
        profile("victim@example.com"),
    )
    .await;
    let Err(err) = result else {
        panic!("unverified identity claimed an existing row");
    };
    assert!(matches!(err, AppError::Conflict(_)));

    assert!(users.get_by_firebase_id("attacker-uid").await.unwrap().is_none());
    let untouched = users.get_by_id(victim.id).await.unwrap().unwrap();
    assert_eq!(untouched.firebase_id, None);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_verified_email_links_existing_otp_user(pool: PgPool) {
    let users = UserRepository::new(&pool);
    let existing = users.find_or_create_by_email("guest@example.com").await.unwrap();
    let (state, _outbox) = app_state(&pool, None);

    let response = create_user(
        State(state),
        external("guest-uid", Some("guest@example.com")),
        profile("guest@example.com"),
    )
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let linked = users.get_by_firebase_id("guest-uid").await.unwrap().unwrap();
    assert_eq!(linked.id, existing.id);
    assert_eq!(linked.full_name, "Someone");
}
