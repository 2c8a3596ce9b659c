use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, create_security_headers_layer};
use crate::handlers::{
    auth, bookings, health_check, payments, referrals, tickets, users, youtube,
};
use crate::state::AppState;

pub const API_PREFIX: &str = "/api/v1";

pub fn create_routes(state: AppState) -> Router {
    let production = state.config().production;
    let cors = create_cors_layer(&state.config().cors_allowed_origins);

    Router::new()
        .nest(API_PREFIX, api_routes())
        .with_state(state)
        .layer(create_security_headers_layer(production))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .nest("/auth", auth_routes())
        .nest("/user", user_routes())
        .nest("/booking", booking_routes())
        .nest("/referral", referral_routes())
        .nest("/ticket", ticket_routes())
        .nest("/payment", payment_routes())
        .route("/youtube/check-subscription", get(youtube::check_subscription))
}

fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/send-otp", post(auth::send_otp))
        .route("/verify-otp", post(auth::verify_otp))
        .route("/resend-otp", post(auth::resend_otp))
}

fn user_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(users::get_current_user)
                .post(users::create_user)
                .put(users::update_user),
        )
        .route("/all", get(users::list_users))
        .route(
            "/:user_code",
            get(users::get_user_by_code).delete(users::delete_user),
        )
}

fn booking_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(bookings::create_booking))
        .route("/user", get(bookings::list_user_bookings))
        .route("/admin/all", get(bookings::list_all_bookings))
        .route("/admin/paginated", get(bookings::list_bookings_paginated))
        .route("/admin/stats", get(bookings::booking_stats))
        .route(
            "/check-payment/:booking_number",
            get(bookings::check_payment),
        )
        // Reads and updates take a booking number; deletes take the booking id.
        .route(
            "/:booking_ref",
            get(bookings::get_booking)
                .put(bookings::update_booking)
                .delete(bookings::delete_booking),
        )
}

fn referral_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(referrals::create_referral))
        .route("/all", get(referrals::list_referrals))
        .route("/check-referral", get(referrals::check_referral))
        .route(
            "/:id",
            get(referrals::get_referral)
                .put(referrals::update_referral)
                .delete(referrals::delete_referral),
        )
}

fn ticket_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(tickets::list_tickets).post(tickets::create_ticket))
        .route(
            "/:id",
            get(tickets::get_ticket)
                .put(tickets::update_ticket)
                .delete(tickets::delete_ticket),
        )
}

fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/links", post(payments::create_payment_link))
        .route("/status/:link_id", get(payments::check_payment_status))
        .route("/history", get(payments::payment_history))
        .route(
            "/send-email/:booking_number",
            post(payments::resend_payment_email),
        )
        .route("/webhook", post(payments::payment_webhook))
        .route("/callback", get(payments::payment_callback))
}
