use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::LOCATION;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use url::Url;
use uuid::Uuid;

use crate::auth::{AuthError, CurrentUser};
use crate::db::BookingRepository;
use crate::handlers::bookings::find_by_number;
use crate::models::booking::{BookingDetails, PaymentStatus, Transition};
use crate::models::payment::{
    CreatePaymentLinkRequest, PaymentCallbackQuery, PaymentHistoryEntry, PaymentLinkResponse,
};
use crate::services::payments::{
    Customer, NewPaymentLink, PaymentError, WebhookEvent, WEBHOOK_SIGNATURE_HEADER,
    WEBHOOK_TIMESTAMP_HEADER,
};
use crate::services::Notification;
use crate::state::AppState;
use crate::utils::error::{AppError, AppResult};
use crate::utils::extract::{ApiJson, ApiPath, ApiQuery};
use crate::utils::response::{empty_success, success};

/// Issues a hosted payment link for one of the caller's pending bookings.
/// The amount is always computed server-side from the stored ticket and
/// referral.
pub async fn create_payment_link(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(request): ApiJson<CreatePaymentLinkRequest>,
) -> AppResult<Response> {
    let booking_number = request.booking_number.trim();
    if booking_number.is_empty() {
        return Err(AppError::invalid_field("bookingNumber", "Booking number is required"));
    }

    let details = find_by_number(&state, booking_number).await?;
    if !details.is_owned_by(&user) {
        return Err(AuthError::Forbidden.into());
    }
    if details.booking.payment_status != PaymentStatus::Pending {
        return Err(AppError::Conflict(format!(
            "Booking {booking_number} is already {}",
            details.booking.payment_status
        )));
    }
    if user.mobile.trim().is_empty() {
        return Err(AppError::invalid_field(
            "mobile",
            "A mobile number is required on your profile before paying",
        ));
    }

    let client = state.payments()?;
    let link_id = Uuid::new_v4().to_string();
    BookingRepository::new(state.pool())
        .set_payment_link(details.booking.id, &link_id)
        .await?;

    let link = client
        .create_link(&NewPaymentLink {
            link_id: link_id.clone(),
            booking_number: details.booking.booking_number.clone(),
            amount: details.total_amount,
            purpose: format!(
                "{} x {} ({})",
                details.booking.ticket_count, details.ticket.name, details.booking.booking_number
            ),
            customer: Customer {
                name: display_name(&user.full_name, &user.email),
                email: user.email.clone(),
                phone: user.mobile.clone(),
            },
        })
        .await?;

    tracing::info!(
        booking_number = %details.booking.booking_number,
        link_id = %link_id,
        cf_link_id = %link.cf_link_id,
        "Payment link created"
    );

    Ok(success(
        PaymentLinkResponse {
            payment_session_id: link.cf_link_id,
            order_id: link_id.clone(),
            order_amount: link.link_amount,
            order_currency: link.link_currency,
            status: link.link_status,
            payment_link: link.link_url,
            link_id,
        },
        "Payment link created successfully",
    ))
}

/// Read-through status of a payment link. Nothing is persisted here.
pub async fn check_payment_status(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(link_id): ApiPath<String>,
) -> AppResult<Response> {
    let details = BookingRepository::new(state.pool())
        .find_by_payment_link(std::slice::from_ref(&link_id))
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Payment link {link_id} not found")))?;
    if !details.is_owned_by(&user) && !user.is_admin() {
        return Err(AuthError::Forbidden.into());
    }

    let status = state.payments()?.link_status(&link_id).await?;
    Ok(success(status, "Payment status retrieved successfully"))
}

pub async fn payment_history(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Response> {
    let payments: Vec<PaymentHistoryEntry> = BookingRepository::new(state.pool())
        .list_for_user(user.id)
        .await?
        .into_iter()
        .filter_map(|details| {
            let payment_link_id = details.booking.payment_link_id?;
            Some(PaymentHistoryEntry {
                booking_number: details.booking.booking_number,
                payment_link_id,
                status: details.booking.payment_status,
                amount: details.total_amount,
                ticket_name: details.ticket.name,
                ticket_count: details.booking.ticket_count,
                updated_at: details.booking.updated_at,
            })
        })
        .collect();

    Ok(success(
        json!({ "payments": payments }),
        "Payment history retrieved successfully",
    ))
}

/// Queues the payment confirmation email again for a paid booking.
pub async fn resend_payment_email(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(booking_number): ApiPath<String>,
) -> AppResult<Response> {
    let details = find_by_number(&state, &booking_number).await?;
    if !details.is_owned_by(&user) {
        return Err(AuthError::Forbidden.into());
    }
    if details.booking.payment_status != PaymentStatus::Success {
        return Err(AppError::validation(format!(
            "Booking {booking_number} has not been paid"
        )));
    }

    state
        .notifier()
        .notify(Notification::payment_confirmation(&details));
    Ok(empty_success("Payment confirmation email queued"))
}

/// Browser redirect from the hosted payment page. Terminal statuses claimed
/// in the query string are confirmed with the provider when one is
/// configured; the browser always lands on the frontend result page.
pub async fn payment_callback(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<PaymentCallbackQuery>,
) -> AppResult<Response> {
    let order_id = query
        .order_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::invalid_field("order_id", "order_id is required"))?
        .to_string();
    let cf_link_id = query
        .cf_link_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string);

    let mut link_ids = vec![order_id.clone()];
    link_ids.extend(cf_link_id.clone());

    let bookings = BookingRepository::new(state.pool());
    let details = bookings
        .find_by_payment_link(&link_ids)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No booking for payment link {order_id}")))?;

    let claimed = PaymentStatus::from_callback(query.payment_status.as_deref().unwrap_or(""));
    let incoming = confirmed_status(&state, &order_id, claimed).await;

    let (transition, details) = bookings
        .apply_payment_status(details.booking.id, incoming, cf_link_id.as_deref())
        .await?;
    notify_on_success(&state, transition, &details);

    let location = result_url(
        &state.config().frontend_url,
        details.booking.payment_status,
        &details.booking.booking_number,
        &order_id,
    )?;
    Ok(redirect_found(&location))
}

/// Server-to-server notification. The signature is checked before anything
/// in the body is trusted.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    let client = state.payments().map_err(|_| {
        AppError::from(PaymentError::InvalidSignature(
            "payment provider is not configured".into(),
        ))
    })?;
    client.verify_webhook(
        header_str(&headers, WEBHOOK_TIMESTAMP_HEADER),
        &body,
        header_str(&headers, WEBHOOK_SIGNATURE_HEADER),
    )?;

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::validation(format!("Invalid webhook payload: {e}")))?;
    let link_ids = event.link_ids();
    let incoming = event.status();

    tracing::info!(
        event_type = %event.event_type,
        link_ids = ?link_ids,
        status = %incoming,
        "Payment webhook received"
    );

    let bookings = BookingRepository::new(state.pool());
    let Some(details) = bookings.find_by_payment_link(&link_ids).await? else {
        tracing::warn!(link_ids = ?link_ids, "Webhook for unknown payment link acknowledged");
        return Ok(empty_success("Webhook acknowledged"));
    };

    let (transition, details) = bookings
        .apply_payment_status(details.booking.id, incoming, None)
        .await?;
    notify_on_success(&state, transition, &details);

    Ok(empty_success("Webhook processed"))
}

async fn confirmed_status(state: &AppState, link_id: &str, claimed: PaymentStatus) -> PaymentStatus {
    if claimed == PaymentStatus::Pending {
        return claimed;
    }
    let Ok(client) = state.payments() else {
        return claimed;
    };

    match client.link_status(link_id).await {
        Ok(reported) => {
            if reported.status != claimed {
                tracing::warn!(
                    link_id = %link_id,
                    claimed = %claimed,
                    reported = %reported.status,
                    "Callback status disagrees with provider"
                );
            }
            reported.status
        }
        Err(e) => {
            tracing::warn!(link_id = %link_id, error = %e, "Could not confirm callback status, leaving it to the webhook");
            PaymentStatus::Pending
        }
    }
}

fn notify_on_success(state: &AppState, transition: Transition, details: &BookingDetails) {
    if transition == Transition::Apply && details.booking.payment_status == PaymentStatus::Success {
        state
            .notifier()
            .notify(Notification::payment_confirmation(details));
    }
}

fn result_url(
    frontend_url: &str,
    status: PaymentStatus,
    booking_number: &str,
    order_id: &str,
) -> Result<Url, AppError> {
    let mut url = Url::parse(&format!("{frontend_url}/payment/result"))
        .map_err(|e| AppError::InternalServerError(format!("invalid FRONTEND_URL: {e}")))?;
    url.query_pairs_mut()
        .append_pair("status", status.as_str())
        .append_pair("bookingId", booking_number)
        .append_pair("orderId", order_id);
    Ok(url)
}

fn redirect_found(location: &Url) -> Response {
    match HeaderValue::from_str(location.as_str()) {
        Ok(value) => (StatusCode::FOUND, [(LOCATION, value)]).into_response(),
        Err(e) => {
            AppError::InternalServerError(format!("invalid redirect location: {e}")).into_response()
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn display_name(full_name: &str, email: &str) -> String {
    let name = full_name.trim();
    if name.is_empty() {
        email.to_string()
    } else {
        name.to_string()
    }
}
