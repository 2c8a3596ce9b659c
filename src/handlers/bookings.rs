use axum::extract::State;
use axum::response::Response;
use uuid::Uuid;

use crate::auth::{AdminUser, AuthError, CurrentUser};
use crate::db::{BookingRepository, ReferralRepository};
use crate::models::booking::{
    BookingChanges, BookingDetails, CreateBookingRequest, NewBooking, PageRequest,
    PaginationQuery, PaymentStatus, UpdateBookingRequest,
};
use crate::models::payment::{BookingPaymentState, CheckPaymentQuery};
use crate::models::user::User;
use crate::services::Notification;
use crate::state::AppState;
use crate::utils::error::{AppError, AppResult};
use crate::utils::extract::{ApiJson, ApiPath, ApiQuery};
use crate::utils::ids::is_booking_number;
use crate::utils::response::{empty_success, success};

pub async fn create_booking(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(request): ApiJson<CreateBookingRequest>,
) -> AppResult<Response> {
    if request.ticket_id <= 0 {
        return Err(AppError::invalid_field("ticketId", "Ticket is required"));
    }
    validate_ticket_count(request.ticket_count)?;
    let payment_method = required_payment_method(&request.payment_method)?;
    let referral_id = match request.referral_code.as_deref().map(str::trim) {
        Some(code) if !code.is_empty() => Some(resolve_referral(&state, code).await?),
        _ => None,
    };

    let details = BookingRepository::new(state.pool())
        .create(&NewBooking {
            user_id: user.id,
            ticket_id: request.ticket_id,
            referral_id,
            ticket_count: request.ticket_count,
            payment_method,
        })
        .await?;

    tracing::info!(
        user_id = user.id,
        booking_number = %details.booking.booking_number,
        ticket_id = details.ticket.id,
        ticket_count = details.booking.ticket_count,
        "Booking created"
    );
    state
        .notifier()
        .notify(Notification::booking_confirmation(&details));

    Ok(success(details, "Booking created successfully"))
}

pub async fn list_user_bookings(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Response> {
    let bookings = BookingRepository::new(state.pool())
        .list_for_user(user.id)
        .await?;
    Ok(success(bookings, "Bookings retrieved successfully"))
}

pub async fn get_booking(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(booking_number): ApiPath<String>,
) -> AppResult<Response> {
    let details = find_by_number(&state, &booking_number).await?;
    ensure_can_read(&details, &user)?;
    Ok(success(details, "Booking retrieved successfully"))
}

/// Owners may change count, payment method and referral while the booking
/// is still pending.
pub async fn update_booking(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(booking_number): ApiPath<String>,
    ApiJson(request): ApiJson<UpdateBookingRequest>,
) -> AppResult<Response> {
    let current = find_by_number(&state, &booking_number).await?;
    if !current.is_owned_by(&user) {
        return Err(AuthError::Forbidden.into());
    }

    let ticket_count = request.ticket_count.unwrap_or(current.booking.ticket_count);
    validate_ticket_count(ticket_count)?;
    let payment_method = match request.payment_method.as_deref() {
        Some(method) => required_payment_method(method)?,
        None => current.booking.payment_method.clone(),
    };
    let referral_id = match request.referral_code.as_deref().map(str::trim) {
        None => current.booking.referral_id,
        Some("") => None,
        Some(code) => Some(resolve_referral(&state, code).await?),
    };

    let details = BookingRepository::new(state.pool())
        .update_pending(
            current.booking.id,
            &BookingChanges {
                ticket_count,
                payment_method,
                referral_id,
            },
        )
        .await?;
    tracing::info!(booking_number = %booking_number, "Booking updated");

    Ok(success(details, "Booking updated successfully"))
}

/// Owners may delete their unpaid bookings; admins may delete any.
pub async fn delete_booking(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
) -> AppResult<Response> {
    let bookings = BookingRepository::new(state.pool());
    let details = bookings
        .get_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Booking {id} not found")))?;

    if !user.is_admin() {
        if !details.is_owned_by(&user) {
            return Err(AuthError::Forbidden.into());
        }
        if details.booking.payment_status == PaymentStatus::Success {
            return Err(AppError::Conflict(
                "Paid bookings can only be cancelled by an administrator".into(),
            ));
        }
    }

    bookings.delete(id).await?;
    Ok(empty_success("Booking deleted successfully"))
}

/// Confirms that `paymentLinkId` is the link stored on the caller's booking
/// and reports the stored status.
pub async fn check_payment(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(booking_number): ApiPath<String>,
    ApiQuery(query): ApiQuery<CheckPaymentQuery>,
) -> AppResult<Response> {
    let link_id = query
        .payment_link_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::invalid_field("paymentLinkId", "Invalid payment"))?;

    let details = find_by_number(&state, &booking_number).await?;
    ensure_can_read(&details, &user)?;

    if !details.has_payment_link(link_id) {
        return Err(AppError::invalid_field("paymentLinkId", "Invalid payment"));
    }

    Ok(success(
        BookingPaymentState {
            booking_number: details.booking.booking_number,
            payment_status: details.booking.payment_status,
            payment_link_id: details.booking.payment_link_id,
        },
        "Payment status retrieved successfully",
    ))
}

pub async fn list_all_bookings(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
) -> AppResult<Response> {
    let bookings = BookingRepository::new(state.pool()).list_all().await?;
    Ok(success(bookings, "Bookings retrieved successfully"))
}

pub async fn list_bookings_paginated(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    ApiQuery(query): ApiQuery<PaginationQuery>,
) -> AppResult<Response> {
    let page = BookingRepository::new(state.pool())
        .list_paginated(PageRequest::from(query))
        .await?;
    Ok(success(page, "Bookings retrieved successfully"))
}

pub async fn booking_stats(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
) -> AppResult<Response> {
    let stats = BookingRepository::new(state.pool()).stats().await?;
    Ok(success(stats, "Booking statistics retrieved successfully"))
}

pub(crate) async fn find_by_number(
    state: &AppState,
    booking_number: &str,
) -> Result<BookingDetails, AppError> {
    if !is_booking_number(booking_number) {
        return Err(AppError::NotFound(format!("Booking {booking_number} not found")));
    }
    BookingRepository::new(state.pool())
        .get_by_number(booking_number)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Booking {booking_number} not found")))
}

fn ensure_can_read(details: &BookingDetails, user: &User) -> Result<(), AppError> {
    if details.is_owned_by(user) || user.is_admin() {
        Ok(())
    } else {
        Err(AuthError::Forbidden.into())
    }
}

async fn resolve_referral(state: &AppState, code: &str) -> Result<i64, AppError> {
    ReferralRepository::new(state.pool())
        .get_by_code(code)
        .await?
        .map(|referral| referral.id)
        .ok_or_else(|| AppError::invalid_field("referralCode", "Invalid referral code"))
}

fn validate_ticket_count(count: i32) -> Result<(), AppError> {
    if count <= 0 {
        return Err(AppError::invalid_field(
            "ticketCount",
            "Ticket count must be greater than 0",
        ));
    }
    Ok(())
}

fn required_payment_method(method: &str) -> Result<String, AppError> {
    let method = method.trim();
    if method.is_empty() {
        return Err(AppError::invalid_field(
            "paymentMethod",
            "Payment method is required",
        ));
    }
    Ok(method.to_string())
}
