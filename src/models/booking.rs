use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef, Postgres};
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

use super::referral::Referral;
use super::ticket::Ticket;
use super::user::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

/// Outcome of applying an incoming provider status to a stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Apply,
    Unchanged,
    Conflict,
}

#[derive(Debug, Error)]
#[error("unknown payment status '{0}'")]
pub struct UnknownPaymentStatus(String);

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    /// Terminal states never move. A different terminal status is a conflict
    /// for the caller to log; a pending report against a terminal booking is
    /// stale and ignored.
    pub fn reconcile(current: Self, incoming: Self) -> Transition {
        match (current, incoming) {
            (c, i) if c == i => Transition::Unchanged,
            (PaymentStatus::Pending, _) => Transition::Apply,
            (_, PaymentStatus::Pending) => Transition::Unchanged,
            _ => Transition::Conflict,
        }
    }

    /// Redirect query value: `SUCCESS`, `FAILED`, anything else is pending.
    pub fn from_callback(value: &str) -> Self {
        match value {
            "SUCCESS" => PaymentStatus::Success,
            "FAILED" => PaymentStatus::Failed,
            _ => PaymentStatus::Pending,
        }
    }

    /// Payment link or order status reported by the provider.
    pub fn from_provider(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "PAID" | "SUCCESS" => PaymentStatus::Success,
            "EXPIRED" | "CANCELLED" | "FAILED" => PaymentStatus::Failed,
            _ => PaymentStatus::Pending,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownPaymentStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "success" => Ok(PaymentStatus::Success),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(UnknownPaymentStatus(other.to_string())),
        }
    }
}

impl sqlx::Type<Postgres> for PaymentStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <&str as sqlx::Type<Postgres>>::compatible(ty)
    }
}

impl<'r> sqlx::Decode<'r, Postgres> for PaymentStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let raw = <&str as sqlx::Decode<Postgres>>::decode(value)?;
        Ok(raw.parse()?)
    }
}

impl<'q> sqlx::Encode<'q, Postgres> for PaymentStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> IsNull {
        <&str as sqlx::Encode<'q, Postgres>>::encode_by_ref(&self.as_str(), buf)
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: Uuid,
    pub booking_number: String,
    pub user_id: i64,
    pub referral_id: Option<i64>,
    pub ticket_id: i64,
    pub ticket_count: i32,
    pub payment_method: String,
    pub payment_status: PaymentStatus,
    pub payment_link_id: Option<String>,
    /// Every link id issued for or reported against this booking, newest last.
    #[serde(skip)]
    pub payment_link_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A booking with its user, ticket and referral resolved.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingDetails {
    #[serde(flatten)]
    pub booking: Booking,
    pub user: User,
    pub ticket: Ticket,
    pub referral: Option<Referral>,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_amount: Decimal,
}

impl BookingDetails {
    pub fn new(booking: Booking, user: User, ticket: Ticket, referral: Option<Referral>) -> Self {
        let total_amount =
            ticket.unit_price(booking.referral_id.is_some()) * Decimal::from(booking.ticket_count);
        Self {
            booking,
            user,
            ticket,
            referral,
            total_amount,
        }
    }

    pub fn is_owned_by(&self, user: &User) -> bool {
        self.booking.user_id == user.id
    }

    /// Whether `link_id` is the current link or one issued earlier.
    pub fn has_payment_link(&self, link_id: &str) -> bool {
        self.booking.payment_link_id.as_deref() == Some(link_id)
            || self.booking.payment_link_ids.iter().any(|id| id == link_id)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateBookingRequest {
    pub ticket_id: i64,
    pub ticket_count: i32,
    pub payment_method: String,
    pub referral_code: Option<String>,
}

/// Only these fields are editable, and only while the booking is pending.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateBookingRequest {
    pub ticket_count: Option<i32>,
    pub payment_method: Option<String>,
    /// An empty string removes the referral.
    pub referral_code: Option<String>,
}

/// Resolved booking columns for an insert.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub user_id: i64,
    pub ticket_id: i64,
    pub referral_id: Option<i64>,
    pub ticket_count: i32,
    pub payment_method: String,
}

/// Resolved changes for a pending booking.
#[derive(Debug, Clone)]
pub struct BookingChanges {
    pub ticket_count: i32,
    pub payment_method: String,
    pub referral_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, FromRow)]
pub struct BookingStats {
    pub total: i64,
    pub paid: i64,
    pub pending: i64,
    pub failed: i64,
}

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Raw pagination query. Values are kept as strings so that garbage falls
/// back to the defaults instead of rejecting the request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PaginationQuery {
    pub page: Option<String>,
    pub page_size: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub page_size: i64,
}

impl PageRequest {
    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }
}

impl From<PaginationQuery> for PageRequest {
    fn from(query: PaginationQuery) -> Self {
        let page = query
            .page
            .and_then(|p| p.trim().parse::<i64>().ok())
            .filter(|p| *p >= 1)
            .unwrap_or(DEFAULT_PAGE);
        let page_size = query
            .page_size
            .and_then(|s| s.trim().parse::<i64>().ok())
            .filter(|s| (1..=MAX_PAGE_SIZE).contains(s))
            .unwrap_or(DEFAULT_PAGE_SIZE);
        Self { page, page_size }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
    pub has_next: bool,
    pub has_previous: bool,
}

impl PageInfo {
    pub fn new(request: PageRequest, total: i64) -> Self {
        let total_pages = (total + request.page_size - 1) / request.page_size;
        Self {
            total,
            page: request.page,
            page_size: request.page_size,
            total_pages,
            has_next: request.page < total_pages,
            has_previous: request.page > 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingPage {
    pub bookings: Vec<BookingDetails>,
    pub pagination: PageInfo,
}
