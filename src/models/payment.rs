use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::booking::PaymentStatus;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreatePaymentLinkRequest {
    #[serde(alias = "bookingId")]
    pub booking_number: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentLinkResponse {
    /// Provider-side link id.
    pub payment_session_id: String,
    pub order_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub order_amount: Decimal,
    pub order_currency: String,
    pub status: String,
    pub payment_link: String,
    pub link_id: String,
}

/// Read-through view of a payment link's most recent order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusResponse {
    pub order_id: String,
    pub payment_id: String,
    pub transaction_id: String,
    pub status: PaymentStatus,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: String,
    pub payment_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentHistoryEntry {
    pub booking_number: String,
    pub payment_link_id: String,
    pub status: PaymentStatus,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub ticket_name: String,
    pub ticket_count: i32,
    pub updated_at: DateTime<Utc>,
}

/// Query string of the provider's browser redirect.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PaymentCallbackQuery {
    pub order_id: Option<String>,
    pub payment_status: Option<String>,
    pub cf_link_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CheckPaymentQuery {
    pub payment_link_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingPaymentState {
    pub booking_number: String,
    pub payment_status: PaymentStatus,
    pub payment_link_id: Option<String>,
}
