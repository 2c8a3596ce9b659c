//! Cashfree Payment Links client and webhook verification.

use std::time::Duration;

use base64::prelude::*;
use chrono::{DateTime, Utc};
use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::{Deserialize, Deserializer, Serialize};
use sha2::Sha256;
use thiserror::Error;
use url::Url;

use crate::config::PaymentConfig;
use crate::models::booking::PaymentStatus;
use crate::models::payment::PaymentStatusResponse;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const PAYMENT_METHOD: &str = "cashfree";
/// Oldest (or furthest in the future) webhook timestamp still accepted.
const WEBHOOK_TOLERANCE_SECS: i64 = 5 * 60;

pub const WEBHOOK_SIGNATURE_HEADER: &str = "x-webhook-signature";
pub const WEBHOOK_TIMESTAMP_HEADER: &str = "x-webhook-timestamp";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment provider is not configured")]
    NotConfigured,

    #[error("request to payment provider failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("payment provider returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unexpected payment provider response: {0}")]
    Parse(String),

    #[error("{0}")]
    InvalidSignature(String),
}

#[derive(Debug, Clone)]
pub struct Customer {
    pub name: String,
    pub email: String,
    pub phone: String,
}

/// Everything needed to open a payment link for one booking.
#[derive(Debug, Clone)]
pub struct NewPaymentLink {
    pub link_id: String,
    pub booking_number: String,
    pub amount: Decimal,
    pub purpose: String,
    pub customer: Customer,
}

#[derive(Debug, Serialize)]
struct CreateLinkRequest<'a> {
    link_id: &'a str,
    #[serde(with = "rust_decimal::serde::float")]
    link_amount: Decimal,
    link_currency: &'a str,
    link_purpose: &'a str,
    customer_details: CustomerDetails<'a>,
    link_meta: LinkMeta<'a>,
    link_notify: LinkNotify,
    link_auto_reminders: bool,
}

#[derive(Debug, Serialize)]
struct CustomerDetails<'a> {
    customer_name: &'a str,
    customer_email: &'a str,
    customer_phone: &'a str,
}

#[derive(Debug, Serialize)]
struct LinkMeta<'a> {
    notify_url: &'a str,
    return_url: &'a str,
}

#[derive(Debug, Serialize)]
struct LinkNotify {
    send_email: bool,
    send_sms: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentLink {
    #[serde(deserialize_with = "string_or_number")]
    pub cf_link_id: String,
    pub link_id: String,
    pub link_status: String,
    pub link_currency: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub link_amount: Decimal,
    pub link_url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct LinkOrder {
    #[serde(default, deserialize_with = "string_or_number")]
    cf_order_id: String,
    #[serde(default)]
    order_id: String,
    #[serde(default, with = "rust_decimal::serde::float")]
    order_amount: Decimal,
    #[serde(default)]
    order_currency: String,
    #[serde(default)]
    order_status: String,
    #[serde(default)]
    order_note: Option<String>,
    #[serde(default)]
    payment_session_id: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
}

pub struct CashfreeClient {
    http: reqwest::Client,
    config: PaymentConfig,
    return_url: Url,
}

impl CashfreeClient {
    pub fn new(config: PaymentConfig) -> Result<Self, PaymentError> {
        let return_url = Url::parse(&config.return_url)
            .map_err(|e| PaymentError::Parse(format!("CASHFREE_RETURN_URL: {e}")))?;
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            http,
            config,
            return_url,
        })
    }

    /// `POST /links`. The amount is whatever the caller computed; nothing
    /// from the client request reaches this point unchecked.
    pub async fn create_link(&self, link: &NewPaymentLink) -> Result<PaymentLink, PaymentError> {
        let return_url = self.return_url_for(&link.link_id, &link.booking_number);
        let body = CreateLinkRequest {
            link_id: &link.link_id,
            link_amount: link.amount,
            link_currency: &self.config.currency,
            link_purpose: &link.purpose,
            customer_details: CustomerDetails {
                customer_name: &link.customer.name,
                customer_email: &link.customer.email,
                customer_phone: &link.customer.phone,
            },
            link_meta: LinkMeta {
                notify_url: &self.config.notify_url,
                return_url: return_url.as_str(),
            },
            link_notify: LinkNotify {
                send_email: false,
                send_sms: false,
            },
            link_auto_reminders: true,
        };

        tracing::info!(
            link_id = %link.link_id,
            booking_number = %link.booking_number,
            amount = %link.amount,
            "Creating payment link"
        );

        let response = self
            .authorized(self.http.post(format!("{}/links", self.config.api_url)))
            .json(&body)
            .send()
            .await?;
        read_json(response).await
    }

    /// `GET /links/{id}/orders`, mapped onto a booking payment status.
    pub async fn link_status(&self, link_id: &str) -> Result<PaymentStatusResponse, PaymentError> {
        let response = self
            .authorized(
                self.http
                    .get(format!("{}/links/{}/orders", self.config.api_url, link_id)),
            )
            .send()
            .await?;
        let orders: Vec<LinkOrder> = read_json(response).await?;

        Ok(match orders.into_iter().next() {
            Some(order) => PaymentStatusResponse {
                status: PaymentStatus::from_provider(&order.order_status),
                order_id: order.order_id,
                payment_id: order.cf_order_id,
                transaction_id: order.payment_session_id,
                amount: order.order_amount,
                currency: order.order_currency,
                payment_method: PAYMENT_METHOD.to_string(),
                payment_date: Utc::now(),
                message: order.order_note,
            },
            None => PaymentStatusResponse {
                order_id: link_id.to_string(),
                payment_id: link_id.to_string(),
                transaction_id: link_id.to_string(),
                status: PaymentStatus::Pending,
                amount: Decimal::ZERO,
                currency: self.config.currency.clone(),
                payment_method: PAYMENT_METHOD.to_string(),
                payment_date: Utc::now(),
                message: Some("No orders found for this payment link".to_string()),
            },
        })
    }

    /// Checks `x-webhook-signature` against the configured secret and
    /// rejects deliveries whose signed timestamp is stale.
    pub fn verify_webhook(
        &self,
        timestamp: Option<&str>,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<(), PaymentError> {
        self.verify_webhook_at(timestamp, body, signature, Utc::now())
    }

    fn verify_webhook_at(
        &self,
        timestamp: Option<&str>,
        body: &[u8],
        signature: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), PaymentError> {
        let secret = self
            .config
            .webhook_secret
            .as_ref()
            .ok_or_else(|| PaymentError::InvalidSignature("webhook secret is not configured".into()))?;
        let timestamp = timestamp
            .ok_or_else(|| PaymentError::InvalidSignature("missing webhook timestamp".into()))?;
        let signature = signature
            .ok_or_else(|| PaymentError::InvalidSignature("missing webhook signature".into()))?;

        if !verify_webhook_signature(secret.expose_secret().as_bytes(), timestamp, body, signature) {
            return Err(PaymentError::InvalidSignature("webhook signature mismatch".into()));
        }
        if !webhook_timestamp_is_fresh(timestamp, now) {
            return Err(PaymentError::InvalidSignature(format!(
                "webhook timestamp {timestamp} is outside the accepted window"
            )));
        }
        Ok(())
    }

    fn return_url_for(&self, link_id: &str, booking_number: &str) -> Url {
        let mut url = self.return_url.clone();
        url.query_pairs_mut()
            .append_pair("orderId", link_id)
            .append_pair("bookingId", booking_number);
        url
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("x-client-id", &self.config.client_id)
            .header("x-client-secret", self.config.client_secret.expose_secret())
            .header("x-api-version", &self.config.api_version)
    }
}

/// `base64(HMAC-SHA256(secret, timestamp + body))`, compared in constant time.
pub fn verify_webhook_signature(secret: &[u8], timestamp: &str, body: &[u8], signature: &str) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(timestamp.as_bytes());
    mac.update(body);
    let expected = BASE64_STANDARD.encode(mac.finalize().into_bytes());

    constant_time_eq(expected.as_bytes(), signature.trim().as_bytes())
}

/// Accepts epoch seconds or milliseconds within the tolerance of `now`.
pub fn webhook_timestamp_is_fresh(timestamp: &str, now: DateTime<Utc>) -> bool {
    let Ok(value) = timestamp.trim().parse::<i64>() else {
        return false;
    };
    let seconds = if value >= 1_000_000_000_000 { value / 1000 } else { value };
    (now.timestamp() - seconds).abs() <= WEBHOOK_TOLERANCE_SECS
}

/// Payment link event delivered to the webhook.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type", default)]
    pub event_type: String,
    #[serde(default)]
    pub data: WebhookData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookData {
    #[serde(default)]
    pub link_id: Option<String>,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub cf_link_id: Option<String>,
    #[serde(default)]
    pub link_status: Option<String>,
    #[serde(default)]
    pub order: Option<WebhookOrder>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookOrder {
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub transaction_status: Option<String>,
}

impl WebhookEvent {
    /// Link status wins; the order's transaction status is the fallback.
    pub fn status(&self) -> PaymentStatus {
        self.data
            .link_status
            .as_deref()
            .or_else(|| {
                self.data
                    .order
                    .as_ref()
                    .and_then(|o| o.transaction_status.as_deref())
            })
            .map(PaymentStatus::from_provider)
            .unwrap_or(PaymentStatus::Pending)
    }

    /// Identifiers a stored booking may carry for this link.
    pub fn link_ids(&self) -> Vec<String> {
        [self.data.link_id.as_ref(), self.data.cf_link_id.as_ref()]
            .into_iter()
            .flatten()
            .filter(|id| !id.is_empty())
            .cloned()
            .collect()
    }
}

async fn read_json<T>(response: reqwest::Response) -> Result<T, PaymentError>
where
    T: serde::de::DeserializeOwned,
{
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or(body);
        tracing::warn!(status = status.as_u16(), message = %message, "Payment provider error");
        return Err(PaymentError::Api {
            status: status.as_u16(),
            message,
        });
    }

    serde_json::from_str(&body).map_err(|e| PaymentError::Parse(e.to_string()))
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(optional_string_or_number(deserializer)?.unwrap_or_default())
}

fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn config(webhook_secret: Option<&str>) -> PaymentConfig {
        PaymentConfig {
            client_id: "client".into(),
            client_secret: SecretString::from("secret".to_string()),
            api_url: "https://sandbox.cashfree.com/pg".into(),
            api_version: "2025-01-01".into(),
            webhook_secret: webhook_secret.map(|s| SecretString::from(s.to_string())),
            notify_url: "https://api.example.com/api/v1/payment/webhook".into(),
            return_url: "https://api.example.com/api/v1/payment/callback".into(),
            currency: "INR".into(),
        }
    }

    fn sign(secret: &str, timestamp: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(timestamp.as_bytes());
        mac.update(body);
        BASE64_STANDARD.encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_valid_signature_is_accepted() {
        let body = br#"{"type":"PAYMENT_LINK_EVENT"}"#;
        let signature = sign("whsec", "1700000000", body);
        assert!(verify_webhook_signature(b"whsec", "1700000000", body, &signature));
    }

    #[test]
    fn test_tampered_body_or_timestamp_is_rejected() {
        let body = br#"{"type":"PAYMENT_LINK_EVENT"}"#;
        let signature = sign("whsec", "1700000000", body);
        assert!(!verify_webhook_signature(b"whsec", "1700000000", b"{}", &signature));
        assert!(!verify_webhook_signature(b"whsec", "1700000001", body, &signature));
        assert!(!verify_webhook_signature(b"other", "1700000000", body, &signature));
    }

    #[test]
    fn test_plain_hash_of_body_is_not_a_signature() {
        use sha2::Digest;
        let body = br#"{"type":"PAYMENT_LINK_EVENT"}"#;
        let plain = BASE64_STANDARD.encode(Sha256::digest(body));
        assert!(!verify_webhook_signature(b"whsec", "", body, &plain));
    }

    #[test]
    fn test_missing_secret_rejects_every_webhook() {
        let client = CashfreeClient::new(config(None)).unwrap();
        let err = client
            .verify_webhook(Some("1"), b"{}", Some("sig"))
            .unwrap_err();
        assert!(matches!(err, PaymentError::InvalidSignature(_)));
    }

    #[test]
    fn test_client_verifies_with_configured_secret() {
        let client = CashfreeClient::new(config(Some("whsec"))).unwrap();
        let body = br#"{"data":{}}"#;
        let timestamp = Utc::now().timestamp().to_string();
        let signature = sign("whsec", &timestamp, body);
        assert!(client.verify_webhook(Some(&timestamp), body, Some(&signature)).is_ok());
        assert!(client.verify_webhook(None, body, Some(&signature)).is_err());
    }

    #[test]
    fn test_replayed_webhook_is_rejected() {
        let client = CashfreeClient::new(config(Some("whsec"))).unwrap();
        let body = br#"{"data":{}}"#;
        let sent_at = DateTime::from_timestamp(1_735_689_600, 0).unwrap();
        let signature = sign("whsec", "1735689600", body);

        let fresh = sent_at + chrono::Duration::seconds(30);
        assert!(client
            .verify_webhook_at(Some("1735689600"), body, Some(&signature), fresh)
            .is_ok());

        let replayed = sent_at + chrono::Duration::minutes(30);
        let err = client
            .verify_webhook_at(Some("1735689600"), body, Some(&signature), replayed)
            .unwrap_err();
        assert!(matches!(err, PaymentError::InvalidSignature(_)));
    }

    #[test]
    fn test_timestamp_window_accepts_seconds_and_millis() {
        let now = DateTime::from_timestamp(1_735_689_600, 0).unwrap();
        assert!(webhook_timestamp_is_fresh("1735689500", now));
        assert!(webhook_timestamp_is_fresh("1735689600123", now));
        assert!(!webhook_timestamp_is_fresh("1735689000", now));
        assert!(!webhook_timestamp_is_fresh("1735699600", now));
        assert!(!webhook_timestamp_is_fresh("yesterday", now));
    }

    #[test]
    fn test_return_url_carries_order_and_booking() {
        let client = CashfreeClient::new(config(None)).unwrap();
        let url = client.return_url_for("link-1", "0AB12C");
        assert_eq!(
            url.as_str(),
            "https://api.example.com/api/v1/payment/callback?orderId=link-1&bookingId=0AB12C"
        );
    }

    #[test]
    fn test_create_link_request_shape() {
        let body = CreateLinkRequest {
            link_id: "link-1",
            link_amount: Decimal::new(250050, 2),
            link_currency: "INR",
            link_purpose: "Booking 0AB12C",
            customer_details: CustomerDetails {
                customer_name: "Asha",
                customer_email: "asha@example.com",
                customer_phone: "9999999999",
            },
            link_meta: LinkMeta {
                notify_url: "https://n",
                return_url: "https://r",
            },
            link_notify: LinkNotify {
                send_email: false,
                send_sms: false,
            },
            link_auto_reminders: true,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["link_amount"], 2500.5);
        assert_eq!(json["customer_details"]["customer_email"], "asha@example.com");
        assert_eq!(json["link_meta"]["return_url"], "https://r");
    }

    #[test]
    fn test_payment_link_accepts_numeric_provider_id() {
        let link: PaymentLink = serde_json::from_str(
            r#"{"cf_link_id": 4242, "link_id": "link-1", "link_status": "ACTIVE",
                "link_currency": "INR", "link_amount": 1500, "link_url": "https://pay"}"#,
        )
        .unwrap();
        assert_eq!(link.cf_link_id, "4242");
        assert_eq!(link.link_amount, Decimal::from(1500));
    }

    #[test]
    fn test_webhook_event_status_and_ids() {
        let event: WebhookEvent = serde_json::from_str(
            r#"{"type":"PAYMENT_LINK_EVENT","data":{"link_id":"link-1","cf_link_id":99,
                "link_status":"PAID","order":{"order_id":"o1","transaction_status":"SUCCESS"}}}"#,
        )
        .unwrap();
        assert_eq!(event.status(), PaymentStatus::Success);
        assert_eq!(event.link_ids(), vec!["link-1".to_string(), "99".to_string()]);

        let event: WebhookEvent = serde_json::from_str(
            r#"{"data":{"cf_link_id":"cf-7","order":{"transaction_status":"FAILED"}}}"#,
        )
        .unwrap();
        assert_eq!(event.status(), PaymentStatus::Failed);
        assert_eq!(event.link_ids(), vec!["cf-7".to_string()]);

        let empty = WebhookEvent::default();
        assert_eq!(empty.status(), PaymentStatus::Pending);
        assert!(empty.link_ids().is_empty());
    }
}
