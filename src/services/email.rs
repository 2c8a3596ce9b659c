//! Transactional email: askama templates rendered to HTML and delivered
//! through the SendGrid v3 API.
//!
//! Without an API key the mailer only logs what it would have sent, which
//! keeps local development free of outbound mail.

use std::time::Duration;

use askama::Template;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use thiserror::Error;

use crate::auth::otp::OTP_TTL;
use crate::config::{EmailConfig, EventDetails};
use crate::models::booking::BookingDetails;
use crate::services::qr::qr_data_uri;

const SENDGRID_SEND_URL: &str = "https://api.sendgrid.com/v3/mail/send";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Template)]
#[template(path = "email/otp.html")]
struct OtpEmailHtml<'a> {
    brand: &'a str,
    code: &'a str,
    ttl_minutes: u64,
}

#[derive(Template)]
#[template(path = "email/booking_confirmation.html")]
struct BookingConfirmationHtml<'a> {
    customer_name: &'a str,
    booking_number: &'a str,
    ticket_name: &'a str,
    ticket_count: i32,
    event: &'a EventDetails,
}

#[derive(Template)]
#[template(path = "email/payment_confirmation.html")]
struct PaymentConfirmationHtml<'a> {
    customer_name: &'a str,
    booking_number: &'a str,
    ticket_name: &'a str,
    ticket_count: i32,
    total_amount: String,
    event: &'a EventDetails,
    qr_code: Option<String>,
}

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Email provider rejected message ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Template error: {0}")]
    Template(#[from] askama::Error),
}

/// Booking facts shared by the confirmation emails.
#[derive(Debug, Clone)]
pub struct BookingSummary {
    pub customer_name: String,
    pub booking_number: String,
    pub ticket_name: String,
    pub ticket_count: i32,
    pub total_amount: Decimal,
}

impl From<&BookingDetails> for BookingSummary {
    fn from(details: &BookingDetails) -> Self {
        let customer_name = if details.user.full_name.trim().is_empty() {
            details.user.email.clone()
        } else {
            details.user.full_name.clone()
        };
        Self {
            customer_name,
            booking_number: details.booking.booking_number.clone(),
            ticket_name: details.ticket.name.clone(),
            ticket_count: details.booking.ticket_count,
            total_amount: details.total_amount,
        }
    }
}

/// Something worth telling a user about by email.
#[derive(Clone)]
pub enum Notification {
    Otp { to: String, code: String },
    BookingConfirmation { to: String, booking: BookingSummary },
    PaymentConfirmation { to: String, booking: BookingSummary },
}

impl Notification {
    pub fn booking_confirmation(details: &BookingDetails) -> Self {
        Notification::BookingConfirmation {
            to: details.user.email.clone(),
            booking: details.into(),
        }
    }

    pub fn payment_confirmation(details: &BookingDetails) -> Self {
        Notification::PaymentConfirmation {
            to: details.user.email.clone(),
            booking: details.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Otp { .. } => "otp",
            Notification::BookingConfirmation { .. } => "booking_confirmation",
            Notification::PaymentConfirmation { .. } => "payment_confirmation",
        }
    }

    pub fn recipient(&self) -> &str {
        match self {
            Notification::Otp { to, .. }
            | Notification::BookingConfirmation { to, .. }
            | Notification::PaymentConfirmation { to, .. } => to,
        }
    }

    /// Renders the notification into a ready-to-send message.
    pub fn render(&self, brand: &str, event: &EventDetails) -> Result<Email, EmailError> {
        let (subject, html) = match self {
            Notification::Otp { code, .. } => (
                format!("Your OTP Code - {brand}"),
                OtpEmailHtml {
                    brand,
                    code,
                    ttl_minutes: OTP_TTL.as_secs() / 60,
                }
                .render()?,
            ),
            Notification::BookingConfirmation { booking, .. } => (
                format!("Booking Confirmed - {}", event.name),
                BookingConfirmationHtml {
                    customer_name: &booking.customer_name,
                    booking_number: &booking.booking_number,
                    ticket_name: &booking.ticket_name,
                    ticket_count: booking.ticket_count,
                    event,
                }
                .render()?,
            ),
            Notification::PaymentConfirmation { booking, .. } => (
                format!("Payment Successful - {}", event.name),
                PaymentConfirmationHtml {
                    customer_name: &booking.customer_name,
                    booking_number: &booking.booking_number,
                    ticket_name: &booking.ticket_name,
                    ticket_count: booking.ticket_count,
                    total_amount: format!("{:.2}", booking.total_amount),
                    event,
                    qr_code: qr_data_uri(&booking.booking_number),
                }
                .render()?,
            ),
        };

        Ok(Email {
            to: self.recipient().to_string(),
            subject,
            html,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Clone)]
enum Transport {
    SendGrid {
        http: reqwest::Client,
        api_key: SecretString,
    },
    Log,
}

#[derive(Clone)]
pub struct Mailer {
    transport: Transport,
    from_email: String,
    from_name: String,
}

impl Mailer {
    pub fn new(config: &EmailConfig) -> Result<Self, EmailError> {
        let transport = match &config.sendgrid_api_key {
            Some(api_key) => Transport::SendGrid {
                http: reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?,
                api_key: api_key.clone(),
            },
            None => {
                tracing::warn!("SENDGRID_API_KEY not set, emails will only be logged");
                Transport::Log
            }
        };

        Ok(Self {
            transport,
            from_email: config.from_email.clone(),
            from_name: config.from_name.clone(),
        })
    }

    pub fn brand(&self) -> &str {
        &self.from_name
    }

    pub async fn send(&self, email: &Email) -> Result<(), EmailError> {
        match &self.transport {
            Transport::Log => {
                tracing::info!(
                    to = %email.to,
                    subject = %email.subject,
                    body = %email.html,
                    "Email delivery disabled, message logged only"
                );
                Ok(())
            }
            Transport::SendGrid { http, api_key } => {
                let response = http
                    .post(SENDGRID_SEND_URL)
                    .bearer_auth(api_key.expose_secret())
                    .json(&self.payload(email))
                    .send()
                    .await?;

                let status = response.status();
                if !status.is_success() {
                    let message = response.text().await.unwrap_or_default();
                    return Err(EmailError::Api {
                        status: status.as_u16(),
                        message,
                    });
                }

                tracing::info!(to = %email.to, subject = %email.subject, "Email sent");
                Ok(())
            }
        }
    }

    fn payload(&self, email: &Email) -> serde_json::Value {
        json!({
            "personalizations": [{ "to": [{ "email": email.to }] }],
            "from": { "email": self.from_email, "name": self.from_name },
            "subject": email.subject,
            "content": [{ "type": "text/html", "value": email.html }],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> EventDetails {
        EventDetails {
            name: "Rhythm of Kumari".into(),
            date: "14 Feb 2026".into(),
            location: "Kathmandu".into(),
        }
    }

    fn summary() -> BookingSummary {
        BookingSummary {
            customer_name: "Asha <Guest>".into(),
            booking_number: "A1B2C3".into(),
            ticket_name: "Gold".into(),
            ticket_count: 2,
            total_amount: Decimal::new(9985, 1),
        }
    }

    #[test]
    fn test_otp_email_carries_code_and_expiry() {
        let email = Notification::Otp {
            to: "guest@example.com".into(),
            code: "123456".into(),
        }
        .render("Prince Group Vista", &event())
        .unwrap();

        assert_eq!(email.to, "guest@example.com");
        assert_eq!(email.subject, "Your OTP Code - Prince Group Vista");
        assert!(email.html.contains("123456"));
        assert!(email.html.contains("5 minutes"));
    }

    #[test]
    fn test_booking_confirmation_escapes_user_text() {
        let email = Notification::BookingConfirmation {
            to: "guest@example.com".into(),
            booking: summary(),
        }
        .render("Prince Group Vista", &event())
        .unwrap();

        assert_eq!(email.subject, "Booking Confirmed - Rhythm of Kumari");
        assert!(email.html.contains("A1B2C3"));
        assert!(email.html.contains("Kathmandu"));
        assert!(!email.html.contains("<Guest>"));
    }

    #[test]
    fn test_payment_confirmation_embeds_qr_and_amount() {
        let email = Notification::PaymentConfirmation {
            to: "guest@example.com".into(),
            booking: summary(),
        }
        .render("Prince Group Vista", &event())
        .unwrap();

        assert_eq!(email.subject, "Payment Successful - Rhythm of Kumari");
        assert!(email.html.contains("998.50"));
        assert!(email.html.contains("data:image/svg+xml;base64,"));
    }

    #[test]
    fn test_sendgrid_payload_shape() {
        let mailer = Mailer::new(&EmailConfig {
            sendgrid_api_key: None,
            from_email: "noreply@example.com".into(),
            from_name: "Prince Group Vista".into(),
        })
        .unwrap();
        let payload = mailer.payload(&Email {
            to: "guest@example.com".into(),
            subject: "Hi".into(),
            html: "<p>Hi</p>".into(),
        });

        assert_eq!(payload["personalizations"][0]["to"][0]["email"], "guest@example.com");
        assert_eq!(payload["from"]["name"], "Prince Group Vista");
        assert_eq!(payload["content"][0]["type"], "text/html");
    }

    #[tokio::test]
    async fn test_log_transport_accepts_everything() {
        let mailer = Mailer::new(&EmailConfig {
            sendgrid_api_key: None,
            from_email: "noreply@example.com".into(),
            from_name: "Prince Group Vista".into(),
        })
        .unwrap();
        let email = Email {
            to: "guest@example.com".into(),
            subject: "Hi".into(),
            html: String::new(),
        };
        assert!(mailer.send(&email).await.is_ok());
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_log_transport_writes_subject_and_body() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let mailer = Mailer::new(&EmailConfig {
            sendgrid_api_key: None,
            from_email: "noreply@example.com".into(),
            from_name: "Prince Group Vista".into(),
        })
        .unwrap();
        let email = Notification::Otp {
            to: "guest@example.com".into(),
            code: "482913".into(),
        }
        .render("Prince Group Vista", &event())
        .unwrap();
        mailer.send(&email).await.unwrap();

        let logged = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(logged.contains("Your OTP Code - Prince Group Vista"));
        assert!(logged.contains("482913"));
    }
}
