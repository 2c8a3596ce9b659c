use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::utils::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct Ticket {
    pub id: i64,
    pub name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    #[serde(rename(serialize = "type"))]
    pub ticket_type: String,
    pub description: String,
    pub benefits: Vec<String>,
    pub status: String,
    pub total_tickets: i32,
    pub available_tickets: i32,
    #[serde(with = "rust_decimal::serde::float")]
    pub offer_price_with_referral: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub offer_price_with_referral_and_youtube: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Ticket columns without the generated ones. Used for inserts and for
/// full-record updates after a merge.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TicketFields {
    pub name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    #[serde(rename = "type")]
    pub ticket_type: String,
    pub description: String,
    pub benefits: Vec<String>,
    pub status: String,
    pub total_tickets: i32,
    pub available_tickets: i32,
    #[serde(with = "rust_decimal::serde::float")]
    pub offer_price_with_referral: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub offer_price_with_referral_and_youtube: Decimal,
}

/// Partial update; absent fields keep their stored values.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateTicketRequest {
    pub name: Option<String>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub price: Option<Decimal>,
    #[serde(rename = "type")]
    pub ticket_type: Option<String>,
    pub description: Option<String>,
    pub benefits: Option<Vec<String>>,
    pub status: Option<String>,
    pub total_tickets: Option<i32>,
    pub available_tickets: Option<i32>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub offer_price_with_referral: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub offer_price_with_referral_and_youtube: Option<Decimal>,
}

impl Ticket {
    pub fn fields(&self) -> TicketFields {
        TicketFields {
            name: self.name.clone(),
            price: self.price,
            ticket_type: self.ticket_type.clone(),
            description: self.description.clone(),
            benefits: self.benefits.clone(),
            status: self.status.clone(),
            total_tickets: self.total_tickets,
            available_tickets: self.available_tickets,
            offer_price_with_referral: self.offer_price_with_referral,
            offer_price_with_referral_and_youtube: self.offer_price_with_referral_and_youtube,
        }
    }

    /// Price per ticket for a booking, honouring the referral offer when set.
    pub fn unit_price(&self, with_referral: bool) -> Decimal {
        if with_referral && self.offer_price_with_referral > Decimal::ZERO {
            self.offer_price_with_referral
        } else {
            self.price
        }
    }
}

impl TicketFields {
    pub fn merge(mut self, update: UpdateTicketRequest) -> Self {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(price) = update.price {
            self.price = price;
        }
        if let Some(ticket_type) = update.ticket_type {
            self.ticket_type = ticket_type;
        }
        if let Some(description) = update.description {
            self.description = description;
        }
        if let Some(benefits) = update.benefits {
            self.benefits = benefits;
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        // Availability follows a change of total so existing reservations
        // are kept, unless the update sets it outright.
        if let Some(total) = update.total_tickets {
            self.available_tickets += total - self.total_tickets;
            self.total_tickets = total;
        }
        if let Some(available) = update.available_tickets {
            self.available_tickets = available;
        }
        if let Some(price) = update.offer_price_with_referral {
            self.offer_price_with_referral = price;
        }
        if let Some(price) = update.offer_price_with_referral_and_youtube {
            self.offer_price_with_referral_and_youtube = price;
        }
        self
    }

    pub fn validate_new(&self) -> Result<(), AppError> {
        self.validate_common()?;
        if self.available_tickets <= 0 {
            return Err(AppError::invalid_field(
                "availableTickets",
                "Available tickets must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Sold-out tickets may be saved with zero availability.
    pub fn validate_update(&self) -> Result<(), AppError> {
        self.validate_common()?;
        if self.available_tickets < 0 {
            return Err(AppError::invalid_field(
                "availableTickets",
                "Available tickets cannot be negative",
            ));
        }
        Ok(())
    }

    fn validate_common(&self) -> Result<(), AppError> {
        let required = [
            ("name", &self.name, "Ticket name is required"),
            ("description", &self.description, "Ticket description is required"),
            ("type", &self.ticket_type, "Ticket type is required"),
            ("status", &self.status, "Ticket status is required"),
        ];
        for (field, value, message) in required {
            if value.trim().is_empty() {
                return Err(AppError::invalid_field(field, message));
            }
        }

        if self.price <= Decimal::ZERO {
            return Err(AppError::invalid_field(
                "price",
                "Ticket price must be greater than 0",
            ));
        }
        if self.total_tickets <= 0 {
            return Err(AppError::invalid_field(
                "totalTickets",
                "Total tickets must be greater than 0",
            ));
        }
        if self.available_tickets > self.total_tickets {
            return Err(AppError::invalid_field(
                "availableTickets",
                "Available tickets cannot exceed total tickets",
            ));
        }
        if self.offer_price_with_referral < Decimal::ZERO
            || self.offer_price_with_referral_and_youtube < Decimal::ZERO
        {
            return Err(AppError::invalid_field(
                "offerPriceWithReferral",
                "Offer prices cannot be negative",
            ));
        }
        Ok(())
    }
}
